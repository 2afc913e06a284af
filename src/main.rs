use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hymncache::cache::{CacheStore, SqliteStore, Source};
use hymncache::config::Config;
use hymncache::lifecycle::{
  ClientMessage, EventStream, LifecycleEvent, Registration, Worker, SYNC_UPDATE_DATA,
};
use hymncache::network::HttpFetcher;
use hymncache::{Destination, Request};

type Reg = Registration<SqliteStore, HttpFetcher>;

#[derive(Parser, Debug)]
#[command(name = "hymncache")]
#[command(about = "Offline cache for the AMEC hymnal viewer")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./hymncache.yaml or $XDG_CONFIG_HOME/hymncache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Origin the hymnal is served from
  #[arg(long)]
  origin: Option<String>,

  /// Cache version to operate on
  #[arg(long = "cache-version")]
  cache_version: Option<String>,

  /// Increase log verbosity (-v info, -vv debug)
  #[arg(short, long, action = clap::ArgAction::Count)]
  verbose: u8,

  /// Write logs to this file instead of stderr
  #[arg(long)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install the configured version and activate it
  Install,
  /// Fetch a resource through the cache
  Fetch {
    /// Absolute URL, or a path relative to the origin
    target: String,
    /// Request destination: style, script, document, image or other
    #[arg(short, long, default_value = "other")]
    destination: Destination,
  },
  /// List cache namespaces
  Namespaces,
  /// List the request keys stored in a namespace
  Entries { namespace: String },
  /// Run a background sync
  Sync {
    #[arg(long, default_value = SYNC_UPDATE_DATA)]
    tag: String,
  },
  /// Install the configured version over a running one and switch with SKIP_WAITING
  Update {
    /// Version currently serving open pages
    #[arg(long)]
    from: String,
  },
}

/// Initialize the tracing subscriber for logging.
///
/// RUST_LOG wins over -v. The returned guard must live until exit so buffered
/// file output is flushed.
fn init_tracing(verbose: u8, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let default = match verbose {
    0 => "hymncache=warn",
    1 => "hymncache=info",
    _ => "hymncache=debug",
  };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

  let Some(path) = log_file else {
    tracing_subscriber::registry()
      .with(fmt::layer().with_writer(io::stderr))
      .with(filter)
      .init();
    return Ok(None);
  };

  let file_name = path
    .file_name()
    .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;
  let dir = path
    .parent()
    .filter(|p| !p.as_os_str().is_empty())
    .unwrap_or_else(|| Path::new("."));

  let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
  tracing_subscriber::registry()
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .with(filter)
    .init();

  Ok(Some(guard))
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_tracing(args.verbose, args.log_file.as_deref())?;

  // Load configuration, then apply command-line overrides
  let mut config = Config::load(args.config.as_deref())?;
  if let Some(origin) = args.origin {
    config.origin = origin;
    config.origin_url()?;
  }
  if let Some(version) = args.cache_version {
    config.cache.version = version;
  }

  let db_path = config.storage.resolve_path()?;
  info!(path = %db_path.display(), version = %config.cache.version, "Opening cache store");
  let store = Arc::new(SqliteStore::open(&db_path)?);
  let fetcher = Arc::new(HttpFetcher::new());

  let (mut registration, mut events) = Registration::new();

  match args.command {
    Command::Install => {
      let worker = Worker::new(&config, Arc::clone(&store), Arc::clone(&fetcher))?;
      let result = registration.register(worker).await;
      report(&mut events);
      result?;
      println!("{} installed and active", config.cache.version);
    }

    Command::Fetch {
      target,
      destination,
    } => {
      start(&mut registration, &config, &store, &fetcher).await?;
      report(&mut events);
      fetch(&registration, &config, &target, destination).await?;
    }

    Command::Namespaces => {
      let current = [config.cache.static_namespace(), config.cache.data_namespace()];
      for name in store.namespaces()? {
        let marker = if current.contains(&name) { "*" } else { " " };
        println!("{} {}", marker, name);
      }
    }

    Command::Entries { namespace } => {
      if !store.namespaces()?.contains(&namespace) {
        return Err(eyre!("No such namespace: {}", namespace));
      }
      let handle = store.open(&namespace)?;
      for key in store.keys(&handle)? {
        println!("{}", key);
      }
    }

    Command::Sync { tag } => {
      start(&mut registration, &config, &store, &fetcher).await?;
      report(&mut events);
      let refreshed = registration.sync(&tag).await?;
      println!("refreshed {} document(s)", refreshed);
    }

    Command::Update { from } => {
      let mut previous = config.clone();
      previous.cache.version = from;
      let old = Worker::new(&previous, Arc::clone(&store), Arc::clone(&fetcher))?;
      if !registration.resume(old)? {
        return Err(eyre!(
          "Version {} is not installed; run `install` for it first",
          previous.cache.version
        ));
      }

      // A page stays open on the old version, so the new one has to wait
      let page = registration.connect();
      config.cache.skip_waiting_on_install = false;
      let worker = Worker::new(&config, Arc::clone(&store), Arc::clone(&fetcher))?;
      let result = registration.register(worker).await;
      report(&mut events);
      result?;

      if registration.pending_update() {
        registration.post_message(ClientMessage::SkipWaiting)?;
        report(&mut events);
      }
      println!(
        "page {} now served by {}",
        page,
        registration.controller_of(page).unwrap_or("nothing")
      );
    }
  }

  Ok(())
}

/// Bring the configured version up: reuse an earlier install, or install now.
async fn start(
  registration: &mut Reg,
  config: &Config,
  store: &Arc<SqliteStore>,
  fetcher: &Arc<HttpFetcher>,
) -> Result<()> {
  let worker = Worker::new(config, Arc::clone(store), Arc::clone(fetcher))?;
  if registration.resume(worker)? {
    return Ok(());
  }

  let worker = Worker::new(config, Arc::clone(store), Arc::clone(fetcher))?;
  registration.register(worker).await
}

async fn fetch(
  registration: &Reg,
  config: &Config,
  target: &str,
  destination: Destination,
) -> Result<()> {
  let controller = registration
    .controller()
    .ok_or_else(|| eyre!("No active cache version"))?;

  let request = match Request::get(target) {
    Ok(request) => request,
    Err(_) => Request::resolve(&config.origin_url()?, target)?,
  }
  .with_destination(destination);

  let result = controller.fetch(&request).await;
  // Let background cache writes land before the process exits
  controller.settle().await;
  let served = result?;

  if served.source == Source::Offline {
    if let Some(notice) = served.response.offline_notice() {
      eprintln!("{}: {}", notice.error, notice.message);
      return Err(eyre!("{} is not available offline", request.url()));
    }
  }

  info!(
    status = served.response.status,
    source = ?served.source,
    strategy = ?served.strategy,
    "Served {}",
    request.url()
  );

  let mut stdout = io::stdout().lock();
  stdout.write_all(&served.response.body)?;
  stdout.flush()?;
  Ok(())
}

/// Print lifecycle events the way the viewer would surface them.
fn report(events: &mut EventStream) {
  for event in events.drain() {
    match event {
      LifecycleEvent::StateChanged { version, state } => {
        eprintln!("[{}] {}", version, state);
      }
      LifecycleEvent::UpdateFound { version } => {
        eprintln!("A new version ({}) is available. Reload to update.", version);
      }
      LifecycleEvent::InstallFailed { version, reason } => {
        eprintln!("[{}] install failed: {}", version, reason);
      }
      LifecycleEvent::ControllerChanged { client, version } => {
        eprintln!("page {} now controlled by {}", client, version);
      }
    }
  }
}
