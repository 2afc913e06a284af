//! Fetch orchestration: runs the selected strategy against cache and network.

use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::strategy::{Role, Strategy, StrategySelector};
use super::traits::{CacheStore, Namespace};
use crate::config::CacheConfig;
use crate::network::{Fetcher, NetworkError};
use crate::request::Request;
use crate::response::Response;

/// Terminal failure of an intercepted request.
#[derive(Debug, Error)]
pub enum FetchError {
  /// Cache-first static asset missing from cache and unreachable
  #[error(transparent)]
  Network(#[from] NetworkError),
  /// Network-first request with no network and nothing cached
  #[error("no network response and no cached entry for {url}")]
  Unresolvable {
    url: String,
    #[source]
    cause: NetworkError,
  },
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
  Cache,
  Network,
  /// Synthesized locally because neither cache nor network could answer
  Offline,
}

/// A response handed back to the caller, tagged with its origin.
#[derive(Debug, Clone)]
pub struct Served {
  pub response: Response,
  pub source: Source,
  /// `None` when the request bypassed the cache layer
  pub strategy: Option<Strategy>,
}

/// Outcome of offering a request to the orchestrator.
#[derive(Debug)]
pub enum Intercept {
  /// Not handled; the caller should use default network behaviour
  Bypass,
  Respond(Result<Served, FetchError>),
}

/// Per-request state machine. `Done` is the only terminal state.
enum Step {
  CheckCache,
  FetchNetwork,
  StoreThenReturn(Response),
  CacheFallback(NetworkError),
  Done(Result<Served, FetchError>),
}

/// Serves requests for one cache version.
pub struct FetchOrchestrator<S, F> {
  store: Arc<S>,
  fetcher: Arc<F>,
  selector: StrategySelector,
  static_ns: Namespace,
  data_ns: Namespace,
  /// Background cache writes not yet awaited
  pending: Mutex<Vec<JoinHandle<()>>>,
}

impl<S, F> FetchOrchestrator<S, F>
where
  S: CacheStore + 'static,
  F: Fetcher + 'static,
{
  pub fn new(cache: &CacheConfig, store: Arc<S>, fetcher: Arc<F>) -> Self {
    Self {
      store,
      fetcher,
      selector: StrategySelector::new(cache),
      static_ns: Namespace::new(&cache.static_namespace()),
      data_ns: Namespace::new(&cache.data_namespace()),
      pending: Mutex::new(Vec::new()),
    }
  }

  /// Offer a request to the cache layer.
  pub async fn handle(&self, request: &Request) -> Intercept {
    if !request.is_fetchable() {
      debug!(scheme = request.scheme(), url = %request.url(), "Skipping unsupported scheme");
      return Intercept::Bypass;
    }

    let strategy = self.selector.classify(request);
    debug!(?strategy, url = %request.url(), "Classified request");
    Intercept::Respond(self.run(strategy, request).await)
  }

  /// Like [`handle`](Self::handle), but bypassed requests go straight to the network.
  pub async fn fetch(&self, request: &Request) -> Result<Served, FetchError> {
    match self.handle(request).await {
      Intercept::Respond(result) => result,
      Intercept::Bypass => {
        let response = self.fetcher.fetch(request).await?;
        Ok(Served {
          response,
          source: Source::Network,
          strategy: None,
        })
      }
    }
  }

  async fn run(&self, strategy: Strategy, request: &Request) -> Result<Served, FetchError> {
    let key = request.cache_key();
    let served = |response: Response, source: Source| Served {
      response,
      source,
      strategy: Some(strategy),
    };

    let mut step = match strategy {
      Strategy::DataFirst | Strategy::StaticFirst => Step::CheckCache,
      Strategy::NetworkFirst => Step::FetchNetwork,
    };

    loop {
      step = match step {
        Step::CheckCache => match self.lookup(strategy.role(), &key) {
          Some(response) => Step::Done(Ok(served(response, Source::Cache))),
          None => Step::FetchNetwork,
        },

        Step::FetchNetwork => match self.fetcher.fetch(request).await {
          Ok(response) if response.is_success() => Step::StoreThenReturn(response),
          // Resolved but unsuccessful: hand it back untouched, never cache it
          Ok(response) => Step::Done(Ok(served(response, Source::Network))),
          Err(e) => match strategy {
            Strategy::DataFirst => {
              warn!(url = %request.url(), error = %e, "Data unavailable, serving offline response");
              Step::Done(Ok(served(Response::offline(), Source::Offline)))
            }
            Strategy::StaticFirst => {
              error!(url = %request.url(), error = %e, "Fetch failed for static asset");
              Step::Done(Err(FetchError::Network(e)))
            }
            Strategy::NetworkFirst => Step::CacheFallback(e),
          },
        },

        Step::StoreThenReturn(response) => {
          self.store_in_background(strategy.role(), key.clone(), response.clone());
          Step::Done(Ok(served(response, Source::Network)))
        }

        Step::CacheFallback(cause) => match self.lookup(strategy.role(), &key) {
          Some(response) => Step::Done(Ok(served(response, Source::Cache))),
          None => Step::Done(Err(FetchError::Unresolvable {
            url: key.clone(),
            cause,
          })),
        },

        Step::Done(result) => return result,
      };
    }
  }

  fn namespace(&self, role: Role) -> &Namespace {
    match role {
      Role::Static => &self.static_ns,
      Role::Data => &self.data_ns,
    }
  }

  /// Search the role's namespace first, then the version's other namespace.
  /// Read failures count as a miss.
  fn lookup(&self, role: Role, key: &str) -> Option<Response> {
    let other = match role {
      Role::Static => Role::Data,
      Role::Data => Role::Static,
    };

    for namespace in [self.namespace(role), self.namespace(other)] {
      match self.store.match_entry(namespace, key) {
        Ok(Some(entry)) => {
          debug!(key, namespace = namespace.name(), cached_at = %entry.cached_at, "Cache hit");
          return Some(entry.response);
        }
        Ok(None) => {}
        Err(e) => {
          warn!(key, namespace = namespace.name(), error = %e, "Cache read failed, treating as miss");
        }
      }
    }

    debug!(key, "Cache miss");
    None
  }

  /// Persist without holding up the response. Errors are only logged.
  fn store_in_background(&self, role: Role, key: String, response: Response) {
    let store = Arc::clone(&self.store);
    let namespace = self.namespace(role).clone();

    let handle = tokio::task::spawn_blocking(move || {
      if let Err(e) = store.put(&namespace, &key, &response) {
        error!(key = %key, namespace = namespace.name(), error = %e, "Failed to cache response");
      }
    });

    match self.pending.lock() {
      Ok(mut pending) => {
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
      }
      Err(e) => warn!(error = %e, "Pending-write list poisoned; write left untracked"),
    }
  }

  /// Wait for every background cache write started so far.
  pub async fn settle(&self) {
    let handles = match self.pending.lock() {
      Ok(mut pending) => std::mem::take(&mut *pending),
      Err(_) => return,
    };

    for handle in handles {
      if let Err(e) = handle.await {
        warn!(error = %e, "Background cache write panicked");
      }
    }
  }
}
