//! One versioned instance of the cache worker.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::{CacheStore, FetchOrchestrator, Namespace};
use crate::config::{CacheConfig, Config};
use crate::network::Fetcher;
use crate::request::Request;
use crate::response::Response;

/// Background sync tag that refreshes every hymnal document.
pub const SYNC_UPDATE_DATA: &str = "update-hymnal-data";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Installing,
  Installed,
  Activating,
  Active,
  /// Replaced by a newer active version
  Superseded,
  /// Install failed, or displaced while waiting; never promoted
  Redundant,
}

impl fmt::Display for WorkerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      WorkerState::Installing => "installing",
      WorkerState::Installed => "installed",
      WorkerState::Activating => "activating",
      WorkerState::Active => "active",
      WorkerState::Superseded => "superseded",
      WorkerState::Redundant => "redundant",
    };
    f.write_str(name)
  }
}

/// Installs, activates and serves one cache version.
pub struct Worker<S, F> {
  cache: CacheConfig,
  origin: Url,
  store: Arc<S>,
  fetcher: Arc<F>,
  state: WorkerState,
  skip_waiting: bool,
  orchestrator: FetchOrchestrator<S, F>,
}

impl<S, F> Worker<S, F>
where
  S: CacheStore + 'static,
  F: Fetcher + 'static,
{
  pub fn new(config: &Config, store: Arc<S>, fetcher: Arc<F>) -> Result<Self> {
    let origin = config.origin_url()?;
    let orchestrator =
      FetchOrchestrator::new(&config.cache, Arc::clone(&store), Arc::clone(&fetcher));

    Ok(Self {
      cache: config.cache.clone(),
      origin,
      store,
      fetcher,
      state: WorkerState::Installing,
      skip_waiting: false,
      orchestrator,
    })
  }

  pub fn version(&self) -> &str {
    &self.cache.version
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  pub fn orchestrator(&self) -> &FetchOrchestrator<S, F> {
    &self.orchestrator
  }

  /// This version's namespace identifiers.
  pub fn namespaces(&self) -> [String; 2] {
    [self.cache.static_namespace(), self.cache.data_namespace()]
  }

  /// Whether a previous run already installed this version.
  pub fn is_installed_in_store(&self) -> Result<bool> {
    let existing = self.store.namespaces()?;
    Ok(self.namespaces().iter().all(|n| existing.contains(n)))
  }

  /// Ask to be activated without waiting for controlled pages to close.
  pub fn skip_waiting(&mut self) {
    self.skip_waiting = true;
  }

  pub fn skip_waiting_requested(&self) -> bool {
    self.skip_waiting
  }

  /// Pre-populate both namespaces from the manifests.
  ///
  /// Every manifest resource is fetched before anything is written, so a
  /// failed fetch leaves the store untouched. On failure the worker becomes
  /// redundant and must not be activated.
  pub async fn install(&mut self) -> Result<()> {
    self.state = WorkerState::Installing;
    info!(version = self.version(), "Installing");

    match self.populate().await {
      Ok(()) => {
        self.state = WorkerState::Installed;
        if self.cache.skip_waiting_on_install {
          self.skip_waiting();
        }
        info!(version = self.version(), "Installed");
        Ok(())
      }
      Err(e) => {
        self.state = WorkerState::Redundant;
        error!(version = self.version(), error = %e, "Cache installation failed");
        Err(e)
      }
    }
  }

  async fn populate(&self) -> Result<()> {
    let (static_entries, data_entries) = futures::try_join!(
      self.fetch_manifest(&self.cache.static_assets),
      self.fetch_manifest(&self.cache.data_assets),
    )?;

    let existed = self.store.namespaces()?;
    let static_ns = Namespace::new(&self.cache.static_namespace());
    let data_ns = Namespace::new(&self.cache.data_namespace());

    self.store.put_all(&static_ns, &static_entries)?;
    if let Err(e) = self.store.put_all(&data_ns, &data_entries) {
      // Drop the half of this install that did land, unless it predates us
      if !existed.contains(static_ns.name()) {
        if let Err(cleanup) = self.store.delete(static_ns.name()) {
          warn!(namespace = static_ns.name(), error = %cleanup, "Failed to roll back namespace");
        }
      }
      return Err(e);
    }

    Ok(())
  }

  async fn fetch_manifest(&self, paths: &[String]) -> Result<Vec<(String, Response)>> {
    let requests = paths
      .iter()
      .map(|p| Request::resolve(&self.origin, p))
      .collect::<Result<Vec<_>, _>>()?;

    futures::future::try_join_all(requests.iter().map(|r| self.fetch_required(r))).await
  }

  async fn fetch_required(&self, request: &Request) -> Result<(String, Response)> {
    let response = self
      .fetcher
      .fetch(request)
      .await
      .map_err(|e| eyre!("Failed to fetch manifest resource {}: {}", request.url(), e))?;

    if !response.is_success() {
      return Err(eyre!(
        "Manifest resource {} returned status {}",
        request.url(),
        response.status
      ));
    }

    Ok((request.cache_key(), response))
  }

  /// Delete every namespace that is not one of this version's.
  ///
  /// Returns the deleted namespace names.
  pub fn activate(&mut self) -> Result<Vec<String>> {
    if !matches!(self.state, WorkerState::Installed | WorkerState::Activating) {
      return Err(eyre!(
        "Cannot activate version {} from state {}",
        self.version(),
        self.state
      ));
    }

    self.state = WorkerState::Activating;
    info!(version = self.version(), "Activating");

    let keep: BTreeSet<String> = self.namespaces().into_iter().collect();
    let mut deleted = Vec::new();

    for name in self.store.namespaces()? {
      if keep.contains(&name) {
        continue;
      }
      if self.store.delete(&name)? {
        info!(namespace = %name, "Deleted stale cache namespace");
        deleted.push(name);
      }
    }

    self.state = WorkerState::Active;
    Ok(deleted)
  }

  /// Treat namespaces left by a previous run as this worker's install.
  pub(crate) fn mark_installed(&mut self) {
    debug!(version = self.version(), "Reusing installed namespaces");
    self.state = WorkerState::Installed;
  }

  pub(crate) fn supersede(&mut self) {
    self.state = WorkerState::Superseded;
  }

  /// A newer install took this worker's waiting slot.
  pub(crate) fn discard(&mut self) {
    self.state = WorkerState::Redundant;
  }

  /// Handle a background sync event. Returns how many documents were refreshed.
  ///
  /// Failures are logged, never returned: the cached copies stay valid.
  pub async fn sync(&self, tag: &str) -> usize {
    if tag != SYNC_UPDATE_DATA {
      debug!(tag, "Ignoring unknown sync tag");
      return 0;
    }

    let data_ns = Namespace::new(&self.cache.data_namespace());
    let mut refreshed = 0;

    for path in &self.cache.data_assets {
      let request = match Request::resolve(&self.origin, path) {
        Ok(request) => request,
        Err(e) => {
          warn!(path = %path, error = %e, "Skipping unresolvable data asset");
          continue;
        }
      };

      match self.fetcher.fetch(&request).await {
        Ok(response) if response.status == 200 => {
          match self.store.put(&data_ns, &request.cache_key(), &response) {
            Ok(()) => refreshed += 1,
            Err(e) => warn!(url = %request.url(), error = %e, "Background update failed"),
          }
        }
        Ok(response) => {
          debug!(url = %request.url(), status = response.status, "Background update skipped")
        }
        Err(e) => warn!(url = %request.url(), error = %e, "Background update failed"),
      }
    }

    info!(refreshed, "Hymnal data updated in background");
    refreshed
  }
}
