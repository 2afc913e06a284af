//! Registration: which worker version is active, which is waiting, and which pages they control.

use std::collections::BTreeMap;

use color_eyre::{eyre::eyre, Result};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::event::{ClientId, ClientMessage, EventStream, LifecycleEvent};
use super::worker::{Worker, WorkerState};
use crate::cache::{CacheStore, FetchOrchestrator};
use crate::network::Fetcher;

/// Holds at most one active and one waiting worker.
///
/// Every method takes `&mut self`, so an activation sweep (enumerate, then
/// delete) never interleaves with another lifecycle step.
pub struct Registration<S, F> {
  active: Option<Worker<S, F>>,
  waiting: Option<Worker<S, F>>,
  /// Open pages and the version serving each (None = uncontrolled)
  clients: BTreeMap<ClientId, Option<String>>,
  next_client: ClientId,
  events: mpsc::UnboundedSender<LifecycleEvent>,
}

impl<S, F> Registration<S, F>
where
  S: CacheStore + 'static,
  F: Fetcher + 'static,
{
  pub fn new() -> (Self, EventStream) {
    let (events, stream) = EventStream::channel();
    let registration = Self {
      active: None,
      waiting: None,
      clients: BTreeMap::new(),
      next_client: 1,
      events,
    };
    (registration, stream)
  }

  pub fn active(&self) -> Option<&Worker<S, F>> {
    self.active.as_ref()
  }

  pub fn waiting(&self) -> Option<&Worker<S, F>> {
    self.waiting.as_ref()
  }

  /// The orchestrator serving intercepted requests, if any version is active.
  pub fn controller(&self) -> Option<&FetchOrchestrator<S, F>> {
    self.active.as_ref().map(|w| w.orchestrator())
  }

  /// An installed version is waiting for activation.
  pub fn pending_update(&self) -> bool {
    self.waiting.is_some()
  }

  fn emit(&self, event: LifecycleEvent) {
    if self.events.send(event).is_err() {
      debug!("No listener for lifecycle events");
    }
  }

  fn emit_state(&self, worker: &Worker<S, F>) {
    self.emit(LifecycleEvent::StateChanged {
      version: worker.version().to_string(),
      state: worker.state(),
    });
  }

  /// Open a page. It is controlled by the active version, if there is one.
  pub fn connect(&mut self) -> ClientId {
    let id = self.next_client;
    self.next_client += 1;
    let controller = self.active.as_ref().map(|w| w.version().to_string());
    self.clients.insert(id, controller);
    id
  }

  /// Close a page. Once no page is served by the active version, a waiting
  /// version takes over.
  pub fn disconnect(&mut self, client: ClientId) -> Result<()> {
    self.clients.remove(&client);

    if self.waiting.is_some() && !self.has_controlled_clients() {
      info!("All controlled pages closed, activating waiting version");
      self.activate_waiting()?;
    }
    Ok(())
  }

  /// Version currently serving `client`.
  pub fn controller_of(&self, client: ClientId) -> Option<&str> {
    self.clients.get(&client).and_then(|v| v.as_deref())
  }

  fn has_controlled_clients(&self) -> bool {
    let Some(active) = &self.active else {
      return false;
    };
    self
      .clients
      .values()
      .any(|v| v.as_deref() == Some(active.version()))
  }

  /// Activate a version a previous run already installed, skipping install.
  ///
  /// Returns false when the version's namespaces are not in the store.
  pub fn resume(&mut self, mut worker: Worker<S, F>) -> Result<bool> {
    if !worker.is_installed_in_store()? {
      return Ok(false);
    }
    worker.mark_installed();
    self.waiting = Some(worker);
    self.activate_waiting()?;
    Ok(true)
  }

  /// Install `worker`, then activate it now or leave it waiting.
  ///
  /// On install failure the previous active version stays in charge.
  pub async fn register(&mut self, mut worker: Worker<S, F>) -> Result<()> {
    if self.active.as_ref().map(|w| w.version()) == Some(worker.version()) {
      debug!(version = worker.version(), "Version already active, nothing to install");
      return Ok(());
    }

    self.emit_state(&worker);
    if let Err(e) = worker.install().await {
      self.emit(LifecycleEvent::InstallFailed {
        version: worker.version().to_string(),
        reason: e.to_string(),
      });
      self.emit_state(&worker);
      return Err(e);
    }
    self.emit_state(&worker);

    let controlled = self.has_controlled_clients();
    if controlled {
      self.emit(LifecycleEvent::UpdateFound {
        version: worker.version().to_string(),
      });
    }

    let activate_now = !controlled || worker.skip_waiting_requested();
    if let Some(mut replaced) = self.waiting.replace(worker) {
      info!(version = replaced.version(), "Waiting version replaced by a newer install");
      replaced.discard();
      self.emit_state(&replaced);
    }

    if activate_now {
      self.activate_waiting()?;
    } else {
      info!("New version installed, waiting for controlled pages to close");
    }
    Ok(())
  }

  /// Handle a message posted by a page.
  pub fn post_message(&mut self, message: ClientMessage) -> Result<()> {
    match message {
      ClientMessage::SkipWaiting => match self.waiting.as_mut() {
        Some(worker) => {
          worker.skip_waiting();
          self.activate_waiting()
        }
        None => {
          debug!("SKIP_WAITING with no waiting version");
          Ok(())
        }
      },
    }
  }

  /// Forward a background sync event to the active version.
  pub async fn sync(&self, tag: &str) -> Result<usize> {
    let active = self
      .active
      .as_ref()
      .ok_or_else(|| eyre!("No active version to run sync '{}'", tag))?;
    Ok(active.sync(tag).await)
  }

  /// Promote the waiting worker: sweep stale namespaces, supersede the old
  /// version and claim every open page.
  fn activate_waiting(&mut self) -> Result<()> {
    let Some(mut worker) = self.waiting.take() else {
      return Ok(());
    };

    self.emit(LifecycleEvent::StateChanged {
      version: worker.version().to_string(),
      state: WorkerState::Activating,
    });

    let deleted = match worker.activate() {
      Ok(deleted) => deleted,
      Err(e) => {
        self.waiting = Some(worker);
        return Err(e);
      }
    };
    debug!(?deleted, "Activation sweep finished");

    let version = worker.version().to_string();
    if let Some(mut old) = self.active.replace(worker) {
      old.supersede();
      self.emit_state(&old);
    }
    if let Some(active) = &self.active {
      self.emit_state(active);
    }

    // Claim open pages without a reload
    let mut claimed = Vec::with_capacity(self.clients.len());
    for (client, controller) in self.clients.iter_mut() {
      *controller = Some(version.clone());
      claimed.push(*client);
    }
    for client in claimed {
      self.emit(LifecycleEvent::ControllerChanged {
        client,
        version: version.clone(),
      });
    }

    info!(version = %version, "Activated");
    Ok(())
  }
}
