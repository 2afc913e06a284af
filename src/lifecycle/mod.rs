//! Worker lifecycle: install, activate, supersede.
//!
//! A new version pre-populates its namespaces from the manifests, waits while
//! an older version controls open pages (unless told to skip waiting), then
//! deletes every namespace that is not its own and claims the open pages.

mod event;
mod registration;
mod worker;

pub use event::{ClientId, ClientMessage, EventStream, LifecycleEvent};
pub use registration::Registration;
pub use worker::{Worker, WorkerState, SYNC_UPDATE_DATA};
