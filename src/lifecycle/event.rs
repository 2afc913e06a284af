use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::worker::WorkerState;

/// Identifies one open foreground page.
pub type ClientId = u64;

/// Messages a page can post to the worker.
///
/// Wire shape: `{ "type": "SKIP_WAITING" }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
  /// Activate the waiting version now instead of when every page closes
  SkipWaiting,
}

/// Signals surfaced to foreground pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
  /// A worker moved to a new lifecycle state
  StateChanged { version: String, state: WorkerState },
  /// A new version finished installing while an older one controls open pages.
  /// Pages show an update banner and may answer with `SKIP_WAITING`.
  UpdateFound { version: String },
  /// Install aborted; the previous version stays in charge
  InstallFailed { version: String, reason: String },
  /// A page is now served by `version`
  ControllerChanged { client: ClientId, version: String },
}

/// Receiving end of lifecycle events.
pub struct EventStream {
  rx: mpsc::UnboundedReceiver<LifecycleEvent>,
}

impl EventStream {
  pub(crate) fn channel() -> (mpsc::UnboundedSender<LifecycleEvent>, Self) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, Self { rx })
  }

  /// Everything emitted so far, without waiting.
  pub fn drain(&mut self) -> Vec<LifecycleEvent> {
    let mut events = Vec::new();
    while let Ok(event) = self.rx.try_recv() {
      events.push(event);
    }
    events
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_skip_waiting_wire_shape() {
    let msg: ClientMessage = serde_json::from_str(r#"{ "type": "SKIP_WAITING" }"#).unwrap();
    assert_eq!(msg, ClientMessage::SkipWaiting);
    assert_eq!(serde_json::to_string(&msg).unwrap(), r#"{"type":"SKIP_WAITING"}"#);
  }

  #[test]
  fn test_unknown_message_rejected() {
    assert!(serde_json::from_str::<ClientMessage>(r#"{ "type": "CLAIM" }"#).is_err());
  }

  #[tokio::test]
  async fn test_drain_collects_in_order() {
    let (tx, mut stream) = EventStream::channel();
    tx.send(LifecycleEvent::UpdateFound {
      version: "v2".to_string(),
    })
    .unwrap();
    tx.send(LifecycleEvent::ControllerChanged {
      client: 1,
      version: "v2".to_string(),
    })
    .unwrap();

    let events = stream.drain();
    assert_eq!(events.len(), 2);
    assert!(matches!(events[0], LifecycleEvent::UpdateFound { .. }));
    assert!(stream.drain().is_empty());
  }
}
