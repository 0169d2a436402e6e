//! Progress notification.
//!
//! Every journal event is handed to the engine's notifier right after it has
//! been appended and applied, so consumers see exactly what the journal holds.

use cairn_journal::JournalEvent;
use tokio::sync::mpsc;

/// Trait for receiving execution events.
///
/// Implementations decide what to do with them (stream to a UI, log,
/// forward to a message bus, ignore).
pub trait ExecutionNotifier: Send + Sync + 'static {
  fn notify(&self, event: &JournalEvent);
}

/// A no-op notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: &JournalEvent) {}
}

/// A notifier that sends events to an unbounded channel.
///
/// Unbounded so a slow consumer never stalls an orchestrator; the volume is a
/// handful of events per node.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<JournalEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<JournalEvent>) -> Self {
    Self { sender }
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: &JournalEvent) {
    // Receiver may have been dropped
    let _ = self.sender.send(event.clone());
  }
}
