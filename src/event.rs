use tokio::sync::mpsc;

use crate::catalog::Category;

/// Notifications from the data layer to whatever renders it
#[derive(Debug, Clone, PartialEq)]
pub enum DataEvent {
  /// New items were appended to a category feed
  PageAppended { category: Category, appended: usize },
  /// A fetch failed; previously loaded items are still valid
  LoadFailed { category: Category, message: String },
  /// All derived state was wiped
  CacheCleared { reason: String },
}

pub type EventSender = mpsc::UnboundedSender<DataEvent>;

/// Receiving end of the data event channel
pub struct EventHandler {
  tx: EventSender,
  rx: mpsc::UnboundedReceiver<DataEvent>,
}

impl EventHandler {
  pub fn new() -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    Self { tx, rx }
  }

  pub fn sender(&self) -> EventSender {
    self.tx.clone()
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<DataEvent> {
    self.rx.recv().await
  }

  /// Drain whatever is queued without waiting.
  pub fn drain(&mut self) -> Vec<DataEvent> {
    let mut events = Vec::new();
    while let Ok(event) = self.rx.try_recv() {
      events.push(event);
    }
    events
  }
}

impl Default for EventHandler {
  fn default() -> Self {
    Self::new()
  }
}

/// Send an event if anyone is listening; a closed channel is not an error.
pub fn notify(events: Option<&EventSender>, event: DataEvent) {
  if let Some(tx) = events {
    let _ = tx.send(event);
  }
}
