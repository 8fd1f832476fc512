use log::trace;
use tokio::sync::broadcast;
pub use vertocore::types::events::*;

// The default size of the broadcast channel buffer.
pub const CHANNEL_CAPACITY: usize = 100;

/// Fan-out of client events to any number of subscribers.
///
/// Dispatch never blocks. A subscriber that falls more than the channel capacity behind loses
/// the oldest events and sees `RecvError::Lagged` once; ordering of what it does receive is
/// preserved.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            sender: broadcast::channel(capacity.max(1)).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn dispatch(&self, event: Event) {
        if self.sender.send(event).is_err() {
            trace!(target: "Client", "Dropped event: no subscribers");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
