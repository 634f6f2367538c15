use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Put,
    Delete,
}

/// One committed mutation of the store.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub seq: u64,
    pub event_type: EventType,
    pub key: String,
    /// The stored bytes for a put, `None` for a delete.
    pub value: Option<Vec<u8>>,
}

/// Broadcasts every store mutation, numbered in commit order.
///
/// Nothing is retained: a subscriber that falls more than `capacity` events
/// behind gets `RecvError::Lagged` and is expected to relist.
#[derive(Clone)]
pub struct ChangeFeed {
    inner: Arc<Mutex<u64>>,
    sender: broadcast::Sender<WatchEvent>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(Mutex::new(0)),
            sender,
        }
    }

    /// Number and send one event. Returns its sequence number.
    pub fn publish(&self, event_type: EventType, key: &str, value: Option<&[u8]>) -> u64 {
        // Held across the send so receivers see sequence numbers in order.
        let mut seq = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        *seq += 1;
        let event = WatchEvent {
            seq: *seq,
            event_type,
            key: key.to_string(),
            value: value.map(<[u8]>::to_vec),
        };
        // No receivers is fine
        let _ = self.sender.send(event);
        *seq
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.sender.subscribe()
    }
}
