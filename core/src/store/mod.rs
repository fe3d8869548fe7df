//! Remote message store collaborator
//!
//! The store is append-only: `append` returns the assigned id, and
//! `subscribe` delivers an ordered stream of records for one room, either as
//! a full snapshot or as incremental additions.
pub mod local;

pub use local::LocalStore;

use crate::chat_types::{MessageRecord, MessageWrite};
use crate::error::Result;
use futures_util::future::BoxFuture;
use tokio::sync::mpsc;

/// Default number of most recent records a subscription carries
pub const DEFAULT_SUBSCRIBE_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Ascending by `created_at` when true
    pub ascending: bool,
    pub limit: usize,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            ascending: true,
            limit: DEFAULT_SUBSCRIBE_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Records added since the previous callback
    Incremental,
    /// The complete current result set
    Snapshot,
}

/// One `onChange` callback worth of records
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamUpdate {
    pub records: Vec<MessageRecord>,
    pub mode: DeliveryMode,
    /// Served without a live round-trip confirmation
    pub from_cache: bool,
}

impl StreamUpdate {
    pub fn incremental(records: Vec<MessageRecord>) -> Self {
        Self {
            records,
            mode: DeliveryMode::Incremental,
            from_cache: false,
        }
    }

    pub fn snapshot(records: Vec<MessageRecord>) -> Self {
        Self {
            records,
            mode: DeliveryMode::Snapshot,
            from_cache: false,
        }
    }

    pub fn cached(mut self) -> Self {
        self.from_cache = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Update(StreamUpdate),
    Error(String),
}

type Unsubscribe = Box<dyn FnOnce() + Send>;

/// Releases a subscription exactly once, on `release` or drop
pub struct SubscriptionGuard {
    unsubscribe: Option<Unsubscribe>,
}

impl SubscriptionGuard {
    pub fn new(unsubscribe: impl FnOnce() + Send + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    pub fn release(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Live subscription: an event receiver plus the guard that tears it down
pub struct StoreSubscription {
    pub events: mpsc::UnboundedReceiver<StreamEvent>,
    guard: SubscriptionGuard,
}

impl StoreSubscription {
    pub fn new(
        events: mpsc::UnboundedReceiver<StreamEvent>,
        unsubscribe: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            events,
            guard: SubscriptionGuard::new(unsubscribe),
        }
    }

    /// Separate the receiver from the guard so they can live in different owners
    pub fn split(self) -> (mpsc::UnboundedReceiver<StreamEvent>, SubscriptionGuard) {
        (self.events, self.guard)
    }

    pub fn unsubscribe(self) {
        let (mut events, mut guard) = self.split();
        guard.release();
        events.close();
    }
}

pub trait MessageStore: Send + Sync {
    /// Append a record, resolving to the store-assigned id
    fn append(&self, write: MessageWrite) -> BoxFuture<'static, Result<String>>;

    /// Subscribe to one room's records
    fn subscribe(&self, room_id: &str, options: SubscribeOptions) -> Result<StoreSubscription>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_subscription_unsubscribes_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (_tx, rx) = mpsc::unbounded_channel();
        let counter = calls.clone();
        let sub = StoreSubscription::new(rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        sub.unsubscribe();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_split_guard_releases_on_drop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (_tx, rx) = mpsc::unbounded_channel();
        let counter = calls.clone();
        let sub = StoreSubscription::new(rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let (_events, guard) = sub.split();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        drop(guard);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscription_unsubscribes_on_drop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (_tx, rx) = mpsc::unbounded_channel();
        let counter = calls.clone();
        {
            let _sub = StoreSubscription::new(rx, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
