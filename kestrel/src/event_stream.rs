//! # Event Stream
//!
//! Process-wide publish/subscribe bus for runtime events and user events.
//!
//! Every subscription owns an unbounded flume queue drained by its own tokio
//! task. `publish` only enqueues, so it never waits on a callback, a slow
//! subscriber never delays another, and each subscriber observes events in
//! publish order. Delivery across subscribers is unordered.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use kestrel_api::message::Payload;
use tracing::{trace, warn};

/// Token returned by [`EventStream::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

#[derive(Default)]
struct StreamInner {
    subscribers: DashMap<SubscriptionId, flume::Sender<Payload>>,
    next_id: AtomicU64,
}

/// Cloneable handle to a shared event bus.
#[derive(Clone, Default)]
pub struct EventStream {
    inner: Arc<StreamInner>,
}

impl EventStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` for every event published from now on.
    ///
    /// Must be called from within a tokio runtime. A panicking callback is
    /// logged and keeps its subscription.
    pub fn subscribe<F>(&self, mut callback: F) -> SubscriptionId
    where
        F: FnMut(&Payload) + Send + 'static,
    {
        let (id, rx) = self.attach();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv_async().await {
                if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| callback(&event))) {
                    warn!(
                        subscription = %id,
                        reason = %panic_message(panic.as_ref()),
                        "event subscriber panicked"
                    );
                }
            }
            trace!(subscription = %id, "event subscription closed");
        });
        id
    }

    /// Registers a raw queue for every event published from now on. The
    /// caller drains it; dropping the receiver does not unsubscribe.
    pub(crate) fn attach(&self) -> (SubscriptionId, flume::Receiver<Payload>) {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (tx, rx) = flume::unbounded::<Payload>();
        self.inner.subscribers.insert(id, tx);
        (id, rx)
    }

    /// Removes a subscription. Events already queued for it are still
    /// delivered. Returns `false` for unknown tokens.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.subscribers.remove(&id).is_some()
    }

    /// Delivers `event` to every subscriber present at the time of the call.
    pub fn publish(&self, event: Payload) {
        let senders: Vec<_> = self
            .inner
            .subscribers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        for sender in senders {
            // A closed queue means the subscription was just removed.
            let _ = sender.send(event.clone());
        }
    }

    /// Current subscriber count.
    pub fn len(&self) -> usize {
        self.inner.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.subscribers.is_empty()
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("subscribers", &self.len())
            .finish()
    }
}

/// Renders a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "Unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_ten_subscribers_observe_once() {
        let stream = EventStream::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let ids: Vec<_> = (0..10)
            .map(|n| {
                let tx = tx.clone();
                stream.subscribe(move |event| {
                    if let Some(text) = event.downcast_ref::<&str>() {
                        let _ = tx.send((n, text.to_string()));
                    }
                })
            })
            .collect();
        assert_eq!(stream.len(), 10);

        stream.publish(Arc::new("foo"));

        let mut seen = Vec::new();
        for _ in 0..10 {
            let (n, text) = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(text, "foo");
            seen.push(n);
        }
        seen.sort();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());

        // Nothing delivered twice.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());

        for id in ids {
            assert!(stream.unsubscribe(id));
        }
        assert_eq!(stream.len(), 0);
        assert!(stream.is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_token() {
        let stream = EventStream::new();
        let id = stream.subscribe(|_| {});
        assert!(stream.unsubscribe(id));
        assert!(!stream.unsubscribe(id));
    }

    #[tokio::test]
    async fn test_subscriber_sees_publish_order() {
        let stream = EventStream::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        stream.subscribe(move |event| {
            if let Some(n) = event.downcast_ref::<u32>() {
                let _ = tx.send(*n);
            }
        });

        for n in 0..100u32 {
            stream.publish(Arc::new(n));
        }
        for expected in 0..100u32 {
            assert_eq!(rx.recv().await, Some(expected));
        }
    }

    #[tokio::test]
    async fn test_panicking_subscriber_keeps_running() {
        let stream = EventStream::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        stream.subscribe(move |event| {
            let n = *event.downcast_ref::<u32>().unwrap();
            if n == 0 {
                panic!("first event");
            }
            let _ = tx.send(n);
        });

        stream.publish(Arc::new(0u32));
        stream.publish(Arc::new(1u32));
        let n = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert_eq!(n, Some(1));
    }
}
