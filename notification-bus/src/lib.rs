//! Named-signal publish/subscribe bus.
//!
//! The bus decouples the layers of the SDK: the SSDP engine publishes device
//! lifecycle signals without knowing who builds device trees, and the tree
//! builder publishes "detection completed" without knowing who consumes it.
//!
//! A bus is an ordinary value. The composition root creates one per seam and
//! hands an `Arc` to each subsystem, so tests can build isolated buses.
//!
//! # Example
//!
//! ```
//! use notification_bus::NotificationBus;
//!
//! #[derive(Debug, Clone, PartialEq, Eq, Hash)]
//! enum Signal {
//!     Ping,
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus: NotificationBus<Signal, String> = NotificationBus::new();
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//!
//! bus.subscribe(Signal::Ping, move |payload: String| {
//!     let tx = tx.clone();
//!     async move {
//!         let _ = tx.send(payload);
//!     }
//! });
//!
//! bus.publish(&Signal::Ping, "hello".to_string());
//! assert_eq!(rx.recv().await.as_deref(), Some("hello"));
//! # }
//! ```

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use tracing::{trace, warn};

/// Type-erased async signal handler.
pub type Handler<P> = Arc<dyn Fn(P) -> BoxFuture<'static, ()> + Send + Sync>;

/// Token returned by [`NotificationBus::subscribe`], used to unsubscribe.
///
/// Closures cannot be compared, so handlers are identified by the id the bus
/// assigned them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Register mapping a signal to the handlers interested in it.
pub struct NotificationBus<S, P> {
    handlers: RwLock<HashMap<S, Vec<(HandlerId, Handler<P>)>>>,
    next_id: AtomicU64,
}

impl<S, P> NotificationBus<S, P>
where
    S: Eq + Hash + Clone + Debug,
    P: Clone + Send + 'static,
{
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `handler` for `signal`.
    ///
    /// The same closure may be registered several times; each registration
    /// gets its own [`HandlerId`] and is invoked once per publish.
    pub fn subscribe<F, Fut>(&self, signal: S, handler: F) -> HandlerId
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handler: Handler<P> = Arc::new(move |payload| handler(payload).boxed());

        trace!(signal = ?signal, handler = id.0, "handler subscribed");
        self.handlers
            .write()
            .entry(signal)
            .or_default()
            .push((id, handler));
        id
    }

    /// Remove a handler. Returns `false` if it was not registered for `signal`.
    pub fn unsubscribe(&self, signal: &S, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        let Some(list) = handlers.get_mut(signal) else {
            return false;
        };

        let before = list.len();
        list.retain(|(handler_id, _)| *handler_id != id);
        let removed = list.len() != before;

        if list.is_empty() {
            handlers.remove(signal);
        }
        removed
    }

    /// Schedule every handler registered for `signal` with a clone of `payload`.
    ///
    /// Each handler is called here, in publish order, and the future it
    /// returns runs as an independent tokio task; this call never waits for
    /// those. A handler needing ordered delivery does its work in the call
    /// itself. Returns the number of handlers scheduled.
    pub fn publish(&self, signal: &S, payload: P) -> usize {
        // Snapshot so no lock is held while handlers are spawned.
        let handlers: Vec<Handler<P>> = match self.handlers.read().get(signal) {
            Some(list) => list.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => return 0,
        };

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(signal = ?signal, "publish outside of a tokio runtime, dropping signal");
                return 0;
            }
        };

        trace!(signal = ?signal, handlers = handlers.len(), "publishing");
        for handler in &handlers {
            runtime.spawn(handler(payload.clone()));
        }
        handlers.len()
    }

    /// Number of handlers currently registered for `signal`.
    pub fn handler_count(&self, signal: &S) -> usize {
        self.handlers.read().get(signal).map_or(0, Vec::len)
    }
}

impl<S, P> Default for NotificationBus<S, P>
where
    S: Eq + Hash + Clone + Debug,
    P: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    enum TestSignal {
        Alpha,
        Beta,
    }

    fn forwarding_handler(
        tx: mpsc::UnboundedSender<u32>,
    ) -> impl Fn(u32) -> BoxFuture<'static, ()> + Send + Sync {
        move |value| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(value);
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = NotificationBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe(TestSignal::Alpha, forwarding_handler(tx));

        assert_eq!(bus.publish(&TestSignal::Alpha, 7), 1);
        let value = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(value, Some(7));
    }

    #[tokio::test]
    async fn test_publish_only_reaches_matching_signal() {
        let bus = NotificationBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe(TestSignal::Alpha, forwarding_handler(tx));

        assert_eq!(bus.publish(&TestSignal::Beta, 1), 0);
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_every_handler_receives_payload() {
        let bus = NotificationBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe(TestSignal::Alpha, forwarding_handler(tx.clone()));
        bus.subscribe(TestSignal::Alpha, forwarding_handler(tx));

        assert_eq!(bus.publish(&TestSignal::Alpha, 3), 2);
        assert_eq!(rx.recv().await, Some(3));
        assert_eq!(rx.recv().await, Some(3));
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let bus = NotificationBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = bus.subscribe(TestSignal::Alpha, forwarding_handler(tx));

        assert!(bus.unsubscribe(&TestSignal::Alpha, id));
        assert!(!bus.unsubscribe(&TestSignal::Alpha, id));
        assert_eq!(bus.handler_count(&TestSignal::Alpha), 0);

        assert_eq!(bus.publish(&TestSignal::Alpha, 9), 0);
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_does_not_wait_for_handlers() {
        let bus: NotificationBus<TestSignal, u32> = NotificationBus::new();
        bus.subscribe(TestSignal::Alpha, |_| async {
            std::future::pending::<()>().await;
        });

        // Would hang if publish awaited the handler.
        let scheduled = timeout(Duration::from_millis(100), async {
            bus.publish(&TestSignal::Alpha, 1)
        })
        .await
        .unwrap();
        assert_eq!(scheduled, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_handler_calls_follow_publish_order() {
        let bus = NotificationBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        for signal in [TestSignal::Alpha, TestSignal::Beta] {
            let tx = tx.clone();
            bus.subscribe(signal, move |value: u32| {
                let _ = tx.send(value);
                std::future::ready(())
            });
        }

        for value in 0..100 {
            let signal = if value % 2 == 0 {
                TestSignal::Alpha
            } else {
                TestSignal::Beta
            };
            bus.publish(&signal, value);
        }
        for expected in 0..100 {
            assert_eq!(rx.recv().await, Some(expected));
        }
    }

    #[test]
    fn test_publish_without_runtime_is_dropped() {
        let bus = NotificationBus::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        bus.subscribe(TestSignal::Alpha, forwarding_handler(tx));

        assert_eq!(bus.publish(&TestSignal::Alpha, 1), 0);
    }
}
