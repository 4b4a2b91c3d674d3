//! Event routing for HTTP callback notifications.
//!
//! Notifications arrive keyed only by SID. The `EventRouter` holds the
//! process-wide SID → service map that turns them back into something the
//! subscription manager can dispatch on.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, trace};

/// A notification resolved to the service that owns its subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationPayload {
    /// The subscription ID from the SID header
    pub subscription_id: String,
    /// Uid of the service the SID is registered to
    pub service_id: String,
    /// The raw event body
    pub event_xml: String,
}

/// Routes events from HTTP callbacks to a channel.
///
/// Cloning is cheap; clones share the same map and channel.
#[derive(Clone)]
pub struct EventRouter {
    /// SID → service uid
    subscriptions: Arc<RwLock<HashMap<String, String>>>,
    event_sender: mpsc::UnboundedSender<NotificationPayload>,
}

impl EventRouter {
    /// Create a new event router.
    ///
    /// # Example
    ///
    /// ```
    /// use tokio::sync::mpsc;
    /// use callback_server::router::{EventRouter, NotificationPayload};
    ///
    /// let (tx, mut rx) = mpsc::unbounded_channel::<NotificationPayload>();
    /// let router = EventRouter::new(tx);
    /// ```
    pub fn new(event_sender: mpsc::UnboundedSender<NotificationPayload>) -> Self {
        Self {
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            event_sender,
        }
    }

    /// Map `subscription_id` to `service_id`, replacing any previous owner.
    ///
    /// ```
    /// # use tokio::sync::mpsc;
    /// # use callback_server::router::{EventRouter, NotificationPayload};
    /// # #[tokio::main]
    /// # async fn main() {
    /// # let (tx, _rx) = mpsc::unbounded_channel::<NotificationPayload>();
    /// # let router = EventRouter::new(tx);
    /// router.register("uuid:sid-1", "uuid:dev::urn:schemas-upnp-org:service:AVTransport:1").await;
    /// assert!(router.resolve("uuid:sid-1").await.is_some());
    /// # }
    /// ```
    pub async fn register(&self, subscription_id: impl Into<String>, service_id: impl Into<String>) {
        let subscription_id = subscription_id.into();
        let service_id = service_id.into();
        trace!(sid = %subscription_id, service = %service_id, "SID registered");
        self.subscriptions
            .write()
            .await
            .insert(subscription_id, service_id);
    }

    /// Remove a SID. Returns the service it belonged to.
    pub async fn unregister(&self, subscription_id: &str) -> Option<String> {
        self.subscriptions.write().await.remove(subscription_id)
    }

    /// Move a registration to a new SID, as after a renewal that issued a
    /// different id. Returns `false` if `old` was not registered.
    pub async fn rekey(&self, old: &str, new: impl Into<String>) -> bool {
        let mut subs = self.subscriptions.write().await;
        match subs.remove(old) {
            Some(service_id) => {
                let new = new.into();
                debug!(old_sid = %old, new_sid = %new, service = %service_id, "SID re-keyed");
                subs.insert(new, service_id);
                true
            }
            None => false,
        }
    }

    /// Remove every SID owned by `service_id`. Returns how many were removed.
    pub async fn unregister_service(&self, service_id: &str) -> usize {
        let mut subs = self.subscriptions.write().await;
        let before = subs.len();
        subs.retain(|_, owner| owner != service_id);
        before - subs.len()
    }

    /// Service uid registered for `subscription_id`.
    pub async fn resolve(&self, subscription_id: &str) -> Option<String> {
        self.subscriptions.read().await.get(subscription_id).cloned()
    }

    /// Number of registered SIDs.
    pub async fn len(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.subscriptions.read().await.is_empty()
    }

    /// Route an incoming event to the channel.
    ///
    /// Returns `false` without sending anything when the SID is unknown.
    pub async fn route_event(&self, subscription_id: String, event_xml: String) -> bool {
        let service_id = match self.resolve(&subscription_id).await {
            Some(service_id) => service_id,
            None => return false,
        };

        let payload = NotificationPayload {
            subscription_id,
            service_id,
            event_xml,
        };

        // Receiver gone means the manager is shutting down
        let _ = self.event_sender.send(payload);
        true
    }
}
