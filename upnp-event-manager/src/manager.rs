//! Subscription bookkeeping and notification dispatch.

use std::collections::HashMap;
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;

use callback_server::{CallbackServer, EventRouter, NotificationPayload};
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use soap_client::SoapClient;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::EventConfig;
use crate::error::{EventManagerError, Result};
use crate::event::{parse_last_change, Event};
use crate::worker::SubscriptionWorker;

/// Callback receiving the events updated by one notification.
pub type EventCallback = Arc<dyn Fn(HashMap<String, Event>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Where and how to subscribe for one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionTarget {
    /// Stable service uid, the key of every map in this crate
    pub uid: String,
    /// Absolute eventSubURL
    pub event_url: String,
    /// Absolute callback URL handed to the device
    pub callback_url: String,
    /// Human readable name for logs
    pub friendly_name: String,
}

struct RunningTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Callbacks of one service and the events they are owed.
type Delivery = (Vec<EventCallback>, HashMap<String, Event>);

struct ServiceEntry {
    target: SubscriptionTarget,
    callbacks: Vec<EventCallback>,
    events: HashMap<String, Event>,
    task: Option<RunningTask>,
    deliveries: mpsc::UnboundedSender<Delivery>,
}

impl ServiceEntry {
    /// Create an entry with its own delivery task.
    ///
    /// Callbacks of one service run in notification order; a slow callback
    /// only delays its own service. The task ends once the entry is dropped
    /// and the queue is drained.
    fn new(target: SubscriptionTarget) -> Self {
        let (deliveries, mut rx) = mpsc::unbounded_channel::<Delivery>();
        let service = target.friendly_name.clone();
        tokio::spawn(async move {
            while let Some((callbacks, events)) = rx.recv().await {
                for callback in callbacks {
                    callback(events.clone()).await;
                }
            }
            trace!(service = %service, "Delivery queue closed");
        });

        Self {
            target,
            callbacks: Vec::new(),
            events: HashMap::new(),
            task: None,
            deliveries,
        }
    }
}

/// Event subscription manager.
///
/// Holds one subscription task per service uid, no matter how many callbacks
/// are registered for it.
pub struct EventManager {
    services: DashMap<String, ServiceEntry>,
    router: Arc<EventRouter>,
    soap: SoapClient,
    config: EventConfig,
    callback_port: u16,
    callback_server: Mutex<Option<CallbackServer>>,
    dispatcher: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl EventManager {
    /// Bind the callback listener and start dispatching notifications.
    pub async fn start(config: EventConfig) -> Result<Arc<Self>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let server = CallbackServer::new(config.callback.clone(), tx).await?;
        info!(port = server.port(), path = server.path(), "Event manager started");

        let manager = Arc::new(Self {
            services: DashMap::new(),
            router: Arc::clone(server.router()),
            soap: SoapClient::with_timeout(config.http_timeout),
            callback_port: server.port(),
            config,
            callback_server: Mutex::new(Some(server)),
            dispatcher: parking_lot::Mutex::new(None),
        });
        manager.spawn_dispatcher(rx);
        Ok(manager)
    }

    /// Build a manager around an existing router, without a listener.
    ///
    /// Notifications must then be fed through
    /// [`handle_notification`](Self::handle_notification).
    pub fn with_router(config: EventConfig, router: Arc<EventRouter>) -> Arc<Self> {
        Arc::new(Self {
            services: DashMap::new(),
            router,
            soap: SoapClient::with_timeout(config.http_timeout),
            callback_port: config.callback.port_range.0,
            config,
            callback_server: Mutex::new(None),
            dispatcher: parking_lot::Mutex::new(None),
        })
    }

    /// Callback URL for a device that reaches this host through `local_ip`.
    pub fn callback_url(&self, local_ip: IpAddr) -> String {
        format!(
            "http://{}{}",
            std::net::SocketAddr::new(local_ip, self.callback_port),
            self.config.callback.path
        )
    }

    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    /// Register `callback` for the service described by `target`.
    ///
    /// The first callback for a uid starts its subscription task; later ones
    /// share it.
    pub fn subscribe<F, Fut>(self: &Arc<Self>, target: SubscriptionTarget, callback: F)
    where
        F: Fn(HashMap<String, Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let callback: EventCallback = Arc::new(move |events| callback(events).boxed());
        let uid = target.uid.clone();

        let mut entry = self
            .services
            .entry(uid.clone())
            .or_insert_with(|| ServiceEntry::new(target.clone()));
        entry.callbacks.push(callback);

        if entry.task.is_none() {
            entry.target = target.clone();
            entry.task = Some(self.spawn_worker(target));
            debug!(service = %uid, "Subscription task started");
        } else {
            trace!(service = %uid, callbacks = entry.callbacks.len(), "Callback added");
        }
    }

    /// Cancel the subscription for `uid` and wait for its task to finish.
    ///
    /// All callbacks and cached events for the service are dropped. The
    /// task's best-effort UNSUBSCRIBE has completed (or failed) when this
    /// returns.
    pub async fn unsubscribe(&self, uid: &str) -> Result<()> {
        let (_, entry) = self
            .services
            .remove(uid)
            .ok_or_else(|| EventManagerError::UnknownService(uid.to_string()))?;

        if let Some(task) = entry.task {
            task.token.cancel();
            if let Err(e) = task.handle.await {
                if !e.is_cancelled() {
                    warn!(service = %uid, error = %e, "Subscription task ended abnormally");
                }
            }
        }
        self.router.unregister_service(uid).await;
        debug!(service = %uid, "Unsubscribed");
        Ok(())
    }

    /// Apply a resolved notification and queue it for the service's callbacks.
    ///
    /// Returns once the cached events are updated; the callbacks run on the
    /// service's delivery task. Unknown services and bodies without changes
    /// are ignored.
    pub async fn handle_notification(&self, payload: NotificationPayload) {
        let changes = match parse_last_change(&payload.event_xml) {
            Ok(changes) if changes.is_empty() => {
                trace!(sid = %payload.subscription_id, "Notification without LastChange");
                return;
            }
            Ok(changes) => changes,
            Err(e) => {
                debug!(sid = %payload.subscription_id, error = %e, "Dropping notification");
                return;
            }
        };

        let Some(mut entry) = self.services.get_mut(&payload.service_id) else {
            debug!(service = %payload.service_id, "Notification for unsubscribed service");
            return;
        };

        let mut updated = HashMap::new();
        for (name, value) in changes {
            let event = entry
                .events
                .entry(name.clone())
                .or_insert_with(|| Event::new(name.clone()));
            event.update(value);
            updated.insert(name, event.clone());
        }

        trace!(service = %payload.service_id, variables = updated.len(), "Dispatching events");
        if entry.deliveries.send((entry.callbacks.clone(), updated)).is_err() {
            warn!(service = %payload.service_id, "Delivery task gone, dropping events");
        }
    }

    /// Latest known value of every variable of a service.
    pub fn events(&self, uid: &str) -> HashMap<String, Event> {
        self.services
            .get(uid)
            .map(|entry| entry.events.clone())
            .unwrap_or_default()
    }

    /// Number of services with a subscription task.
    pub fn active_subscriptions(&self) -> usize {
        self.services
            .iter()
            .filter(|entry| {
                entry
                    .task
                    .as_ref()
                    .is_some_and(|task| !task.handle.is_finished())
            })
            .count()
    }

    pub fn is_subscribed(&self, uid: &str) -> bool {
        self.services.contains_key(uid)
    }

    /// Cancel every subscription and stop the listener.
    pub async fn shutdown(&self) {
        let uids: Vec<String> = self.services.iter().map(|entry| entry.key().clone()).collect();
        for uid in uids {
            let _ = self.unsubscribe(&uid).await;
        }

        if let Some(handle) = self.dispatcher.lock().take() {
            handle.abort();
        }
        if let Some(server) = self.callback_server.lock().await.take() {
            if let Err(e) = server.shutdown().await {
                warn!(error = %e, "Callback server shutdown failed");
            }
        }
        info!("Event manager stopped");
    }

    pub(crate) fn clear_events(&self, uid: &str) {
        if let Some(mut entry) = self.services.get_mut(uid) {
            entry.events.clear();
        }
    }

    fn spawn_worker(self: &Arc<Self>, target: SubscriptionTarget) -> RunningTask {
        let token = CancellationToken::new();
        let worker = SubscriptionWorker {
            target,
            soap: self.soap.clone(),
            router: Arc::clone(&self.router),
            config: self.config.clone(),
            manager: Arc::downgrade(self),
            token: token.clone(),
        };
        RunningTask {
            token,
            handle: tokio::spawn(worker.run()),
        }
    }

    fn spawn_dispatcher(self: &Arc<Self>, mut rx: mpsc::UnboundedReceiver<NotificationPayload>) {
        let manager = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.handle_notification(payload).await;
            }
        });
        *self.dispatcher.lock() = Some(handle);
    }
}
