//! Service nodes of a device tree.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tracing::{debug, trace};
use upnp_event_manager::{Event, EventManager, EventManagerError, SubscriptionTarget};
use xmltree::Element;

use crate::av_transport::AvTransport;
use crate::description::{short_type_name, ServiceDescription};
use crate::device::RootDevice;
use crate::error::{Result, SdkError};

/// Callback for one state variable.
pub type VariableCallback = Arc<dyn Fn(Event) -> BoxFuture<'static, ()> + Send + Sync>;

/// A service offered by one device of a tree.
///
/// Control and event URLs are resolved against the root's current location
/// on every use, so a device that moves keeps working once its services have
/// been resubscribed.
pub struct Service {
    description: ServiceDescription,
    short_type: String,
    node: usize,
    root: Weak<RootDevice>,
    subscribed: AtomicBool,
    callbacks: Mutex<HashMap<String, Vec<VariableCallback>>>,
}

impl Service {
    pub(crate) fn new(description: ServiceDescription, node: usize, root: Weak<RootDevice>) -> Self {
        Self {
            short_type: short_type_name(&description.service_type).to_string(),
            description,
            node,
            root,
            subscribed: AtomicBool::new(false),
            callbacks: Mutex::new(HashMap::new()),
        }
    }

    pub fn service_type(&self) -> &str {
        &self.description.service_type
    }

    /// `AVTransport` for `urn:schemas-upnp-org:service:AVTransport:1`.
    pub fn short_type(&self) -> &str {
        &self.short_type
    }

    pub fn service_id(&self) -> Option<&str> {
        self.description.service_id.as_deref()
    }

    /// Stable identity used by the subscription manager: `"{usn}:{serviceType}"`.
    pub fn uid(&self) -> Result<String> {
        Ok(format!("{}:{}", self.root()?.usn(), self.service_type()))
    }

    /// `"{device friendly name}:{short type}"`, for logs.
    pub fn friendly_name(&self) -> Result<String> {
        let root = self.root()?;
        let device = root
            .device(self.node)
            .map(|device| device.friendly_name().to_string())
            .unwrap_or_default();
        Ok(format!("{device}:{}", self.short_type))
    }

    pub fn control_url(&self) -> Result<String> {
        self.root()?.resolve(&self.description.control_url)
    }

    pub fn event_url(&self) -> Result<String> {
        self.root()?.resolve(&self.description.event_sub_url)
    }

    /// Whether an event subscription is held for this service.
    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::SeqCst)
    }

    /// Variables with at least one callback.
    pub fn watched_variables(&self) -> Vec<String> {
        self.callbacks.lock().keys().cloned().collect()
    }

    /// Typed view when this is an AVTransport service.
    pub fn as_av_transport(self: &Arc<Self>) -> Option<AvTransport> {
        AvTransport::new(Arc::clone(self))
    }

    /// Invoke a SOAP action on this service and return its response element.
    pub async fn invoke(&self, action: &str, args: &[(&str, &str)]) -> Result<Element> {
        let root = self.root()?;
        let control_url = root.resolve(&self.description.control_url)?;
        trace!(service = %self.short_type, action, "Invoking action");
        Ok(root
            .soap()
            .call(&control_url, self.service_type(), action, args)
            .await?)
    }

    /// Call `callback` whenever `variable` is reported by an event.
    ///
    /// The first callback on a service starts its event subscription; every
    /// later one, for any variable, shares it.
    pub fn subscribe<F, Fut>(self: &Arc<Self>, variable: impl Into<String>, callback: F) -> Result<()>
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let root = self.root()?;
        let variable = variable.into();
        let callback: VariableCallback = Arc::new(move |event| callback(event).boxed());
        self.callbacks
            .lock()
            .entry(variable.clone())
            .or_default()
            .push(Arc::clone(&callback));

        if !self.subscribed.swap(true, Ordering::SeqCst) {
            if let Err(e) = self.start_subscription(&root) {
                self.subscribed.store(false, Ordering::SeqCst);
                self.forget_callback(&variable, &callback);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Drop the callbacks of one variable.
    ///
    /// The subscription ends with the last watched variable. Returns whether
    /// the variable had callbacks.
    pub async fn unsubscribe_variable(&self, variable: &str) -> Result<bool> {
        let (removed, now_empty) = {
            let mut callbacks = self.callbacks.lock();
            let removed = callbacks.remove(variable).is_some();
            (removed, callbacks.is_empty())
        };

        if now_empty && self.subscribed.swap(false, Ordering::SeqCst) {
            let root = self.root()?;
            end_subscription(root.events(), &self.uid()?).await;
        }
        Ok(removed)
    }

    /// Subscribe again from scratch, as after the device moved.
    ///
    /// Does nothing when no subscription is held.
    pub async fn resubscribe(self: &Arc<Self>) -> Result<()> {
        if !self.is_subscribed() {
            return Ok(());
        }
        let root = self.root()?;
        end_subscription(root.events(), &self.uid()?).await;
        self.start_subscription(&root)
    }

    /// End the subscription, if any, and forget every callback.
    pub(crate) async fn shutdown(&self, events: &EventManager, usn: &str) {
        self.callbacks.lock().clear();
        if self.subscribed.swap(false, Ordering::SeqCst) {
            end_subscription(events, &format!("{usn}:{}", self.service_type())).await;
        }
    }

    fn start_subscription(self: &Arc<Self>, root: &RootDevice) -> Result<()> {
        let target = SubscriptionTarget {
            uid: self.uid()?,
            event_url: root.resolve(&self.description.event_sub_url)?,
            callback_url: root.events().callback_url(root.local_ip()),
            friendly_name: self.friendly_name()?,
        };
        debug!(service = %target.friendly_name, url = %target.event_url, "Starting event subscription");

        let service = Arc::downgrade(self);
        root.events().subscribe(target, move |events| {
            let service = service.upgrade();
            async move {
                if let Some(service) = service {
                    service.dispatch(events).await;
                }
            }
        });
        Ok(())
    }

    async fn dispatch(&self, events: HashMap<String, Event>) {
        for (name, event) in events {
            let callbacks = self.callbacks.lock().get(&name).cloned().unwrap_or_default();
            for callback in callbacks {
                callback(event.clone()).await;
            }
        }
    }

    fn forget_callback(&self, variable: &str, callback: &VariableCallback) {
        let mut callbacks = self.callbacks.lock();
        if let Some(list) = callbacks.get_mut(variable) {
            list.retain(|existing| !Arc::ptr_eq(existing, callback));
            if list.is_empty() {
                callbacks.remove(variable);
            }
        }
    }

    fn root(&self) -> Result<Arc<RootDevice>> {
        self.root
            .upgrade()
            .ok_or_else(|| SdkError::DeviceGone(self.short_type.clone()))
    }
}

async fn end_subscription(events: &EventManager, uid: &str) {
    match events.unsubscribe(uid).await {
        Ok(()) | Err(EventManagerError::UnknownService(_)) => {}
        Err(e) => debug!(service = %uid, error = %e, "Unsubscribe failed"),
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("service_type", &self.description.service_type)
            .field("control_url", &self.description.control_url)
            .field("event_sub_url", &self.description.event_sub_url)
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}
