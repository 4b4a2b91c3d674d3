//! Per-service subscription task.
//!
//! ```text
//! Subscribing ──ok──▶ Subscribed ──half timeout──▶ Renewing ──ok──▶ Subscribed
//!      ▲                   │                           │
//!      └──── cool-down ◀───┴────────── error ──────────┘
//! ```
//!
//! Cancellation can interrupt any wait. The task then unregisters its SID
//! and sends a best-effort UNSUBSCRIBE before it exits.

use std::convert::Infallible;
use std::sync::{Arc, Weak};
use std::time::Duration;

use callback_server::EventRouter;
use soap_client::SoapClient;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EventConfig;
use crate::manager::{EventManager, SubscriptionTarget};

pub(crate) struct SubscriptionWorker {
    pub(crate) target: SubscriptionTarget,
    pub(crate) soap: SoapClient,
    pub(crate) router: Arc<EventRouter>,
    pub(crate) config: EventConfig,
    pub(crate) manager: Weak<EventManager>,
    pub(crate) token: CancellationToken,
}

impl SubscriptionWorker {
    pub(crate) async fn run(self) {
        let mut sid: Option<String> = None;

        loop {
            let error = tokio::select! {
                _ = self.token.cancelled() => break,
                result = self.session(&mut sid) => match result {
                    Err(error) => error,
                    Ok(never) => match never {},
                },
            };

            warn!(
                service = %self.target.friendly_name,
                error = %error,
                cooldown = ?self.config.retry_cooldown,
                "Event subscription failed"
            );
            if let Some(old) = sid.take() {
                self.router.unregister(&old).await;
            }
            if let Some(manager) = self.manager.upgrade() {
                manager.clear_events(&self.target.uid);
            }

            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = tokio::time::sleep(self.config.retry_cooldown) => {}
            }
        }

        self.cleanup(sid).await;
    }

    /// Subscribe, then renew forever. Only returns on error.
    async fn session(&self, sid: &mut Option<String>) -> soap_client::Result<Infallible> {
        let requested = self.config.requested_timeout_secs();
        info!(
            service = %self.target.friendly_name,
            callback = %self.target.callback_url,
            "Subscribing to events"
        );

        let response = self
            .soap
            .subscribe(&self.target.event_url, &self.target.callback_url, requested)
            .await?;
        // Cleanup only unsubscribes a SID recorded here, so record it before registering.
        *sid = Some(response.sid.clone());
        self.router.register(&response.sid, &self.target.uid).await;
        info!(service = %self.target.friendly_name, sid = %response.sid, "Subscribed");

        let mut current = response.sid;
        let mut granted = response.timeout_seconds;
        loop {
            tokio::time::sleep(renewal_delay(granted)).await;

            let renewed = self
                .soap
                .renew_subscription(&self.target.event_url, &current, requested)
                .await?;
            if renewed.sid != current {
                self.router.rekey(&current, &renewed.sid).await;
                *sid = Some(renewed.sid.clone());
                current = renewed.sid;
            }
            granted = renewed.timeout_seconds;
            debug!(service = %self.target.friendly_name, sid = %current, granted, "Renewed");
        }
    }

    async fn cleanup(&self, sid: Option<String>) {
        let Some(sid) = sid else {
            debug!(service = %self.target.friendly_name, "Subscription task cancelled");
            return;
        };

        self.router.unregister(&sid).await;
        match self.soap.unsubscribe(&self.target.event_url, &sid).await {
            Ok(()) => info!(service = %self.target.friendly_name, sid = %sid, "Unsubscribed"),
            Err(e) => debug!(service = %self.target.friendly_name, error = %e, "UNSUBSCRIBE failed"),
        }
    }
}

/// Renew at half the granted timeout, never more often than once a second.
pub(crate) fn renewal_delay(granted_seconds: u32) -> Duration {
    Duration::from_millis(u64::from(granted_seconds) * 500).max(Duration::from_secs(1))
}
