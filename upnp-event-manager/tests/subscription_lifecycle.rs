//! Subscription tasks against a mock device.
//!
//! These run in real time with short timeouts; renewals are driven by the
//! `TIMEOUT` the mock grants.

use std::collections::HashMap;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use callback_server::{CallbackServerConfig, EventRouter, NotificationPayload};
use mockito::{Server, ServerGuard};
use tokio::sync::mpsc;
use upnp_event_manager::{Event, EventConfig, EventManager, SubscriptionTarget};

const UID: &str = "uuid:RINCON_1::urn:schemas-upnp-org:service:AVTransport:1";

async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

fn manager(cooldown: Duration) -> (Arc<EventManager>, Arc<EventRouter>) {
    let (tx, _rx) = mpsc::unbounded_channel();
    let router = Arc::new(EventRouter::new(tx));
    let config = EventConfig::default()
        .with_retry_cooldown(cooldown)
        .with_http_timeout(Duration::from_secs(2));
    (EventManager::with_router(config, Arc::clone(&router)), router)
}

fn target(server: &ServerGuard, uid: &str, path: &str) -> SubscriptionTarget {
    SubscriptionTarget {
        uid: uid.to_string(),
        event_url: format!("{}{path}", server.url()),
        callback_url: "http://127.0.0.1:8444/events/".to_string(),
        friendly_name: "Kitchen:AVTransport".to_string(),
    }
}

fn last_change(state: &str) -> String {
    format!(
        r#"<e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0"><e:property><LastChange>&lt;Event&gt;&lt;InstanceID val="0"&gt;&lt;TransportState val="{state}"/&gt;&lt;/InstanceID&gt;&lt;/Event&gt;</LastChange></e:property></e:propertyset>"#
    )
}

fn forwarding_callback(
    tx: mpsc::UnboundedSender<HashMap<String, Event>>,
) -> impl Fn(HashMap<String, Event>) -> std::future::Ready<()> + Send + Sync + 'static {
    move |events| {
        let _ = tx.send(events);
        std::future::ready(())
    }
}

#[tokio::test]
async fn test_two_callbacks_share_one_subscription() {
    let mut server = Server::new_async().await;
    let subscribe = server
        .mock("SUBSCRIBE", "/evt")
        .match_header("nt", "upnp:event")
        .with_status(200)
        .with_header("SID", "uuid:a")
        .with_header("TIMEOUT", "Second-1800")
        .expect(1)
        .create_async()
        .await;

    let (manager, router) = manager(Duration::from_secs(60));
    let (tx, mut rx) = mpsc::unbounded_channel();
    manager.subscribe(target(&server, UID, "/evt"), forwarding_callback(tx.clone()));
    manager.subscribe(target(&server, UID, "/evt"), forwarding_callback(tx));

    let routes = &router;
    assert!(eventually(move || async move { routes.resolve("uuid:a").await.is_some() }).await);
    assert_eq!(manager.active_subscriptions(), 1);

    manager
        .handle_notification(NotificationPayload {
            subscription_id: "uuid:a".to_string(),
            service_id: UID.to_string(),
            event_xml: last_change("PLAYING"),
        })
        .await;

    for _ in 0..2 {
        let events = rx.recv().await.unwrap();
        assert_eq!(events["TransportState"].value.as_deref(), Some("PLAYING"));
    }
    subscribe.assert_async().await;
    manager.shutdown().await;
}

#[tokio::test]
async fn test_renewal_with_new_sid_rekeys_router() {
    let mut server = Server::new_async().await;
    server
        .mock("SUBSCRIBE", "/evt")
        .match_header("nt", "upnp:event")
        .with_status(200)
        .with_header("SID", "uuid:a")
        .with_header("TIMEOUT", "Second-2")
        .create_async()
        .await;
    let renew = server
        .mock("SUBSCRIBE", "/evt")
        .match_header("sid", "uuid:a")
        .with_status(200)
        .with_header("SID", "uuid:b")
        .with_header("TIMEOUT", "Second-10")
        .create_async()
        .await;

    let (manager, router) = manager(Duration::from_secs(60));
    manager.subscribe(target(&server, UID, "/evt"), |_| async {});

    let routes = &router;
    assert!(eventually(move || async move { routes.resolve("uuid:b").await.is_some() }).await);
    assert_eq!(router.resolve("uuid:a").await, None);
    assert_eq!(router.resolve("uuid:b").await.as_deref(), Some(UID));
    renew.assert_async().await;

    manager.shutdown().await;
}

#[tokio::test]
async fn test_failed_subscribe_retries_after_cooldown() {
    let mut server = Server::new_async().await;
    let failing = server
        .mock("SUBSCRIBE", "/evt")
        .with_status(500)
        .expect_at_least(2)
        .create_async()
        .await;

    let (manager, router) = manager(Duration::from_millis(100));
    manager.subscribe(target(&server, UID, "/evt"), |_| async {});

    let mock = &failing;
    assert!(eventually(move || async move { mock.matched_async().await }).await);
    assert!(router.is_empty().await);
    assert!(manager.is_subscribed(UID));

    manager.shutdown().await;
}

#[tokio::test]
async fn test_unsubscribe_sends_unsubscribe_and_clears_routes() {
    const OTHER: &str = "uuid:RINCON_1::urn:schemas-upnp-org:service:RenderingControl:1";

    let mut server = Server::new_async().await;
    for (path, sid) in [("/avt", "uuid:a"), ("/rc", "uuid:r")] {
        server
            .mock("SUBSCRIBE", path)
            .match_header("nt", "upnp:event")
            .with_status(200)
            .with_header("SID", sid)
            .with_header("TIMEOUT", "Second-1800")
            .create_async()
            .await;
    }
    let unsubscribe = server
        .mock("UNSUBSCRIBE", "/avt")
        .match_header("sid", "uuid:a")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let (manager, router) = manager(Duration::from_secs(60));
    manager.subscribe(target(&server, UID, "/avt"), |_| async {});
    manager.subscribe(target(&server, OTHER, "/rc"), |_| async {});
    let routes = &router;
    assert!(eventually(move || async move { routes.len().await == 2 }).await);
    assert_eq!(manager.active_subscriptions(), 2);

    manager.unsubscribe(UID).await.unwrap();
    unsubscribe.assert_async().await;
    assert_eq!(router.resolve("uuid:a").await, None);
    assert!(!manager.is_subscribed(UID));

    manager.unsubscribe(OTHER).await.unwrap();
    assert!(router.is_empty().await);
    assert_eq!(manager.active_subscriptions(), 0);
}

#[tokio::test]
async fn test_notify_reaches_callback_through_listener() {
    let mut server = Server::new_async().await;
    server
        .mock("SUBSCRIBE", "/evt")
        .match_header("nt", "upnp:event")
        .with_status(200)
        .with_header("SID", "uuid:live")
        .with_header("TIMEOUT", "Second-1800")
        .create_async()
        .await;

    let config = EventConfig::default().with_callback(
        CallbackServerConfig::default()
            .with_port_range(53_000, 53_100)
            .with_bind_addr(IpAddr::V4(Ipv4Addr::LOCALHOST)),
    );
    let manager = EventManager::start(config).await.unwrap();
    let callback_url = manager.callback_url(IpAddr::V4(Ipv4Addr::LOCALHOST));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut subscription = target(&server, UID, "/evt");
    subscription.callback_url = callback_url.clone();
    manager.subscribe(subscription, forwarding_callback(tx));

    let router = Arc::clone(manager.router());
    let routes = &router;
    assert!(eventually(move || async move { routes.resolve("uuid:live").await.is_some() }).await);

    let response = reqwest::Client::new()
        .request(reqwest::Method::from_bytes(b"NOTIFY").unwrap(), &callback_url)
        .header("SID", "uuid:live")
        .header("NT", "upnp:event")
        .header("NTS", "upnp:propchange")
        .body(last_change("TRANSITIONING"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let events = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        events["TransportState"].value.as_deref(),
        Some("TRANSITIONING")
    );

    manager.shutdown().await;
}
