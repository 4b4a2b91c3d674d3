//! HTTP server for receiving GENA event notifications.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, UdpSocket};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use warp::Filter;

use crate::config::CallbackServerConfig;
use crate::error::{CallbackServerError, Result};
use crate::router::{EventRouter, NotificationPayload};

/// HTTP callback server for receiving event notifications.
///
/// A single listener serves every subscription in the process. Devices are
/// handed a callback URL built from the local address they can reach us on
/// (see [`CallbackServer::callback_url`]) and the server resolves each
/// notification's SID through its [`EventRouter`].
///
/// # Example
///
/// ```no_run
/// use tokio::sync::mpsc;
/// use callback_server::{CallbackServer, CallbackServerConfig, NotificationPayload};
///
/// #[tokio::main]
/// async fn main() -> callback_server::Result<()> {
///     let (tx, mut rx) = mpsc::unbounded_channel::<NotificationPayload>();
///     let server = CallbackServer::new(CallbackServerConfig::default(), tx).await?;
///
///     println!("Listening at {}", server.base_url());
///
///     while let Some(notification) = rx.recv().await {
///         println!("Event for {}", notification.service_id);
///     }
///     Ok(())
/// }
/// ```
pub struct CallbackServer {
    port: u16,
    path: String,
    base_url: String,
    event_router: Arc<EventRouter>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    server_handle: Option<tokio::task::JoinHandle<()>>,
}

impl CallbackServer {
    /// Bind the listener on the first free port of the configured range and
    /// start serving.
    ///
    /// Fails only if no port can be bound.
    pub async fn new(
        config: CallbackServerConfig,
        event_sender: mpsc::UnboundedSender<NotificationPayload>,
    ) -> Result<Self> {
        let (start, end) = config.port_range;
        let port = Self::find_available_port(start, end)
            .ok_or(CallbackServerError::NoAvailablePort { start, end })?;

        let local_ip = Self::detect_local_ip().unwrap_or_else(|| {
            warn!("Could not detect a routable local address, advertising loopback");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        });

        let event_router = Arc::new(EventRouter::new(event_sender));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let routes = notify_route(config.path.clone(), Arc::clone(&event_router));
        let (addr, server) = warp::serve(routes)
            .try_bind_with_graceful_shutdown(SocketAddr::new(config.bind_addr, port), async move {
                shutdown_rx.recv().await;
            })
            .map_err(|e| CallbackServerError::StartupFailed(e.to_string()))?;

        let server_handle = tokio::spawn(server);
        let base_url = format!("http://{}", SocketAddr::new(local_ip, port));
        info!(%addr, path = %config.path, "Callback server listening");

        Ok(Self {
            port,
            path: config.path,
            base_url,
            event_router,
            shutdown_tx: Some(shutdown_tx),
            server_handle: Some(server_handle),
        })
    }

    /// `http://<local_ip>:<port>` using the default-route interface.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full callback URL for a device that reaches us through `local_ip`.
    pub fn callback_url(&self, local_ip: IpAddr) -> String {
        format!("http://{}{}", SocketAddr::new(local_ip, self.port), self.path)
    }

    /// Get the port the server is bound to.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The process-wide SID map.
    pub fn router(&self) -> &Arc<EventRouter> {
        &self.event_router
    }

    /// Shutdown the callback server gracefully, waiting for in-flight
    /// requests to finish.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }

        if let Some(handle) = self.server_handle.take() {
            handle
                .await
                .map_err(|e| CallbackServerError::StartupFailed(e.to_string()))?;
        }

        debug!(port = self.port, "Callback server stopped");
        Ok(())
    }

    /// Find an available port in the given range.
    fn find_available_port(start: u16, end: u16) -> Option<u16> {
        (start..=end).find(|&port| Self::is_port_available(port))
    }

    /// Check if a port is available for binding.
    fn is_port_available(port: u16) -> bool {
        TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)).is_ok()
    }

    /// Local address on the default route.
    fn detect_local_ip() -> Option<IpAddr> {
        local_ip_for(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8))).ok()
    }
}

/// Local interface address used to reach `peer`.
///
/// Connects an unbound UDP socket towards the peer and reads back the local
/// address the OS picked. No datagram is sent.
pub fn local_ip_for(peer: IpAddr) -> Result<IpAddr> {
    let unspecified = match peer {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED),
    };
    let socket = UdpSocket::bind(SocketAddr::new(unspecified, 0))
        .map_err(|_| CallbackServerError::LocalIpUnavailable)?;
    socket
        .connect(SocketAddr::new(peer, 9))
        .map_err(|_| CallbackServerError::LocalIpUnavailable)?;
    socket
        .local_addr()
        .map(|addr| addr.ip())
        .map_err(|_| CallbackServerError::LocalIpUnavailable)
}

/// Any method on the callback path. Devices send NOTIFY, but nothing is
/// gained by turning other methods away.
fn notify_route(
    path: String,
    router: Arc<EventRouter>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = std::convert::Infallible> + Clone {
    warp::method()
        .and(warp::path::full())
        .and(warp::header::optional::<String>("sid"))
        .and(warp::body::bytes())
        .and_then(
            move |method: warp::http::Method,
                  full_path: warp::path::FullPath,
                  sid: Option<String>,
                  body: bytes::Bytes| {
                let router = Arc::clone(&router);
                let path = path.clone();
                async move {
                    if !path_matches(&path, full_path.as_str()) {
                        return Err(warp::reject::not_found());
                    }

                    let sid = sid.ok_or_else(|| {
                        debug!(%method, "Notification without SID header");
                        warp::reject::custom(MissingSid)
                    })?;

                    let event_xml = String::from_utf8_lossy(&body).into_owned();
                    trace!(%method, sid = %sid, bytes = body.len(), "Notification received");

                    if !router.route_event(sid.clone(), event_xml).await {
                        debug!(sid = %sid, "Notification for unknown SID ignored");
                    }

                    Ok::<_, warp::Rejection>(warp::reply::with_status(
                        "",
                        warp::http::StatusCode::OK,
                    ))
                }
            },
        )
        .recover(handle_rejection)
}

fn path_matches(expected: &str, actual: &str) -> bool {
    let normalize = |p: &str| p.trim_end_matches('/').to_string();
    normalize(expected) == normalize(actual)
}

/// Rejection for notifications without a SID header.
#[derive(Debug)]
struct MissingSid;

impl warp::reject::Reject for MissingSid {}

/// Handle rejections and convert them to HTTP responses.
async fn handle_rejection(
    err: warp::Rejection,
) -> std::result::Result<impl warp::Reply, std::convert::Infallible> {
    let (code, message) = if err.is_not_found() {
        (warp::http::StatusCode::NOT_FOUND, "Not found")
    } else if err.find::<MissingSid>().is_some() {
        (warp::http::StatusCode::BAD_REQUEST, "Missing SID header")
    } else {
        (
            warp::http::StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error",
        )
    };

    Ok(warp::reply::with_status(message, code))
}
