//! Socket ownership and the receive/search loops.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::DiscoveryConfig;
use crate::device::SsdpDevice;
use crate::error::{DiscoveryError, Result};
use crate::registry::{SsdpBus, SsdpRegistry};
use crate::ssdp::{self, SsdpMessage};

const RECV_BUFFER_SIZE: usize = 2048;

/// SSDP discovery engine.
///
/// Owns a socket joined to the multicast group (announcements and searches
/// from other control points) and an ephemeral unicast socket (our searches,
/// their responses, our announcements).
pub struct SsdpServer {
    config: DiscoveryConfig,
    registry: Arc<SsdpRegistry>,
    unicast: Mutex<Option<Arc<UdpSocket>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SsdpServer {
    pub fn new(config: DiscoveryConfig, bus: Arc<SsdpBus>) -> Self {
        let registry = SsdpRegistry::new(config.clone(), bus);
        Self {
            config,
            registry,
            unicast: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> &Arc<SsdpRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Bind both sockets and start receiving and searching.
    ///
    /// Failing to bind is the only fatal discovery error.
    pub async fn start(&self) -> Result<()> {
        let multicast = Arc::new(self.bind_multicast()?);

        let unicast_addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));
        let unicast = UdpSocket::bind(unicast_addr)
            .await
            .map_err(|source| DiscoveryError::Bind {
                addr: unicast_addr,
                source,
            })?;
        if let Err(e) = unicast.set_multicast_ttl_v4(2) {
            debug!(error = %e, "Could not set multicast TTL");
        }
        let unicast = Arc::new(unicast);

        info!(
            group = %self.config.group_addr(),
            local = ?unicast.local_addr().ok(),
            "SSDP discovery started"
        );

        self.registry.set_transport(Some(Arc::clone(&unicast)));
        *self.unicast.lock() = Some(Arc::clone(&unicast));

        let mut tasks = self.tasks.lock();
        tasks.push(self.spawn_receiver(multicast, "multicast"));
        tasks.push(self.spawn_receiver(Arc::clone(&unicast), "unicast"));
        tasks.push(self.spawn_search_loop(unicast));
        Ok(())
    }

    /// Send one M-SEARCH to the multicast group.
    ///
    /// Safe to call while responses to an earlier search are still arriving;
    /// duplicate responses just refresh registry entries. Fails when the
    /// engine is not running or the datagram could not be sent.
    pub async fn search(&self) -> Result<()> {
        let socket = self.unicast.lock().clone();
        let Some(socket) = socket else {
            return Err(DiscoveryError::NetworkError("discovery not started".to_string()));
        };
        send_search(&socket, &self.config)
            .await
            .map_err(|e| DiscoveryError::NetworkError(format!("M-SEARCH: {e}")))
    }

    /// Classify one datagram and apply it to the registry.
    pub async fn handle_datagram(&self, bytes: &[u8], source: SocketAddr) {
        handle_datagram(&self.registry, bytes, source).await;
    }

    /// Advertise a local device until it is unregistered or the server stops.
    pub fn advertise(&self, device: SsdpDevice) {
        self.registry.advertise(device);
    }

    /// Stop announcing a local device, or forget a remote one.
    pub fn unregister(&self, usn: &str) -> Option<SsdpDevice> {
        self.registry.unregister(usn)
    }

    /// Unregister every device and stop all loops.
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            task.abort();
        }
        *self.unicast.lock() = None;
        info!("SSDP discovery stopped");
    }

    fn bind_multicast(&self) -> Result<UdpSocket> {
        let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, self.config.port));
        let bind_err = |source| DiscoveryError::Bind { addr, source };

        let socket =
            Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(bind_err)?;
        // Other SSDP stacks on the host usually hold the port too.
        socket.set_reuse_address(true).map_err(bind_err)?;
        socket.set_nonblocking(true).map_err(bind_err)?;
        socket.bind(&addr.into()).map_err(bind_err)?;
        socket
            .join_multicast_v4(&self.config.multicast_addr, &Ipv4Addr::UNSPECIFIED)
            .map_err(bind_err)?;

        UdpSocket::from_std(socket.into()).map_err(bind_err)
    }

    fn spawn_receiver(&self, socket: Arc<UdpSocket>, label: &'static str) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            let mut buf = vec![0u8; RECV_BUFFER_SIZE];
            loop {
                match socket.recv_from(&mut buf).await {
                    Ok((len, source)) => handle_datagram(&registry, &buf[..len], source).await,
                    Err(e) => {
                        // ICMP errors surface here on some platforms.
                        debug!(socket = label, error = %e, "SSDP receive failed");
                    }
                }
            }
        })
    }

    fn spawn_search_loop(&self, socket: Arc<UdpSocket>) -> JoinHandle<()> {
        let config = self.config.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.search_interval);
            loop {
                ticker.tick().await;
                if let Err(e) = send_search(&socket, &config).await {
                    warn!(error = %e, "Failed to send M-SEARCH, will retry on next interval");
                }
            }
        })
    }
}

async fn send_search(socket: &UdpSocket, config: &DiscoveryConfig) -> std::io::Result<()> {
    let target = config.group_addr();
    let request = ssdp::search_request(
        &target.to_string(),
        &config.search_target,
        config.mx,
        &config.user_agent,
    );

    socket.send_to(request.as_bytes(), target).await?;
    trace!(st = %config.search_target, "M-SEARCH sent");
    Ok(())
}

async fn handle_datagram(registry: &Arc<SsdpRegistry>, bytes: &[u8], source: SocketAddr) {
    let text = String::from_utf8_lossy(bytes);
    let Some(message) = SsdpMessage::parse(&text) else {
        trace!(%source, "Dropping unrecognised datagram");
        return;
    };

    match message {
        SsdpMessage::SearchRequest(headers) => {
            trace!(%source, st = ?headers.st(), "M-SEARCH received");
            registry.answer_search(&headers, source).await;
        }
        SsdpMessage::Notify(headers) => match headers.nts() {
            Some("ssdp:alive") => registry.register(&headers, Some(source)),
            Some("ssdp:byebye") => match headers.usn() {
                Some(usn) => {
                    registry.unregister(usn);
                }
                None => debug!(%source, "byebye without USN"),
            },
            other => trace!(%source, nts = ?other, "Ignoring NOTIFY"),
        },
        SsdpMessage::SearchResponse(headers) => registry.register(&headers, Some(source)),
    }
}
