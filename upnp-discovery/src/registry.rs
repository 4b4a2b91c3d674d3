//! Registry of known SSDP announcements.
//!
//! Each remote entry owns an expiry task armed for `max-age + grace`. Every
//! re-registration aborts that task and arms a new one, so a device that keeps
//! announcing never expires. Each arm gets a fresh generation number and the
//! expiry task only removes the entry if the generation still matches, which
//! covers the window where an old task has already woken up but not yet taken
//! the lock.
//!
//! Local entries own an announce task instead, which multicasts
//! `ssdp:alive` every `max-age / 2`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use notification_bus::NotificationBus;
use parking_lot::{Mutex, RwLock};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::DiscoveryConfig;
use crate::device::{Manifestation, SsdpDevice, SsdpSignal};
use crate::ssdp::{self, NotifySubtype, SsdpHeaders};

/// Bus carrying SSDP lifecycle signals.
pub type SsdpBus = NotificationBus<SsdpSignal, SsdpDevice>;

struct Entry {
    device: SsdpDevice,
    expires_at: Option<Instant>,
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl Entry {
    fn cancel_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// At most one live [`SsdpDevice`] per USN.
pub struct SsdpRegistry {
    entries: Mutex<HashMap<String, Entry>>,
    bus: Arc<SsdpBus>,
    config: DiscoveryConfig,
    transport: RwLock<Option<Arc<UdpSocket>>>,
    generation: AtomicU64,
}

impl SsdpRegistry {
    pub fn new(config: DiscoveryConfig, bus: Arc<SsdpBus>) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            bus,
            config,
            transport: RwLock::new(None),
            generation: AtomicU64::new(0),
        })
    }

    /// Socket used for announcements and search answers.
    ///
    /// Without one, outgoing frames are dropped with a debug log.
    pub fn set_transport(&self, socket: Option<Arc<UdpSocket>>) {
        *self.transport.write() = socket;
    }

    pub fn bus(&self) -> &Arc<SsdpBus> {
        &self.bus
    }

    /// Register or refresh a remote device from an alive/search-response
    /// header block.
    pub fn register(self: &Arc<Self>, headers: &SsdpHeaders, source: Option<SocketAddr>) {
        let Some(device) = SsdpDevice::from_headers(headers, source, self.config.default_max_age)
        else {
            debug!(?source, "Discarding announcement without USN or LOCATION");
            return;
        };

        let signal = {
            let mut entries = self.entries.lock();
            match entries.get_mut(&device.usn) {
                Some(entry) if entry.device.is_local() => {
                    trace!(usn = %device.usn, "Ignoring remote announcement for local device");
                    return;
                }
                Some(entry) => {
                    // Only host/port changes count as an update.
                    let moved = !entry.device.same_network_location(&device.location);
                    if moved {
                        info!(
                            usn = %device.usn,
                            old = %entry.device.location,
                            new = %device.location,
                            "Device changed network location"
                        );
                        entry.device.location = device.location.clone();
                        entry.device.server = device.server.clone();
                    }
                    entry.device.max_age = device.max_age;
                    entry.device.source = device.source;

                    entry.cancel_task();
                    let (deadline, generation) = self.next_deadline(device.max_age);
                    entry.expires_at = Some(deadline);
                    entry.generation = generation;
                    entry.task = Some(self.arm_expiry(&device.usn, deadline, generation));
                    trace!(usn = %device.usn, max_age = device.max_age, "Refreshed device");

                    (moved && entry.device.is_root_device())
                        .then(|| (SsdpSignal::DeviceUpdated, entry.device.clone()))
                }
                None => {
                    let (deadline, generation) = self.next_deadline(device.max_age);
                    let task = self.arm_expiry(&device.usn, deadline, generation);
                    debug!(usn = %device.usn, location = %device.location, "New device");

                    let signal = device
                        .is_root_device()
                        .then(|| (SsdpSignal::DeviceDiscovered, device.clone()));
                    entries.insert(
                        device.usn.clone(),
                        Entry {
                            device,
                            expires_at: Some(deadline),
                            generation,
                            task: Some(task),
                        },
                    );
                    signal
                }
            }
        };

        if let Some((signal, device)) = signal {
            self.bus.publish(&signal, device);
        }
    }

    /// Remove a device immediately, cancelling its timer.
    ///
    /// Local devices multicast `ssdp:byebye` on the way out. Root devices
    /// publish [`SsdpSignal::DeviceRemoved`] with the detached record.
    /// Unknown USNs are a no-op.
    pub fn unregister(self: &Arc<Self>, usn: &str) -> Option<SsdpDevice> {
        let mut entry = self.entries.lock().remove(usn)?;
        entry.cancel_task();
        let device = entry.device;

        debug!(usn = %device.usn, "Device unregistered");
        if device.is_local() {
            let registry = Arc::clone(self);
            let frame = self.notify_frame(&device, NotifySubtype::ByeBye);
            tokio::spawn(async move { registry.multicast(&frame).await });
        } else if device.is_root_device() {
            self.bus.publish(&SsdpSignal::DeviceRemoved, device.clone());
        }
        Some(device)
    }

    /// Start advertising a local device.
    ///
    /// Replaces any previous entry with the same USN.
    pub fn advertise(self: &Arc<Self>, mut device: SsdpDevice) {
        device.manifestation = Manifestation::Local;
        device.source = None;
        if device.server.is_none() {
            device.server = Some(self.config.server_banner.clone());
        }

        let task = self.spawn_announcer(&device);
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        info!(usn = %device.usn, nt = %device.nt, "Advertising local device");

        let previous = self.entries.lock().insert(
            device.usn.clone(),
            Entry {
                device,
                expires_at: None,
                generation,
                task: Some(task),
            },
        );
        if let Some(mut previous) = previous {
            previous.cancel_task();
        }
    }

    /// Answer an M-SEARCH for any matching local devices.
    pub async fn answer_search(&self, headers: &SsdpHeaders, source: SocketAddr) {
        let Some(target) = headers.st() else {
            trace!(%source, "M-SEARCH without ST");
            return;
        };

        let answers: Vec<String> = self
            .entries
            .lock()
            .values()
            .filter(|entry| entry.device.is_local())
            .filter(|entry| target == "ssdp:all" || target == entry.device.nt)
            .map(|entry| ssdp::search_response(&entry.device, target, &self.config.server_banner))
            .collect();

        if answers.is_empty() {
            trace!(%source, st = target, "No local device matches search");
            return;
        }
        for frame in answers {
            self.send_to(&frame, source).await;
        }
    }

    pub fn get(&self, usn: &str) -> Option<SsdpDevice> {
        self.entries.lock().get(usn).map(|entry| entry.device.clone())
    }

    pub fn devices(&self) -> Vec<SsdpDevice> {
        self.entries
            .lock()
            .values()
            .map(|entry| entry.device.clone())
            .collect()
    }

    /// Deadline of a remote device's expiry timer.
    pub fn expires_at(&self, usn: &str) -> Option<Instant> {
        self.entries.lock().get(usn).and_then(|entry| entry.expires_at)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Unregister every device. Byebyes for local devices are sent before
    /// returning.
    pub async fn shutdown(self: &Arc<Self>) {
        let drained: Vec<Entry> = self.entries.lock().drain().map(|(_, entry)| entry).collect();

        for mut entry in drained {
            entry.cancel_task();
            if entry.device.is_local() {
                let frame = self.notify_frame(&entry.device, NotifySubtype::ByeBye);
                self.multicast(&frame).await;
            } else if entry.device.is_root_device() {
                self.bus.publish(&SsdpSignal::DeviceRemoved, entry.device);
            }
        }
        self.set_transport(None);
    }

    fn next_deadline(&self, max_age: u32) -> (Instant, u64) {
        let deadline =
            Instant::now() + Duration::from_secs(u64::from(max_age)) + self.config.expiry_grace;
        (deadline, self.generation.fetch_add(1, Ordering::Relaxed))
    }

    fn arm_expiry(self: &Arc<Self>, usn: &str, deadline: Instant, generation: u64) -> JoinHandle<()> {
        let registry: Weak<Self> = Arc::downgrade(self);
        let usn = usn.to_string();
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(registry) = registry.upgrade() {
                registry.expire(&usn, generation);
            }
        })
    }

    fn expire(&self, usn: &str, generation: u64) {
        let device = {
            let mut entries = self.entries.lock();
            match entries.get(usn) {
                Some(entry) if entry.generation == generation => {
                    // The running task is this one; dropping its handle is enough.
                    entries.remove(usn).map(|entry| entry.device)
                }
                _ => None,
            }
        };

        if let Some(device) = device {
            info!(usn = %device.usn, "Device expired");
            if device.is_root_device() {
                self.bus.publish(&SsdpSignal::DeviceRemoved, device);
            }
        }
    }

    fn spawn_announcer(self: &Arc<Self>, device: &SsdpDevice) -> JoinHandle<()> {
        let registry = Arc::downgrade(self);
        let frame = self.notify_frame(device, NotifySubtype::Alive);
        let period = Duration::from_secs(u64::from(device.max_age / 2).max(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    return;
                };
                registry.multicast(&frame).await;
            }
        })
    }

    fn notify_frame(&self, device: &SsdpDevice, nts: NotifySubtype) -> String {
        ssdp::notify_message(
            &self.config.group_addr().to_string(),
            device,
            nts,
            &self.config.server_banner,
        )
    }

    async fn multicast(&self, frame: &str) {
        self.send_to(frame, self.config.group_addr()).await;
    }

    async fn send_to(&self, frame: &str, target: SocketAddr) {
        let socket = self.transport.read().clone();
        let Some(socket) = socket else {
            debug!(%target, "No SSDP transport, dropping outgoing frame");
            return;
        };
        if let Err(e) = socket.send_to(frame.as_bytes(), target).await {
            warn!(%target, error = %e, "Failed to send SSDP frame");
        }
    }
}
