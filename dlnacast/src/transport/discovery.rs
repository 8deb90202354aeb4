use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, warn};

use crate::error::{DlnaError, Result};
use crate::model::Device;
use crate::transport::description;
use crate::transport::ssdp::{self, MulticastListener, SearchSocket, SsdpResponse};

/// Cooperative cancellation handle for a running scan. Polled between
/// receive attempts and before each send round, so a cancelled scan
/// reaches its cleanup within one receive-timeout interval.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Overall session deadline; bounds wall-clock time no matter how
    /// many send rounds complete.
    pub window: Duration,
    /// M-SEARCH rounds before the session switches to listen-only.
    pub send_rounds: u32,
    /// Repeats per target per round; UDP is lossy and renderers spread
    /// their replies across the MX window, so repetition improves recall.
    pub sends_per_target: u32,
    pub mx: u32,
    /// Per-datagram receive timeout; also the cancellation latency bound.
    pub read_timeout: Duration,
    /// Pause between sends, to avoid flooding the segment.
    pub send_pause: Duration,
    /// Fetch `<friendlyName>` for each new device during the scan.
    pub resolve_names: bool,
    pub name_timeout: Duration,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(25),
            send_rounds: 6,
            sends_per_target: 2,
            mx: ssdp::DEFAULT_MX,
            read_timeout: Duration::from_millis(800),
            send_pause: Duration::from_millis(80),
            resolve_names: true,
            name_timeout: Duration::from_millis(900),
        }
    }
}

/// A way of producing candidate renderers within a time budget. The
/// three implementations are escalating fallbacks: multicast scan,
/// unicast search against a known IP, and brute-force description
/// probing for networks where SSDP is blocked entirely.
///
/// `found` fires once per device, on first sighting; the returned list
/// is the final state, in which a re-sighted device may have refreshed
/// identity headers (a renderer restart moves its LOCATION).
pub trait DiscoverySource {
    fn discover(&self, cancel: &CancelToken, found: &mut dyn FnMut(Device)) -> Result<Vec<Device>>;
}

/// Standard SSDP discovery: M-SEARCH rounds on the multicast group,
/// interleaved with draining search responses and NOTIFY announcements.
pub struct MulticastScan {
    options: DiscoveryOptions,
}

impl MulticastScan {
    pub fn new(options: DiscoveryOptions) -> Self {
        Self { options }
    }

    fn send_round(&self, sender: &SearchSocket, cancel: &CancelToken) {
        let dest = ssdp::multicast_addr();
        let host = format!("{}:{}", ssdp::SSDP_ADDR, ssdp::SSDP_PORT);
        for target in ssdp::SEARCH_TARGETS {
            for _ in 0..self.options.sends_per_target {
                if cancel.is_cancelled() {
                    return;
                }
                if let Err(e) = sender.send_search(dest, &host, target, self.options.mx) {
                    // reduced coverage, not session failure
                    warn!("M-SEARCH send failed for {}: {}", target, e);
                }
                thread::sleep(self.options.send_pause);
            }
        }
    }
}

impl DiscoverySource for MulticastScan {
    fn discover(&self, cancel: &CancelToken, found: &mut dyn FnMut(Device)) -> Result<Vec<Device>> {
        let deadline = Instant::now() + self.options.window;
        let listener = MulticastListener::open(self.options.read_timeout)?;
        let sender = SearchSocket::open()?;
        let mut devices = DeviceTable::new();
        let mut round = 0;

        while Instant::now() < deadline && !cancel.is_cancelled() {
            if round < self.options.send_rounds {
                self.send_round(&sender, cancel);
                round += 1;
            }
            match listener.receive_one() {
                Ok(Some((text, from))) => {
                    let Some(response) = ssdp::parse_response(&text) else {
                        continue;
                    };
                    debug!("ssdp response from {}: {}", from, response.usn);
                    let usn = response.usn.clone();
                    let is_new = devices.merge(response);
                    if let Some(device) = devices.get_mut(&usn) {
                        if is_new {
                            if self.options.resolve_names && device.friendly_name.is_none() {
                                if let Some(location) = device.location.clone() {
                                    device.friendly_name = description::fetch_friendly_name(
                                        &location,
                                        self.options.name_timeout,
                                    );
                                }
                            }
                            found(device.clone());
                        }
                    }
                }
                Ok(None) => {} // receive window elapsed, the idle steady state
                Err(e) => {
                    warn!("multicast receive failed: {}", e);
                    break;
                }
            }
        }
        // listener and sender drop here, leaving the group on the way out
        Ok(devices.into_devices())
    }
}

/// USN-keyed device table, in insertion order. A re-sighted USN
/// refreshes the identity headers (a renderer restart moves its
/// LOCATION) but keeps an already-resolved name and control binding.
pub(crate) struct DeviceTable {
    devices: HashMap<String, Device>,
    order: Vec<String>,
}

impl DeviceTable {
    pub(crate) fn new() -> Self {
        Self {
            devices: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Fold in a parsed response. Returns true when the USN was new.
    pub(crate) fn merge(&mut self, response: SsdpResponse) -> bool {
        match self.devices.entry(response.usn.clone()) {
            Entry::Occupied(mut entry) => {
                let device = entry.get_mut();
                if !response.search_target.is_empty() {
                    device.search_target = response.search_target;
                }
                if response.server.is_some() {
                    device.server = response.server;
                }
                if response.location.is_some() {
                    device.location = response.location;
                }
                false
            }
            Entry::Vacant(slot) => {
                let mut device = Device::new(response.usn.clone());
                device.search_target = response.search_target;
                device.server = response.server;
                device.location = response.location;
                slot.insert(device);
                self.order.push(response.usn);
                true
            }
        }
    }

    pub(crate) fn get_mut(&mut self, usn: &str) -> Option<&mut Device> {
        self.devices.get_mut(usn)
    }

    /// The final device list, one entry per USN, in first-seen order.
    pub(crate) fn into_devices(mut self) -> Vec<Device> {
        self.order
            .iter()
            .filter_map(|usn| self.devices.remove(usn))
            .collect()
    }
}

/// Unicast search against a known IP, for networks where multicast is
/// filtered (AP client isolation). First well-formed response wins.
pub struct UnicastScan {
    pub ip: IpAddr,
    pub listen: Duration,
    pub name_timeout: Duration,
}

impl UnicastScan {
    pub fn new(ip: IpAddr, listen: Duration) -> Self {
        Self {
            ip,
            listen,
            name_timeout: Duration::from_millis(900),
        }
    }
}

impl DiscoverySource for UnicastScan {
    fn discover(&self, cancel: &CancelToken, found: &mut dyn FnMut(Device)) -> Result<Vec<Device>> {
        let poll = self.listen.min(Duration::from_millis(500));
        let socket = SearchSocket::with_read_timeout(poll)?;
        let dest = SocketAddr::new(self.ip, ssdp::SSDP_PORT);
        let host = format!("{}:{}", self.ip, ssdp::SSDP_PORT);

        for target in ssdp::UNICAST_SEARCH_TARGETS {
            if cancel.is_cancelled() {
                return Ok(Vec::new());
            }
            if let Err(e) = socket.send_search(dest, &host, target, ssdp::DEFAULT_MX) {
                warn!("unicast M-SEARCH to {} failed: {}", dest, e);
            }
            thread::sleep(Duration::from_millis(60));
        }

        let deadline = Instant::now() + self.listen;
        while Instant::now() < deadline && !cancel.is_cancelled() {
            match socket.receive_one() {
                Ok(Some((text, from))) => {
                    let Some(response) = ssdp::parse_response(&text) else {
                        continue;
                    };
                    debug!("unicast response from {}: {}", from, response.usn);
                    let mut device = Device::new(response.usn);
                    device.search_target = response.search_target;
                    device.server = response.server;
                    device.location = response.location;
                    if let Some(location) = device.location.clone() {
                        device.friendly_name =
                            description::fetch_friendly_name(&location, self.name_timeout);
                    }
                    found(device.clone());
                    return Ok(vec![device]);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("unicast receive failed: {}", e);
                    break;
                }
            }
        }
        Ok(Vec::new())
    }
}

/// Description paths renderers commonly serve, tried against the ports
/// they commonly listen on. Last resort when SSDP is blocked entirely.
pub const PROBE_PATHS: &[&str] = &[
    "/description.xml",
    "/rootDesc.xml",
    "/DeviceDescription.xml",
    "/RenderingControl/desc.xml",
    "/dmr.xml",
    "/devdesc.xml",
    "/MediaRenderer/desc.xml",
    "/dmr/DeviceDescription.xml",
    "/upnp/desc.xml",
];

pub const PROBE_PORTS: &[u16] = &[
    80, 2869, 49152, 49153, 49154, 49155, 49156, 49157, 49158, 49159, 49160, 1400,
];

/// Brute-force HTTP probe of the common description endpoints on a
/// known IP. A hit yields a device with the synthetic USN `manual:<ip>`.
pub struct DescriptionProbe {
    pub ip: IpAddr,
}

impl DescriptionProbe {
    pub fn new(ip: IpAddr) -> Self {
        Self { ip }
    }
}

impl DiscoverySource for DescriptionProbe {
    fn discover(&self, cancel: &CancelToken, found: &mut dyn FnMut(Device)) -> Result<Vec<Device>> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(1800))
            .user_agent("Mozilla/5.0")
            .build()
            .map_err(|e| DlnaError::Communication(e.to_string()))?;

        for port in PROBE_PORTS {
            for path in PROBE_PATHS {
                if cancel.is_cancelled() {
                    return Ok(Vec::new());
                }
                let url = format!("http://{}:{}{}", self.ip, port, path);
                match http.get(&url).send() {
                    Ok(response) if response.status().is_success() => {
                        debug!("description probe hit: {}", url);
                        let mut device = Device::new(format!("manual:{}", self.ip));
                        device.friendly_name = description::fetch_friendly_name(
                            &url,
                            Duration::from_millis(1200),
                        );
                        device.location = Some(url);
                        found(device.clone());
                        return Ok(vec![device]);
                    }
                    _ => {}
                }
            }
        }
        Ok(Vec::new())
    }
}

/// Events delivered to a discovery session's callback, from the
/// session's own worker thread. `Done` fires exactly once, after the
/// sockets have been released.
#[derive(Debug)]
pub enum DiscoveryEvent {
    Found(Device),
    Done,
}

/// A multicast scan running on its own thread, streaming devices to the
/// caller as they are first seen.
pub struct DiscoverySession {
    cancel: CancelToken,
    worker: JoinHandle<Vec<Device>>,
}

impl DiscoverySession {
    pub fn start<F>(options: DiscoveryOptions, mut on_event: F) -> Self
    where
        F: FnMut(DiscoveryEvent) + Send + 'static,
    {
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let worker = thread::spawn(move || {
            let scan = MulticastScan::new(options);
            let result =
                scan.discover(&token, &mut |device| on_event(DiscoveryEvent::Found(device)));
            let devices = match result {
                Ok(devices) => devices,
                Err(e) => {
                    error!("discovery session failed: {}", e);
                    Vec::new()
                }
            };
            on_event(DiscoveryEvent::Done);
            devices
        });
        Self { cancel, worker }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Block until the session finishes and return everything it found.
    pub fn join(self) -> Vec<Device> {
        self.worker.join().unwrap_or_default()
    }
}

/// Scan the local network, blocking until the window elapses.
pub fn discover(window: Duration) -> Result<Vec<Device>> {
    discover_with_options(DiscoveryOptions {
        window,
        ..Default::default()
    })
}

pub fn discover_with_options(options: DiscoveryOptions) -> Result<Vec<Device>> {
    let scan = MulticastScan::new(options);
    scan.discover(&CancelToken::new(), &mut |_| {})
}
