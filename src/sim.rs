//! Simulated collaborators
//!
//! Stand-ins for the radio, the peer transport and the board, used by the
//! host console and by tests. Radio operations never complete on their own:
//! [`SimWifi::settle`] delivers whatever finished since the last call through
//! the same event producers the firmware uses.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use common::{DeviceSnapshot, NetworkRecord};

use crate::context::{BridgeContext, Collaborators};
use crate::dispatcher::Dispatcher;
use crate::error::{TransportError, WifiError};
use crate::events::WifiEvents;
use crate::services::{Indicator, LinkInfo, PeerTransport, SystemControl, WifiControl};
use crate::settings::BridgeSettings;
use crate::store::{KvStore, MemoryStore};

/// `ESP_ERR_WIFI_STATE`, returned when the radio is busy associating.
const ERR_WIFI_STATE: i32 = 0x3007;
const REASON_ASSOC_LEAVE: u8 = 8;
const REASON_NO_AP_FOUND: u8 = 201;

struct Radio {
    networks: Vec<NetworkRecord>,
    link: Option<LinkInfo>,
    pending_scan: bool,
    pending_connect: Option<String>,
    pending_drop: Option<u8>,
    connects: Vec<(String, String)>,
    scans_started: usize,
    refuse_scans: bool,
    leases: u8,
}

/// Station that can see a fixed set of networks. Connecting succeeds when
/// the ssid is among them, whatever the password.
pub struct SimWifi {
    radio: Mutex<Radio>,
}

impl SimWifi {
    pub fn new(networks: Vec<NetworkRecord>) -> Self {
        Self {
            radio: Mutex::new(Radio {
                networks,
                link: None,
                pending_scan: false,
                pending_connect: None,
                pending_drop: None,
                connects: Vec::new(),
                scans_started: 0,
                refuse_scans: false,
                leases: 0,
            }),
        }
    }

    /// Deliver finished operations. Returns whether anything was delivered.
    pub fn settle(&self, events: &WifiEvents) -> bool {
        let (dropped, scanned, connected) = {
            let mut radio = self.lock();

            let scanned = if std::mem::take(&mut radio.pending_scan) {
                Some(radio.networks.clone())
            } else {
                None
            };

            let connected = radio.pending_connect.take().map(|ssid| {
                let rssi = radio
                    .networks
                    .iter()
                    .find(|network| network.ssid == ssid)
                    .map(|network| network.rssi);

                match rssi {
                    Some(rssi) => {
                        radio.leases = radio.leases.wrapping_add(1);
                        let ip = Ipv4Addr::new(192, 168, 4, 10 + radio.leases % 200);
                        radio.link = Some(LinkInfo { rssi, ip });
                        Ok(ip)
                    }
                    None => Err(REASON_NO_AP_FOUND),
                }
            });

            (radio.pending_drop.take(), scanned, connected)
        };

        if let Some(reason) = dropped {
            events.disconnected(reason);
        }
        if let Some(networks) = &scanned {
            events.scan_done(networks.clone());
        }
        match connected {
            Some(Ok(ip)) => events.got_ip(ip),
            Some(Err(reason)) => events.disconnected(reason),
            None => {}
        }

        dropped.is_some() || scanned.is_some() || connected.is_some()
    }

    /// Jump straight to an associated link.
    pub fn force_link(&self, rssi: i8, ip: Ipv4Addr) {
        self.lock().link = Some(LinkInfo { rssi, ip });
    }

    pub fn refuse_scans(&self, refuse: bool) {
        self.lock().refuse_scans = refuse;
    }

    pub fn scans_started(&self) -> usize {
        self.lock().scans_started
    }

    pub fn connects(&self) -> Vec<(String, String)> {
        self.lock().connects.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Radio> {
        self.radio.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl WifiControl for SimWifi {
    fn connect(&self, ssid: &str, password: &str) -> Result<(), WifiError> {
        if ssid.len() > 32 || password.len() > 64 {
            return Err(WifiError::CredentialsTooLong);
        }

        let mut radio = self.lock();
        if radio.link.take().is_some() {
            radio.pending_drop = Some(REASON_ASSOC_LEAVE);
        }
        radio.pending_connect = Some(ssid.to_string());
        radio.connects.push((ssid.to_string(), password.to_string()));
        Ok(())
    }

    fn disconnect(&self) -> Result<(), WifiError> {
        let mut radio = self.lock();
        if radio.link.take().is_some() {
            radio.pending_drop = Some(REASON_ASSOC_LEAVE);
        }
        radio.pending_connect = None;
        Ok(())
    }

    fn start_scan(&self) -> Result<(), WifiError> {
        let mut radio = self.lock();
        if radio.refuse_scans || radio.pending_connect.is_some() {
            return Err(WifiError::Driver(ERR_WIFI_STATE));
        }
        radio.pending_scan = true;
        radio.scans_started += 1;
        Ok(())
    }

    fn link_info(&self) -> Option<LinkInfo> {
        self.lock().link
    }
}

#[derive(Default)]
struct Recorded {
    chunks: Vec<Vec<u8>>,
    attempts: usize,
    fail_at: Option<usize>,
}

/// Keeps every notification that went out.
#[derive(Default)]
pub struct RecordingTransport {
    recorded: Mutex<Recorded>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the notify attempt with this index fail.
    pub fn fail_chunk(&self, index: usize) {
        self.lock().fail_at = Some(index);
    }

    pub fn chunks(&self) -> Vec<Vec<u8>> {
        self.lock().chunks.clone()
    }

    pub fn take_chunks(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.lock().chunks)
    }

    pub fn attempts(&self) -> usize {
        self.lock().attempts
    }

    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PeerTransport for RecordingTransport {
    fn notify(&self, chunk: &[u8]) -> Result<(), TransportError> {
        let mut recorded = self.lock();
        let attempt = recorded.attempts;
        recorded.attempts += 1;

        if recorded.fail_at == Some(attempt) {
            return Err(TransportError::Notify(-1));
        }
        recorded.chunks.push(chunk.to_vec());
        Ok(())
    }
}

type RestartHook = Box<dyn Fn() + Send + Sync>;

pub struct SimSystem {
    booted: Instant,
    frozen_uptime: Option<Duration>,
    free_heap: u32,
    restarts: AtomicUsize,
    on_restart: Option<RestartHook>,
}

impl SimSystem {
    pub fn new() -> Self {
        Self {
            booted: Instant::now(),
            frozen_uptime: None,
            free_heap: 180_000,
            restarts: AtomicUsize::new(0),
            on_restart: None,
        }
    }

    /// Report a fixed uptime instead of the time since construction.
    pub fn with_uptime(mut self, uptime: Duration) -> Self {
        self.frozen_uptime = Some(uptime);
        self
    }

    pub fn on_restart(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_restart = Some(Box::new(hook));
        self
    }

    pub fn restarts(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }
}

impl Default for SimSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemControl for SimSystem {
    fn free_heap(&self) -> u32 {
        self.free_heap
    }

    fn uptime(&self) -> Duration {
        self.frozen_uptime.unwrap_or_else(|| self.booted.elapsed())
    }

    fn restart(&self) {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = &self.on_restart {
            hook();
        }
    }
}

#[derive(Default)]
pub struct SimLed {
    level: AtomicBool,
}

impl SimLed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(&self) -> bool {
        self.level.load(Ordering::SeqCst)
    }
}

impl Indicator for SimLed {
    fn toggle(&self) -> bool {
        !self.level.fetch_xor(true, Ordering::SeqCst)
    }
}

/// A whole bridge on simulated parts, with handles on every part.
pub struct SimBridge {
    pub context: Arc<BridgeContext>,
    pub store: Arc<MemoryStore>,
    pub wifi: Arc<SimWifi>,
    pub transport: Arc<RecordingTransport>,
    pub system: Arc<SimSystem>,
    pub led: Arc<SimLed>,
}

impl SimBridge {
    /// Default settings without delays, empty store.
    pub fn new(networks: Vec<NetworkRecord>) -> Self {
        Self::with_store(
            BridgeSettings::default().without_delays(),
            Arc::new(MemoryStore::default()),
            networks,
        )
    }

    pub fn with_store(
        settings: BridgeSettings,
        store: Arc<MemoryStore>,
        networks: Vec<NetworkRecord>,
    ) -> Self {
        let wifi = Arc::new(SimWifi::new(networks));
        let transport = Arc::new(RecordingTransport::new());
        let system = Arc::new(SimSystem::new().with_uptime(Duration::from_secs(42)));
        let led = Arc::new(SimLed::new());

        let context = Arc::new(BridgeContext::new(
            settings,
            Collaborators {
                store: store.clone(),
                wifi: wifi.clone(),
                transport: transport.clone(),
                system: system.clone(),
                indicator: led.clone(),
            },
        ));

        Self {
            context,
            store,
            wifi,
            transport,
            system,
            led,
        }
    }

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(self.context.clone())
    }

    /// Connect and subscribe a peer the way the radio would, which queues
    /// the initial status request.
    pub fn subscribe(&self, mtu: u16) {
        let peer = self.context.peer_events();
        peer.connected(1);
        peer.mtu_changed(mtu);
        peer.subscribed(true);
    }

    /// Put a subscribed peer in place without queueing anything.
    pub fn attach_peer(&self, mtu: u16) {
        self.context.peer.on_connect(1);
        self.context.peer.on_mtu(mtu);
        self.context.peer.on_subscribe(true);
    }

    /// Write a line to the RX characteristic.
    pub fn write(&self, line: &str) -> bool {
        self.context.peer_events().received(line.as_bytes())
    }

    pub fn settle(&self) -> bool {
        self.wifi.settle(&self.context.wifi_events())
    }

    /// Notifications sent so far, one string per notification.
    pub fn take_replies(&self) -> Vec<String> {
        self.transport
            .take_chunks()
            .into_iter()
            .map(|chunk| String::from_utf8_lossy(&chunk).into_owned())
            .collect()
    }

    /// The device fields a status report should carry right now.
    pub fn device_snapshot(&self) -> DeviceSnapshot {
        let config = self.context.config.snapshot();
        DeviceSnapshot {
            heap: self.system.free_heap(),
            uptime: self.system.uptime().as_secs(),
            ble: self.context.peer.is_connected(),
            saved_ssid: config.ssid,
            autoconnect: config.auto_connect,
            devname: config.device_name,
            nvs_free: self.store.free_entries(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_led_toggles() {
        let led = SimLed::new();
        assert!(led.toggle());
        assert!(led.level());
        assert!(!led.toggle());
        assert!(!led.level());
    }

    #[test]
    fn test_connect_to_visible_network_links() {
        let sim = SimBridge::new(vec![NetworkRecord::new("Home", -50, true)]);
        sim.wifi.connect("Home", "pw").unwrap();
        assert!(sim.wifi.link_info().is_none());

        assert!(sim.settle());
        let link = sim.wifi.link_info().unwrap();
        assert_eq!(link.rssi, -50);
        assert_eq!(link.ip, Ipv4Addr::new(192, 168, 4, 11));
        assert!(!sim.settle());
    }

    #[test]
    fn test_connect_to_unknown_network_drops() {
        let sim = SimBridge::new(Vec::new());
        sim.wifi.connect("Nowhere", "pw").unwrap();
        sim.settle();

        assert!(sim.wifi.link_info().is_none());
        assert_eq!(
            sim.context.queue.try_take(),
            Some(crate::queue::Request::Event(
                crate::queue::BridgeEvent::LinkDropped {
                    reason: REASON_NO_AP_FOUND
                }
            ))
        );
    }

    #[test]
    fn test_scan_refused_while_associating() {
        let wifi = SimWifi::new(Vec::new());
        wifi.connect("Home", "pw").unwrap();
        assert_eq!(wifi.start_scan(), Err(WifiError::Driver(ERR_WIFI_STATE)));
    }

    #[test]
    fn test_overlong_credentials_rejected() {
        let wifi = SimWifi::new(Vec::new());
        assert_eq!(
            wifi.connect(&"s".repeat(33), "pw"),
            Err(WifiError::CredentialsTooLong)
        );
        assert!(wifi.connects().is_empty());
    }

    #[test]
    fn test_restart_hook_runs() {
        let fired = Arc::new(AtomicBool::new(false));
        let system = {
            let fired = fired.clone();
            SimSystem::new().on_restart(move || fired.store(true, Ordering::SeqCst))
        };

        system.restart();
        assert_eq!(system.restarts(), 1);
        assert!(fired.load(Ordering::SeqCst));
    }
}
