//! Event producers
//!
//! Radio callbacks run in driver context and must return quickly. They only
//! update shared state that belongs to them and turn the event into a
//! [`Request`] for the dispatcher.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Instant;

use common::{NetworkRecord, COMMAND_MAX_LEN};

use crate::notifier::PeerLink;
use crate::queue::{BridgeEvent, CommandQueue, Request};
use crate::scan_cache::ScanCache;

/// Station disconnect reason codes as reported by the WiFi driver.
const DISCONNECT_REASONS: &[(u8, &str)] = &[
    (2, "AUTH_EXPIRE"),
    (3, "AUTH_LEAVE"),
    (4, "ASSOC_EXPIRE"),
    (5, "ASSOC_TOOMANY"),
    (6, "NOT_AUTHED"),
    (7, "NOT_ASSOCED"),
    (8, "ASSOC_LEAVE"),
    (9, "ASSOC_NOT_AUTHED"),
    (14, "MIC_FAILURE"),
    (15, "4WAY_HANDSHAKE_TIMEOUT"),
    (23, "802_1X_AUTH_FAILED"),
    (200, "BEACON_TIMEOUT"),
    (201, "NO_AP_FOUND"),
    (202, "AUTH_FAIL"),
    (203, "ASSOC_FAIL"),
    (204, "HANDSHAKE_TIMEOUT"),
    (205, "CONNECTION_FAIL"),
    (210, "NO_AP_FOUND_W_COMPATIBLE_SECURITY"),
];

pub fn disconnect_reason_name(reason: u8) -> &'static str {
    DISCONNECT_REASONS
        .iter()
        .find(|(code, _)| *code == reason)
        .map_or("UNKNOWN", |&(_, name)| name)
}

/// Producers for station events.
#[derive(Clone)]
pub struct WifiEvents {
    queue: Arc<CommandQueue>,
    scan_cache: Arc<ScanCache>,
}

impl WifiEvents {
    pub fn new(queue: Arc<CommandQueue>, scan_cache: Arc<ScanCache>) -> Self {
        Self { queue, scan_cache }
    }

    pub fn scan_done(&self, networks: Vec<NetworkRecord>) {
        let found = networks.len();
        info!("events: scan done, {} networks", found);
        // Results of an invalidated scan are stale, nobody gets told
        if self.scan_cache.complete(networks, Instant::now()) {
            self.push(BridgeEvent::ScanFinished { found });
        }
    }

    pub fn scan_failed(&self) {
        warn!("events: scan failed");
        self.scan_cache.fail();
        self.push(BridgeEvent::ScanFailed);
    }

    pub fn got_ip(&self, ip: Ipv4Addr) {
        info!("events: got ip {}", ip);
        self.push(BridgeEvent::AddressAcquired(ip));
    }

    pub fn disconnected(&self, reason: u8) {
        info!(
            "events: station disconnected, reason {} ({})",
            reason,
            disconnect_reason_name(reason)
        );
        self.push(BridgeEvent::LinkDropped { reason });
    }

    fn push(&self, event: BridgeEvent) {
        // A full queue already logged the drop
        let _ = self.queue.post(Request::Event(event));
    }
}

/// Producers for the wireless peer.
#[derive(Clone)]
pub struct PeerEvents {
    queue: Arc<CommandQueue>,
    link: Arc<PeerLink>,
}

impl PeerEvents {
    pub fn new(queue: Arc<CommandQueue>, link: Arc<PeerLink>) -> Self {
        Self { queue, link }
    }

    pub fn connected(&self, handle: u16) {
        info!("events: peer connected, handle {}", handle);
        self.link.on_connect(handle);
    }

    pub fn disconnected(&self, reason: i32) {
        info!("events: peer disconnected, reason {}", reason);
        self.link.on_disconnect();
    }

    pub fn mtu_changed(&self, mtu: u16) {
        info!("events: mtu is now {}", mtu);
        self.link.on_mtu(mtu);
    }

    /// Notifications turned on or off for the TX characteristic. Turning
    /// them on asks for an initial status.
    pub fn subscribed(&self, notify: bool) {
        info!("events: peer {}", if notify { "subscribed" } else { "unsubscribed" });
        self.link.on_subscribe(notify);
        if notify {
            let _ = self.queue.post(Request::Event(BridgeEvent::PeerSubscribed));
        }
    }

    /// A write to the RX characteristic. Empty or oversized writes are
    /// dropped; the rest is decoded as UTF-8, invalid bytes replaced.
    pub fn received(&self, data: &[u8]) -> bool {
        if data.is_empty() || data.len() >= COMMAND_MAX_LEN {
            warn!("events: dropped rx write of {} bytes", data.len());
            return false;
        }

        let text = String::from_utf8_lossy(data);
        let Some(request) = Request::line(&text) else {
            warn!("events: rx write does not fit after decoding, dropped");
            return false;
        };

        trace!("events: rx write of {} bytes", data.len());
        self.queue.post(request).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimWifi;
    use std::time::Duration;

    fn parts() -> (Arc<CommandQueue>, Arc<ScanCache>, Arc<PeerLink>) {
        (
            Arc::new(CommandQueue::new(4, Duration::ZERO)),
            Arc::new(ScanCache::new(Duration::from_secs(30), 5)),
            Arc::new(PeerLink::new()),
        )
    }

    #[test]
    fn test_reason_names() {
        assert_eq!(disconnect_reason_name(8), "ASSOC_LEAVE");
        assert_eq!(disconnect_reason_name(201), "NO_AP_FOUND");
        assert_eq!(disconnect_reason_name(99), "UNKNOWN");
    }

    #[test]
    fn test_wifi_events_enqueue_status_requests() {
        let (queue, cache, _) = parts();
        assert!(cache.start(&SimWifi::new(Vec::new())));
        let events = WifiEvents::new(queue.clone(), cache);

        events.got_ip(Ipv4Addr::new(10, 0, 0, 2));
        events.disconnected(201);
        events.scan_done(Vec::new());

        assert_eq!(
            queue.take(),
            Request::Event(BridgeEvent::AddressAcquired(Ipv4Addr::new(10, 0, 0, 2)))
        );
        assert_eq!(queue.take(), Request::Event(BridgeEvent::LinkDropped { reason: 201 }));
        assert_eq!(queue.take(), Request::Event(BridgeEvent::ScanFinished { found: 0 }));
    }

    #[test]
    fn test_discarded_scan_is_not_announced() {
        let (queue, cache, _) = parts();
        let wifi = SimWifi::new(Vec::new());
        let events = WifiEvents::new(queue.clone(), cache.clone());

        // Nobody asked
        events.scan_done(Vec::new());
        assert!(queue.is_empty());

        // Invalidated while in flight
        cache.start(&wifi);
        cache.invalidate();
        events.scan_done(vec![NetworkRecord::new("Stale", -60, true)]);
        assert!(queue.is_empty());
        assert!(!cache.is_scanning());
    }

    #[test]
    fn test_rx_length_limits() {
        let (queue, _, link) = parts();
        let events = PeerEvents::new(queue.clone(), link);

        assert!(!events.received(b""));
        assert!(!events.received(&[b'x'; COMMAND_MAX_LEN]));
        assert!(events.received(&[b'x'; COMMAND_MAX_LEN - 1]));
        assert!(events.received(b"status()"));

        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_rx_invalid_utf8_is_replaced() {
        let (queue, _, link) = parts();
        let events = PeerEvents::new(queue.clone(), link);

        assert!(events.received(b"echo(\"\xff\")"));
        assert_eq!(queue.take(), Request::line("echo(\"\u{fffd}\")").unwrap());
    }

    #[test]
    fn test_subscribe_requests_status_once() {
        let (queue, _, link) = parts();
        let events = PeerEvents::new(queue.clone(), link.clone());

        events.connected(3);
        events.mtu_changed(185);
        events.subscribed(true);
        assert!(link.snapshot().subscribed);
        assert_eq!(link.snapshot().chunk_size(), 182);
        assert_eq!(queue.take(), Request::Event(BridgeEvent::PeerSubscribed));

        events.subscribed(false);
        assert!(queue.is_empty());

        events.disconnected(0x13);
        assert!(!link.is_connected());
    }
}
