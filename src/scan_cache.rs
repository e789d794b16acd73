//! Network scan cache
//!
//! ```text
//!            request (stale/empty)           scan done
//!   Idle ───────────────────────▶ Scanning ───────────▶ Cached
//!    ▲                              │   ▲                  │
//!    │          scan failed         │   │  request (stale) │
//!    └──────────────────────────────┘   └──────────────────┘
//! ```
//!
//! Any connect or disconnect invalidates the cache. At most one scan is ever
//! in flight: the state check and the scan start happen under the same lock.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use common::{NetworkListing, NetworkRecord};

use crate::services::WifiControl;

#[derive(Clone, Debug, PartialEq, Eq)]
enum ScanState {
    Idle,
    Scanning {
        /// Set when the cache was invalidated mid-scan. The result is thrown
        /// away when it arrives.
        discard: bool,
    },
    Cached {
        networks: Vec<NetworkRecord>,
        captured_at: Instant,
    },
}

pub struct ScanCache {
    state: Mutex<ScanState>,
    ttl: Duration,
    max_networks: usize,
}

impl ScanCache {
    pub fn new(ttl: Duration, max_networks: usize) -> Self {
        Self {
            state: Mutex::new(ScanState::Idle),
            ttl,
            max_networks,
        }
    }

    /// What the disconnected status should list. Serves a fresh cache
    /// directly, otherwise starts a scan unless one is already running. A
    /// running scan is adopted even if it was invalidated, since the caller
    /// is about to be told a list is coming.
    pub fn request(&self, now: Instant, wifi: &dyn WifiControl) -> NetworkListing {
        let mut state = self.lock();

        match &mut *state {
            ScanState::Scanning { discard } => {
                *discard = false;
                return NetworkListing::Scanning;
            }
            ScanState::Cached {
                networks,
                captured_at,
            } if now.saturating_duration_since(*captured_at) < self.ttl => {
                return NetworkListing::Networks(networks.clone());
            }
            _ => {}
        }

        match wifi.start_scan() {
            Ok(()) => {
                info!("scan_cache: cache empty or stale, scan started");
                *state = ScanState::Scanning { discard: false };
                NetworkListing::Scanning
            }
            Err(e) => {
                warn!("scan_cache: could not start scan: {}", e);
                *state = ScanState::Idle;
                NetworkListing::Unavailable
            }
        }
    }

    /// Start a scan regardless of cache age. Returns false if the radio
    /// refused; an already running scan counts as started.
    pub fn start(&self, wifi: &dyn WifiControl) -> bool {
        let mut state = self.lock();
        if let ScanState::Scanning { discard } = &mut *state {
            // Whoever asks now wants this scan's result
            *discard = false;
            return true;
        }

        match wifi.start_scan() {
            Ok(()) => {
                info!("scan_cache: scan started");
                *state = ScanState::Scanning { discard: false };
                true
            }
            Err(e) => {
                warn!("scan_cache: could not start scan: {}", e);
                false
            }
        }
    }

    /// Store the records of a finished scan, keeping the first
    /// `max_networks` in discovery order. Returns whether they were kept.
    pub fn complete(&self, mut networks: Vec<NetworkRecord>, now: Instant) -> bool {
        let mut state = self.lock();
        match &*state {
            ScanState::Scanning { discard: true } => {
                info!("scan_cache: dropped result of invalidated scan");
                *state = ScanState::Idle;
                false
            }
            ScanState::Scanning { discard: false } => {
                networks.truncate(self.max_networks);
                info!("scan_cache: cached {} networks", networks.len());
                *state = ScanState::Cached {
                    networks,
                    captured_at: now,
                };
                true
            }
            _ => {
                debug!("scan_cache: ignoring scan result nobody asked for");
                false
            }
        }
    }

    /// The scan ended without results.
    pub fn fail(&self) {
        let mut state = self.lock();
        if matches!(*state, ScanState::Scanning { .. }) {
            *state = ScanState::Idle;
        }
    }

    /// Forget cached results. A running scan cannot be cancelled; it keeps
    /// running and its result is dropped unless a later request or start
    /// adopts it.
    pub fn invalidate(&self) {
        let mut state = self.lock();
        match &mut *state {
            ScanState::Scanning { discard } => *discard = true,
            _ => *state = ScanState::Idle,
        }
    }

    pub fn is_scanning(&self) -> bool {
        matches!(*self.lock(), ScanState::Scanning { .. })
    }

    fn lock(&self) -> MutexGuard<'_, ScanState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimWifi;

    fn cache() -> ScanCache {
        ScanCache::new(Duration::from_secs(30), 5)
    }

    fn records(count: usize) -> Vec<NetworkRecord> {
        (0..count)
            .map(|i| NetworkRecord::new(format!("net-{}", i), -40 - i as i8, i % 2 == 0))
            .collect()
    }

    #[test]
    fn test_first_request_starts_scan() {
        let wifi = SimWifi::new(Vec::new());
        let cache = cache();

        assert_eq!(cache.request(Instant::now(), &wifi), NetworkListing::Scanning);
        assert!(cache.is_scanning());
        assert_eq!(wifi.scans_started(), 1);
    }

    #[test]
    fn test_requests_while_scanning_never_start_another() {
        let wifi = SimWifi::new(Vec::new());
        let cache = cache();
        let now = Instant::now();

        for _ in 0..10 {
            assert_eq!(cache.request(now, &wifi), NetworkListing::Scanning);
        }
        assert!(cache.start(&wifi));
        assert_eq!(wifi.scans_started(), 1);
    }

    #[test]
    fn test_cache_fresh_for_ttl() {
        let wifi = SimWifi::new(Vec::new());
        let cache = cache();
        let t0 = Instant::now();

        cache.request(t0, &wifi);
        assert!(cache.complete(records(2), t0));

        let at_29s = cache.request(t0 + Duration::from_secs(29), &wifi);
        assert_eq!(at_29s, NetworkListing::Networks(records(2)));
        assert_eq!(wifi.scans_started(), 1);

        let at_31s = cache.request(t0 + Duration::from_secs(31), &wifi);
        assert_eq!(at_31s, NetworkListing::Scanning);
        assert_eq!(wifi.scans_started(), 2);
    }

    #[test]
    fn test_keeps_first_five_in_discovery_order() {
        let wifi = SimWifi::new(Vec::new());
        let cache = cache();
        let now = Instant::now();

        cache.request(now, &wifi);
        cache.complete(records(8), now);

        assert_eq!(cache.request(now, &wifi), NetworkListing::Networks(records(5)));
    }

    #[test]
    fn test_empty_result_is_cached() {
        let wifi = SimWifi::new(Vec::new());
        let cache = cache();
        let now = Instant::now();

        cache.request(now, &wifi);
        cache.complete(Vec::new(), now);

        assert_eq!(cache.request(now, &wifi), NetworkListing::Networks(Vec::new()));
        assert_eq!(wifi.scans_started(), 1);
    }

    #[test]
    fn test_refused_scan_is_unavailable() {
        let wifi = SimWifi::new(Vec::new());
        wifi.refuse_scans(true);
        let cache = cache();

        assert_eq!(cache.request(Instant::now(), &wifi), NetworkListing::Unavailable);
        assert!(!cache.is_scanning());
        assert!(!cache.start(&wifi));

        wifi.refuse_scans(false);
        assert_eq!(cache.request(Instant::now(), &wifi), NetworkListing::Scanning);
    }

    #[test]
    fn test_invalidate_drops_cache() {
        let wifi = SimWifi::new(Vec::new());
        let cache = cache();
        let now = Instant::now();

        cache.request(now, &wifi);
        cache.complete(records(3), now);
        cache.invalidate();

        assert_eq!(cache.request(now, &wifi), NetworkListing::Scanning);
        assert_eq!(wifi.scans_started(), 2);
    }

    #[test]
    fn test_invalidate_mid_scan_discards_result() {
        let wifi = SimWifi::new(Vec::new());
        let cache = cache();
        let now = Instant::now();

        cache.request(now, &wifi);
        cache.invalidate();
        assert!(cache.is_scanning());

        assert!(!cache.complete(records(3), now));
        assert!(!cache.is_scanning());
        assert_eq!(wifi.scans_started(), 1);

        // Nothing stale was kept
        assert_eq!(cache.request(now, &wifi), NetworkListing::Scanning);
        assert_eq!(wifi.scans_started(), 2);
    }

    #[test]
    fn test_request_during_invalidated_scan_keeps_result() {
        let wifi = SimWifi::new(Vec::new());
        let cache = cache();
        let now = Instant::now();

        cache.request(now, &wifi);
        cache.invalidate();
        assert_eq!(cache.request(now, &wifi), NetworkListing::Scanning);

        assert!(cache.complete(records(2), now));
        assert_eq!(cache.request(now, &wifi), NetworkListing::Networks(records(2)));
        assert_eq!(wifi.scans_started(), 1);
    }

    #[test]
    fn test_start_during_invalidated_scan_keeps_result() {
        let wifi = SimWifi::new(Vec::new());
        let cache = cache();
        let now = Instant::now();

        cache.request(now, &wifi);
        cache.invalidate();
        assert!(cache.start(&wifi));

        assert!(cache.complete(records(1), now));
        assert_eq!(wifi.scans_started(), 1);
    }

    #[test]
    fn test_failed_scan_returns_to_idle() {
        let wifi = SimWifi::new(Vec::new());
        let cache = cache();
        let now = Instant::now();

        cache.request(now, &wifi);
        cache.fail();
        assert!(!cache.is_scanning());

        assert_eq!(cache.request(now, &wifi), NetworkListing::Scanning);
        assert_eq!(wifi.scans_started(), 2);
    }

    #[test]
    fn test_unsolicited_result_is_ignored() {
        let cache = cache();
        assert!(!cache.complete(records(2), Instant::now()));
    }
}
