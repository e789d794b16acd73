//! Composition root
//!
//! Everything the dispatcher and the producers share lives in one
//! [`BridgeContext`], built once at boot and handed out by reference.

use std::sync::Arc;

use crate::config::ConfigMirror;
use crate::events::{PeerEvents, WifiEvents};
use crate::notifier::{Notifier, PeerLink};
use crate::queue::CommandQueue;
use crate::scan_cache::ScanCache;
use crate::services::{Indicator, PeerTransport, SystemControl, WifiControl};
use crate::settings::BridgeSettings;
use crate::store::KvStore;

/// Platform pieces the core is wired to.
pub struct Collaborators {
    pub store: Arc<dyn KvStore>,
    pub wifi: Arc<dyn WifiControl>,
    pub transport: Arc<dyn PeerTransport>,
    pub system: Arc<dyn SystemControl>,
    pub indicator: Arc<dyn Indicator>,
}

pub struct BridgeContext {
    pub settings: BridgeSettings,
    pub queue: Arc<CommandQueue>,
    pub config: ConfigMirror,
    pub scan_cache: Arc<ScanCache>,
    pub peer: Arc<PeerLink>,
    pub notifier: Notifier,
    pub wifi: Arc<dyn WifiControl>,
    pub system: Arc<dyn SystemControl>,
    pub indicator: Arc<dyn Indicator>,
}

impl BridgeContext {
    pub fn new(settings: BridgeSettings, parts: Collaborators) -> Self {
        let queue = Arc::new(CommandQueue::new(
            settings.queue_capacity,
            settings.post_timeout(),
        ));
        let config = ConfigMirror::load(parts.store, &settings.default_device_name);
        let scan_cache = Arc::new(ScanCache::new(settings.scan_ttl(), settings.max_networks));
        let peer = Arc::new(PeerLink::new());
        let notifier = Notifier::new(peer.clone(), parts.transport, settings.chunk_pacing());

        Self {
            settings,
            queue,
            config,
            scan_cache,
            peer,
            notifier,
            wifi: parts.wifi,
            system: parts.system,
            indicator: parts.indicator,
        }
    }

    pub fn wifi_events(&self) -> WifiEvents {
        WifiEvents::new(self.queue.clone(), self.scan_cache.clone())
    }

    pub fn peer_events(&self) -> PeerEvents {
        PeerEvents::new(self.queue.clone(), self.peer.clone())
    }
}
