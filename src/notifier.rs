//! Outbound notifications to the connected peer
//!
//! Messages are cut into chunks that fit one notification at the negotiated
//! MTU and sent in order with a short pause in between. Chunks carry no
//! framing; the peer reassembles by concatenation.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use common::{ATT_HEADER, DEFAULT_MTU, MIN_CHUNK};

use crate::error::TransportError;
use crate::services::PeerTransport;

/// Connection state of the single peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PeerConnectionState {
    pub connected: bool,
    pub handle: Option<u16>,
    pub mtu: u16,
    /// Notifications enabled on the TX characteristic.
    pub subscribed: bool,
}

impl Default for PeerConnectionState {
    fn default() -> Self {
        Self {
            connected: false,
            handle: None,
            mtu: DEFAULT_MTU,
            subscribed: false,
        }
    }
}

impl PeerConnectionState {
    pub fn chunk_size(&self) -> usize {
        chunk_size(self.mtu)
    }
}

/// Bytes of payload per notification at `mtu`.
pub fn chunk_size(mtu: u16) -> usize {
    usize::from(mtu).saturating_sub(ATT_HEADER).max(MIN_CHUNK)
}

/// Written only by the connection lifecycle callbacks.
#[derive(Default)]
pub struct PeerLink {
    state: Mutex<PeerConnectionState>,
}

impl PeerLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connect(&self, handle: u16) {
        *self.lock() = PeerConnectionState {
            connected: true,
            handle: Some(handle),
            ..PeerConnectionState::default()
        };
    }

    pub fn on_disconnect(&self) {
        *self.lock() = PeerConnectionState::default();
    }

    pub fn on_mtu(&self, mtu: u16) {
        self.lock().mtu = mtu;
    }

    pub fn on_subscribe(&self, subscribed: bool) {
        self.lock().subscribed = subscribed;
    }

    pub fn snapshot(&self) -> PeerConnectionState {
        *self.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    fn lock(&self) -> MutexGuard<'_, PeerConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct Notifier {
    link: Arc<PeerLink>,
    transport: Arc<dyn PeerTransport>,
    pacing: Duration,
}

impl Notifier {
    pub fn new(link: Arc<PeerLink>, transport: Arc<dyn PeerTransport>, pacing: Duration) -> Self {
        Self {
            link,
            transport,
            pacing,
        }
    }

    /// Send `message` to the subscribed peer. Returns the number of chunks
    /// that went out. A failed chunk is logged and skipped, never retried.
    pub fn send(&self, message: &str) -> Result<usize, TransportError> {
        let peer = self.link.snapshot();
        if !peer.subscribed {
            warn!("notifier: no subscriber, dropped {} bytes", message.len());
            return Err(TransportError::NotSubscribed);
        }

        let bytes = message.as_bytes();
        if bytes.is_empty() {
            return self.transport.notify(&[]).map(|()| 1).inspect_err(|e| {
                warn!("notifier: empty notification failed: {}", e);
            });
        }

        let mut sent = 0;
        for (index, chunk) in bytes.chunks(peer.chunk_size()).enumerate() {
            if index > 0 && !self.pacing.is_zero() {
                thread::sleep(self.pacing);
            }

            match self.transport.notify(chunk) {
                Ok(()) => sent += 1,
                Err(e) => warn!("notifier: chunk {} ({} bytes) failed: {}", index, chunk.len(), e),
            }
        }

        debug!("notifier: sent {} bytes in {} chunks", bytes.len(), sent);
        Ok(sent)
    }
}
