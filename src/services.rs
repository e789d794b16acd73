//! Collaborators the core drives but does not own
//!
//! The firmware implements these on top of ESP-IDF; [`crate::sim`] has
//! host-side stand-ins.

use std::net::Ipv4Addr;
use std::time::Duration;

use crate::error::{TransportError, WifiError};

/// Station link details while associated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkInfo {
    pub rssi: i8,
    /// `0.0.0.0` until DHCP completes.
    pub ip: Ipv4Addr,
}

pub trait WifiControl: Send + Sync {
    /// Drop any current association, apply the credentials and start
    /// associating. Completion is reported through the network events.
    fn connect(&self, ssid: &str, password: &str) -> Result<(), WifiError>;
    fn disconnect(&self) -> Result<(), WifiError>;
    /// Start a non-blocking scan. Results arrive through the network events.
    fn start_scan(&self) -> Result<(), WifiError>;
    /// `None` while not associated.
    fn link_info(&self) -> Option<LinkInfo>;
}

pub trait PeerTransport: Send + Sync {
    /// Send one notification on the TX characteristic.
    fn notify(&self, chunk: &[u8]) -> Result<(), TransportError>;
}

pub trait SystemControl: Send + Sync {
    fn free_heap(&self) -> u32;
    fn uptime(&self) -> Duration;
    /// Reboot. On the device this does not return.
    fn restart(&self);
}

/// Board diagnostic outputs.
pub trait Indicator: Send + Sync {
    /// Flip the outputs and return the new level.
    fn toggle(&self) -> bool;
}
