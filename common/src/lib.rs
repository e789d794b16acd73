//! Wire protocol shared by the bridge core and the ESP32 firmware.
//!
//! A peer writes one line of text per command (see [`command`]) and receives
//! one reply per command (see [`reply`]), either raw text (`echo`) or a single
//! JSON object.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod command;
pub mod reply;

pub use command::{
    Command, ParseError, RawCommand, ATT_HEADER, AUTOCONNECT_USAGE, COMMAND_MAX_LEN, CONNECT_USAGE,
    DEFAULT_MTU, HELP_SIGNATURES, MIN_CHUNK, SETNAME_USAGE,
};
pub use reply::{
    DeviceSnapshot, LinkedStatus, NetworkListing, NetworkRecord, Reply, StatusReport,
    UnlinkedStatus,
};
