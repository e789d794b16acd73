//! BLE command channel to WiFi station bridge
//!
//! A wireless peer writes text commands; producers turn those writes and
//! radio events into [`queue::Request`]s on a bounded queue; a single
//! [`dispatcher::Dispatcher`] executes them one at a time and answers through
//! the chunked [`notifier::Notifier`].
//!
//! ```text
//! PeerEvents ─┐
//!             ├─▶ CommandQueue ─▶ Dispatcher ─┬─▶ WifiControl
//! WifiEvents ─┘                               ├─▶ ConfigMirror ─▶ KvStore
//!                                             └─▶ Notifier ─▶ PeerTransport
//! ```

#[macro_use]
mod logging;

pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod notifier;
pub mod queue;
pub mod scan_cache;
pub mod services;
pub mod settings;
pub mod sim;
pub mod status;
pub mod store;

pub use common;

pub mod prelude {
    pub use crate::{
        config::*, context::*, dispatcher::*, error::*, events::*, notifier::*, queue::*,
        scan_cache::*, services::*, settings::*, store::*,
    };
}
