//! Host console
//!
//! Runs the bridge core against a simulated radio. Every stdin line is
//! written to the RX characteristic; every notification is printed on its own
//! line prefixed with `<<`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Error;
use ble_wifi_bridge::common::NetworkRecord;
use ble_wifi_bridge::prelude::*;
use ble_wifi_bridge::sim::{SimLed, SimSystem, SimWifi};
use ble_wifi_bridge::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

/// How often the simulated radio reports finished operations.
const RADIO_TICK: Duration = Duration::from_millis(750);

/// MTU the simulated central negotiates.
const CONSOLE_MTU: u16 = 185;

struct StdoutTransport;

impl PeerTransport for StdoutTransport {
    fn notify(&self, chunk: &[u8]) -> Result<(), TransportError> {
        println!("<< {}", String::from_utf8_lossy(chunk));
        Ok(())
    }
}

fn neighbourhood() -> Vec<NetworkRecord> {
    vec![
        NetworkRecord::new("HomeNet", -48, true),
        NetworkRecord::new("CoffeeShop", -67, false),
        NetworkRecord::new("Neighbour-5G", -74, true),
        NetworkRecord::new("PrinterSetup", -81, false),
        NetworkRecord::new("Office", -85, true),
        NetworkRecord::new("FarAway", -92, true),
    ]
}

fn load_settings() -> Result<BridgeSettings, Error> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "bridge.ron".to_string());

    if Path::new(&path).exists() {
        info!("console: loading settings from {}", path);
        Ok(BridgeSettings::load(&path)?)
    } else {
        info!("console: {} not found, using defaults", path);
        Ok(BridgeSettings::default())
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = load_settings()?;

    let wifi = Arc::new(SimWifi::new(neighbourhood()));
    let system = SimSystem::new().on_restart(|| {
        info!("console: restart requested, exiting");
        std::process::exit(0);
    });

    let context = Arc::new(BridgeContext::new(
        settings,
        Collaborators {
            store: Arc::new(MemoryStore::default()),
            wifi: wifi.clone(),
            transport: Arc::new(StdoutTransport),
            system: Arc::new(system),
            indicator: Arc::new(SimLed::new()),
        },
    ));

    // Radio side: finished scans and connects come back on a timer
    let wifi_events = context.wifi_events();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RADIO_TICK);
        loop {
            ticker.tick().await;
            wifi.settle(&wifi_events);
        }
    });

    let dispatcher = Dispatcher::new(context.clone());
    std::thread::Builder::new()
        .name("dispatcher".to_string())
        .spawn(move || dispatcher.run())?;

    // A central connects and subscribes right away
    let peer = context.peer_events();
    peer.connected(1);
    peer.mtu_changed(CONSOLE_MTU);
    peer.subscribed(true);

    println!("Type commands, e.g. help() or connect(\"HomeNet\",\"secret\"). Ctrl-D quits.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        if !peer.received(line.as_bytes()) {
            warn!("console: line not accepted");
        }
    }

    info!("console: stdin closed");
    peer.disconnected(0x13);
    Ok(())
}
