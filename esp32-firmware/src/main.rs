use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use ble_wifi_bridge::prelude::*;
use ble_wifi_bridge::{debug, info};
use esp_idf_hal::peripherals::Peripherals;

mod ble;
mod nvs;
mod system;
mod wifi;

use ble::BleTransport;
use nvs::NvsStore;
use system::{EspSystem, StatusLed};
use wifi::StationWifi;

const DISPATCHER_STACK: usize = 8 * 1024;
const HEAP_REPORT_INTERVAL: Duration = Duration::from_secs(60);

fn main() -> Result<()> {
    esp_idf_sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    info!("main: BLE WiFi bridge {} starting", env!("CARGO_PKG_VERSION"));

    nvs::init_flash()?;

    let peripherals = Peripherals::take()?;
    let led = StatusLed::new(peripherals.pins.gpio23, peripherals.pins.gpio22)?;

    let system = Arc::new(EspSystem);
    let context = Arc::new(BridgeContext::new(
        BridgeSettings::default(),
        Collaborators {
            store: Arc::new(NvsStore::open(NAMESPACE)),
            wifi: Arc::new(StationWifi),
            transport: Arc::new(BleTransport),
            system: system.clone(),
            indicator: Arc::new(led),
        },
    ));

    info!("main: initialising WiFi");
    wifi::start(context.wifi_events())?;

    info!("main: initialising BLE");
    let device_name = context.config.snapshot().device_name;
    ble::start(&device_name, context.peer_events())?;

    let dispatcher = Dispatcher::new(context.clone());
    thread::Builder::new()
        .name("dispatcher".to_string())
        .stack_size(DISPATCHER_STACK)
        .spawn(move || dispatcher.run())?;

    info!("main: ready, free heap {} bytes", system.free_heap());

    loop {
        thread::sleep(HEAP_REPORT_INTERVAL);
        debug!(
            "main: free heap {} bytes, {} queued",
            system.free_heap(),
            context.queue.len()
        );
    }
}
