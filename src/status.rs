//! Status aggregation

use std::time::Instant;

use common::{DeviceSnapshot, StatusReport};

use crate::context::BridgeContext;

/// Build the status report for the current link state. While unlinked this
/// consults the scan cache, which may start a scan.
pub fn compose(ctx: &BridgeContext, now: Instant) -> StatusReport {
    let config = ctx.config.snapshot();
    let device = DeviceSnapshot {
        heap: ctx.system.free_heap(),
        uptime: ctx.system.uptime().as_secs(),
        ble: ctx.peer.is_connected(),
        saved_ssid: config.ssid,
        autoconnect: config.auto_connect,
        devname: config.device_name,
        nvs_free: ctx.config.free_entries(),
    };

    match ctx.wifi.link_info() {
        Some(link) => StatusReport::linked(link.rssi, link.ip.to_string(), device),
        None => {
            let listing = ctx.scan_cache.request(now, ctx.wifi.as_ref());
            StatusReport::unlinked(device, listing)
        }
    }
}
