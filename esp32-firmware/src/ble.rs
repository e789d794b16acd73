//! NimBLE GATT peripheral
//!
//! One primary service with a notify characteristic (TX) and a write
//! characteristic (RX). GAP and GATT callbacks run on the NimBLE host task;
//! they only touch atomics and hand everything else to [`PeerEvents`].

use std::ffi::{c_char, CStr, CString};
use std::os::raw::c_void;
use std::ptr;
use std::sync::atomic::{AtomicU16, AtomicU8, Ordering};

use anyhow::Result;
use ble_wifi_bridge::error::TransportError;
use ble_wifi_bridge::events::PeerEvents;
use ble_wifi_bridge::services::PeerTransport;
use ble_wifi_bridge::{debug, error, info, warn};
use esp_idf_sys::{
    self as sys, ble_gap_adv_params, ble_gap_event, ble_gatt_access_ctxt, ble_gatt_chr_def,
    ble_gatt_svc_def, ble_hs_adv_fields, ble_uuid128_t, ble_uuid_t, esp,
};
use once_cell::sync::OnceCell;

/// Largest ATT MTU the host will negotiate.
const PREFERRED_MTU: u16 = 517;

/// Flattened RX writes; anything longer is refused by the host anyway.
const RX_BUFFER: usize = 512;

const CONN_HANDLE_NONE: u16 = sys::BLE_HS_CONN_HANDLE_NONE as u16;

const fn uuid128(short: u8) -> ble_uuid128_t {
    // 6e4000xx-b5a3-f393-e0a9-e50e24dcca9e, little endian
    ble_uuid128_t {
        u: ble_uuid_t {
            type_: sys::BLE_UUID_TYPE_128 as u8,
        },
        value: [
            0x9e, 0xca, 0xdc, 0x24, 0x0e, 0xe5, 0xa9, 0xe0, 0x93, 0xf3, 0xa3, 0xb5, short, 0x00,
            0x40, 0x6e,
        ],
    }
}

static SERVICE_UUID: ble_uuid128_t = uuid128(0x01);
static RX_UUID: ble_uuid128_t = uuid128(0x02);
static TX_UUID: ble_uuid128_t = uuid128(0x03);

static PEER_EVENTS: OnceCell<PeerEvents> = OnceCell::new();
static CONN_HANDLE: AtomicU16 = AtomicU16::new(CONN_HANDLE_NONE);
static OWN_ADDR_TYPE: AtomicU8 = AtomicU8::new(0);
/// Written by the host when the service table is registered.
static mut TX_VAL_HANDLE: u16 = 0;

fn tx_handle() -> u16 {
    unsafe { ptr::read_volatile(&raw const TX_VAL_HANDLE) }
}

/// Notifications out of the TX characteristic.
pub struct BleTransport;

impl PeerTransport for BleTransport {
    fn notify(&self, chunk: &[u8]) -> Result<(), TransportError> {
        let conn = CONN_HANDLE.load(Ordering::Acquire);
        let attr = tx_handle();
        if conn == CONN_HANDLE_NONE || attr == 0 {
            return Err(TransportError::NotSubscribed);
        }

        unsafe {
            let om = sys::ble_hs_mbuf_from_flat(chunk.as_ptr() as *const c_void, chunk.len() as u16);
            if om.is_null() {
                return Err(TransportError::Notify(sys::BLE_HS_ENOMEM as i32));
            }
            // The host takes the mbuf on every path
            let rc = sys::ble_gatts_notify_custom(conn, attr, om);
            if rc != 0 {
                return Err(TransportError::Notify(rc));
            }
        }
        Ok(())
    }
}

/// Register the GATT table, name the device and start the host task.
/// Advertising begins once the host syncs with the controller.
pub fn start(device_name: &str, events: PeerEvents) -> Result<()> {
    if PEER_EVENTS.set(events).is_err() {
        warn!("ble: already started");
        return Ok(());
    }

    let name = CString::new(device_name)?;

    unsafe {
        esp!(sys::nimble_port_init())?;

        sys::ble_hs_cfg.sync_cb = Some(on_sync);
        sys::ble_hs_cfg.reset_cb = Some(on_reset);
        sys::ble_hs_cfg.store_status_cb = Some(sys::ble_store_util_status_rr);

        sys::ble_att_set_preferred_mtu(PREFERRED_MTU);

        sys::ble_svc_gap_init();
        sys::ble_svc_gatt_init();

        let rc = sys::ble_svc_gap_device_name_set(name.as_ptr());
        if rc != 0 {
            warn!("ble: could not set device name ({})", rc);
        }

        let services = service_table();
        let rc = sys::ble_gatts_count_cfg(services);
        if rc != 0 {
            anyhow::bail!("ble: gatt table rejected ({})", rc);
        }
        let rc = sys::ble_gatts_add_svcs(services);
        if rc != 0 {
            anyhow::bail!("ble: gatt table not added ({})", rc);
        }

        sys::nimble_port_freertos_init(Some(host_task));
    }

    info!("ble: peripheral initialised as {}", device_name);
    Ok(())
}

/// The host keeps pointers into the table for its whole life, so it is
/// leaked.
fn service_table() -> *const ble_gatt_svc_def {
    let characteristics: &'static mut [ble_gatt_chr_def] = Box::leak(Box::new([
        ble_gatt_chr_def {
            uuid: &TX_UUID as *const ble_uuid128_t as *const ble_uuid_t,
            access_cb: Some(on_access),
            flags: sys::BLE_GATT_CHR_F_NOTIFY as u16,
            val_handle: unsafe { &raw mut TX_VAL_HANDLE },
            ..unsafe { std::mem::zeroed() }
        },
        ble_gatt_chr_def {
            uuid: &RX_UUID as *const ble_uuid128_t as *const ble_uuid_t,
            access_cb: Some(on_access),
            flags: (sys::BLE_GATT_CHR_F_WRITE | sys::BLE_GATT_CHR_F_WRITE_NO_RSP) as u16,
            ..unsafe { std::mem::zeroed() }
        },
        unsafe { std::mem::zeroed() },
    ]));

    let services: &'static mut [ble_gatt_svc_def] = Box::leak(Box::new([
        ble_gatt_svc_def {
            type_: sys::BLE_GATT_SVC_TYPE_PRIMARY as u8,
            uuid: &SERVICE_UUID as *const ble_uuid128_t as *const ble_uuid_t,
            characteristics: characteristics.as_ptr(),
            ..unsafe { std::mem::zeroed() }
        },
        unsafe { std::mem::zeroed() },
    ]));

    services.as_ptr()
}

unsafe extern "C" fn host_task(_param: *mut c_void) {
    info!("ble: host task running");
    sys::nimble_port_run();
    sys::nimble_port_freertos_deinit();
}

unsafe extern "C" fn on_reset(reason: i32) {
    error!("ble: host reset, reason {}", reason);
}

unsafe extern "C" fn on_sync() {
    let rc = sys::ble_hs_util_ensure_addr(0);
    if rc != 0 {
        error!("ble: no usable address ({})", rc);
        return;
    }

    let mut addr_type: u8 = 0;
    let rc = sys::ble_hs_id_infer_auto(0, &mut addr_type);
    if rc != 0 {
        error!("ble: could not determine address type ({})", rc);
        return;
    }
    OWN_ADDR_TYPE.store(addr_type, Ordering::Release);

    info!("ble: host synced");
    start_advertising();
}

fn start_advertising() {
    unsafe {
        let name = CStr::from_ptr(sys::ble_svc_gap_device_name() as *const c_char);
        let name = name.to_bytes();

        let mut fields: ble_hs_adv_fields = std::mem::zeroed();
        fields.flags = (sys::BLE_HS_ADV_F_DISC_GEN | sys::BLE_HS_ADV_F_BREDR_UNSUP) as u8;
        fields.name = name.as_ptr();
        fields.name_len = name.len() as u8;
        fields.set_name_is_complete(1);

        let rc = sys::ble_gap_adv_set_fields(&fields);
        if rc != 0 {
            error!("ble: advertisement data rejected ({})", rc);
            return;
        }

        // The 128-bit UUID does not fit next to the name
        let mut response: ble_hs_adv_fields = std::mem::zeroed();
        response.uuids128 = &SERVICE_UUID;
        response.num_uuids128 = 1;
        response.set_uuids128_is_complete(1);

        let rc = sys::ble_gap_adv_rsp_set_fields(&response);
        if rc != 0 {
            error!("ble: scan response rejected ({})", rc);
            return;
        }

        let mut params: ble_gap_adv_params = std::mem::zeroed();
        params.conn_mode = sys::BLE_GAP_CONN_MODE_UND as u8;
        params.disc_mode = sys::BLE_GAP_DISC_MODE_GEN as u8;

        let rc = sys::ble_gap_adv_start(
            OWN_ADDR_TYPE.load(Ordering::Acquire),
            ptr::null(),
            sys::BLE_HS_FOREVER as i32,
            &params,
            Some(on_gap_event),
            ptr::null_mut(),
        );
        if rc != 0 {
            error!("ble: advertising not started ({})", rc);
            return;
        }

        info!("ble: advertising as {}", String::from_utf8_lossy(name));
    }
}

unsafe extern "C" fn on_gap_event(event: *mut ble_gap_event, _arg: *mut c_void) -> i32 {
    let Some(events) = PEER_EVENTS.get() else {
        return 0;
    };
    let event = &*event;

    match event.type_ as u32 {
        sys::BLE_GAP_EVENT_CONNECT => {
            let connect = event.__bindgen_anon_1.connect;
            if connect.status == 0 {
                CONN_HANDLE.store(connect.conn_handle, Ordering::Release);
                events.connected(connect.conn_handle);
            } else {
                warn!("ble: connection failed ({}), advertising again", connect.status);
                start_advertising();
            }
        }
        sys::BLE_GAP_EVENT_DISCONNECT => {
            let disconnect = event.__bindgen_anon_1.disconnect;
            CONN_HANDLE.store(CONN_HANDLE_NONE, Ordering::Release);
            events.disconnected(disconnect.reason);
            start_advertising();
        }
        sys::BLE_GAP_EVENT_SUBSCRIBE => {
            let subscribe = event.__bindgen_anon_1.subscribe;
            if subscribe.attr_handle == tx_handle() {
                events.subscribed(subscribe.cur_notify() != 0);
            }
        }
        sys::BLE_GAP_EVENT_MTU => {
            let mtu = event.__bindgen_anon_1.mtu;
            events.mtu_changed(mtu.value);
        }
        sys::BLE_GAP_EVENT_ADV_COMPLETE => {
            debug!("ble: advertising complete");
        }
        other => debug!("ble: unhandled gap event {}", other),
    }
    0
}

unsafe extern "C" fn on_access(
    _conn_handle: u16,
    _attr_handle: u16,
    ctxt: *mut ble_gatt_access_ctxt,
    _arg: *mut c_void,
) -> i32 {
    if (*ctxt).op as u32 != sys::BLE_GATT_ACCESS_OP_WRITE_CHR {
        return sys::BLE_ATT_ERR_UNLIKELY as i32;
    }

    let mut buf = [0u8; RX_BUFFER];
    let mut len: u16 = 0;
    let rc = sys::ble_hs_mbuf_to_flat(
        (*ctxt).om,
        buf.as_mut_ptr() as *mut c_void,
        buf.len() as u16,
        &mut len,
    );
    if rc != 0 {
        warn!("ble: rx write could not be read ({})", rc);
        return 0;
    }

    if let Some(events) = PEER_EVENTS.get() {
        events.received(&buf[..len as usize]);
    }
    0
}
