//! Station-mode WiFi over the raw ESP-IDF driver
//!
//! Driver callbacks land in [`wifi_event_handler`] on the default event loop
//! task and are forwarded to the core's [`WifiEvents`] producer.

use std::net::Ipv4Addr;
use std::os::raw::c_void;
use std::ptr;

use anyhow::Result;
use ble_wifi_bridge::error::WifiError;
use ble_wifi_bridge::events::WifiEvents;
use ble_wifi_bridge::services::{LinkInfo, WifiControl};
use ble_wifi_bridge::{debug, info, warn};
use common::NetworkRecord;
use esp_idf_sys::{
    self as sys, esp, esp_event_base_t, esp_event_handler_register, esp_event_loop_create_default,
    esp_netif_init, esp_wifi_init, esp_wifi_set_mode, esp_wifi_set_storage, esp_wifi_start,
    g_wifi_default_wpa_crypto_funcs, g_wifi_osi_funcs, wifi_ap_record_t, wifi_init_config_t,
    wifi_mode_t_WIFI_MODE_STA, wifi_storage_t_WIFI_STORAGE_RAM, EspError, ESP_EVENT_ANY_ID,
    IP_EVENT, WIFI_EVENT, WIFI_INIT_CONFIG_MAGIC,
};
use once_cell::sync::OnceCell;

const SSID_CAPACITY: usize = 32;
const PASSWORD_CAPACITY: usize = 64;

static WIFI_EVENTS: OnceCell<WifiEvents> = OnceCell::new();
/// `esp_netif_t` of the station interface, kept as an address.
static STA_NETIF: OnceCell<usize> = OnceCell::new();

/// Handle on the station driver. Only usable after [`start`].
pub struct StationWifi;

fn driver(err: EspError) -> WifiError {
    WifiError::Driver(err.code())
}

/// Bring up netif, the event loop and the WiFi driver in station mode.
pub fn start(events: WifiEvents) -> Result<()> {
    if WIFI_EVENTS.set(events).is_err() {
        warn!("wifi: already started");
        return Ok(());
    }

    unsafe {
        esp!(esp_netif_init())?;
        esp!(esp_event_loop_create_default())?;

        let netif = sys::esp_netif_create_default_wifi_sta();
        let _ = STA_NETIF.set(netif as usize);

        let cfg = wifi_init_config_t {
            osi_funcs: &raw mut g_wifi_osi_funcs,
            wpa_crypto_funcs: g_wifi_default_wpa_crypto_funcs,
            static_rx_buf_num: 10,
            dynamic_rx_buf_num: 32,
            tx_buf_type: 1,
            static_tx_buf_num: 0,
            dynamic_tx_buf_num: 32,
            cache_tx_buf_num: 0,
            csi_enable: 0,
            ampdu_rx_enable: 1,
            ampdu_tx_enable: 1,
            amsdu_tx_enable: 0,
            nvs_enable: 0,
            nano_enable: 0,
            rx_ba_win: 6,
            wifi_task_core_id: 0,
            beacon_max_len: 752,
            mgmt_sbuf_num: 32,
            feature_caps: sys::WIFI_FEATURE_CAPS as u64,
            sta_disconnected_pm: false,
            espnow_max_encrypt_num: 7,
            magic: WIFI_INIT_CONFIG_MAGIC as i32,
            dump_hesigb_enable: false,
            rx_mgmt_buf_num: 32,
            rx_mgmt_buf_type: 0,
            tx_hetb_queue_num: 0,
        };

        esp!(esp_wifi_init(&cfg))?;

        esp!(esp_event_handler_register(
            WIFI_EVENT,
            ESP_EVENT_ANY_ID,
            Some(wifi_event_handler),
            ptr::null_mut(),
        ))?;
        esp!(esp_event_handler_register(
            IP_EVENT,
            sys::ip_event_t_IP_EVENT_STA_GOT_IP as i32,
            Some(wifi_event_handler),
            ptr::null_mut(),
        ))?;

        // Credentials live in the bridge namespace, not the driver's
        esp!(esp_wifi_set_storage(wifi_storage_t_WIFI_STORAGE_RAM))?;
        esp!(esp_wifi_set_mode(wifi_mode_t_WIFI_MODE_STA))?;
        esp!(esp_wifi_start())?;
    }

    info!("wifi: station started");
    Ok(())
}

unsafe extern "C" fn wifi_event_handler(
    _arg: *mut c_void,
    event_base: esp_event_base_t,
    event_id: i32,
    event_data: *mut c_void,
) {
    let Some(events) = WIFI_EVENTS.get() else {
        return;
    };

    if event_base == WIFI_EVENT {
        match event_id as u32 {
            sys::wifi_event_t_WIFI_EVENT_STA_START => {
                info!("wifi: station interface up");
            }
            sys::wifi_event_t_WIFI_EVENT_STA_CONNECTED => {
                info!("wifi: associated, waiting for address");
            }
            sys::wifi_event_t_WIFI_EVENT_STA_DISCONNECTED => {
                let reason = if event_data.is_null() {
                    0
                } else {
                    let event = event_data as *const sys::wifi_event_sta_disconnected_t;
                    (*event).reason as u8
                };
                events.disconnected(reason);
            }
            sys::wifi_event_t_WIFI_EVENT_SCAN_DONE => {
                let status = if event_data.is_null() {
                    1
                } else {
                    let event = event_data as *const sys::wifi_event_sta_scan_done_t;
                    (*event).status
                };

                if status != 0 {
                    warn!("wifi: scan finished with status {}", status);
                    events.scan_failed();
                    return;
                }

                match read_scan_records() {
                    Ok(networks) => events.scan_done(networks),
                    Err(err) => {
                        warn!("wifi: could not read scan records: {}", err);
                        events.scan_failed();
                    }
                }
            }
            other => debug!("wifi: unhandled event {}", other),
        }
    } else if event_base == IP_EVENT && event_id as u32 == sys::ip_event_t_IP_EVENT_STA_GOT_IP {
        if event_data.is_null() {
            return;
        }
        let event = event_data as *const sys::ip_event_got_ip_t;
        events.got_ip(ipv4((*event).ip_info.ip));
    }
}

/// lwIP keeps addresses in network order.
fn ipv4(addr: sys::esp_ip4_addr_t) -> Ipv4Addr {
    Ipv4Addr::from(addr.addr.to_le_bytes())
}

fn read_scan_records() -> Result<Vec<NetworkRecord>, EspError> {
    unsafe {
        let mut ap_count: u16 = 0;
        esp!(sys::esp_wifi_scan_get_ap_num(&mut ap_count))?;

        let mut aps: Vec<wifi_ap_record_t> = vec![std::mem::zeroed(); ap_count as usize];
        let mut actual_count = ap_count;
        esp!(sys::esp_wifi_scan_get_ap_records(&mut actual_count, aps.as_mut_ptr()))?;
        aps.truncate(actual_count as usize);

        Ok(aps.iter().map(network_record).collect())
    }
}

fn network_record(ap: &wifi_ap_record_t) -> NetworkRecord {
    let end = ap.ssid.iter().position(|&b| b == 0).unwrap_or(ap.ssid.len());
    let ssid = String::from_utf8_lossy(&ap.ssid[..end]).into_owned();
    let secured = ap.authmode != sys::wifi_auth_mode_t_WIFI_AUTH_OPEN;
    NetworkRecord::new(ssid, ap.rssi, secured)
}

impl WifiControl for StationWifi {
    fn connect(&self, ssid: &str, password: &str) -> Result<(), WifiError> {
        if ssid.len() > SSID_CAPACITY || password.len() > PASSWORD_CAPACITY {
            return Err(WifiError::CredentialsTooLong);
        }

        unsafe {
            let mut config: sys::wifi_config_t = std::mem::zeroed();
            config.sta.ssid[..ssid.len()].copy_from_slice(ssid.as_bytes());
            config.sta.password[..password.len()].copy_from_slice(password.as_bytes());

            if let Err(err) = esp!(sys::esp_wifi_disconnect()) {
                debug!("wifi: disconnect before connect: {}", err);
            }
            esp!(sys::esp_wifi_set_config(sys::wifi_interface_t_WIFI_IF_STA, &mut config))
                .map_err(driver)?;
            esp!(sys::esp_wifi_connect()).map_err(driver)?;
        }

        info!("wifi: associating with {}", ssid);
        Ok(())
    }

    fn disconnect(&self) -> Result<(), WifiError> {
        info!("wifi: disconnecting");
        unsafe { esp!(sys::esp_wifi_disconnect()) }.map_err(driver)
    }

    fn start_scan(&self) -> Result<(), WifiError> {
        unsafe {
            let scan_config = sys::wifi_scan_config_t {
                ssid: ptr::null_mut(),
                bssid: ptr::null_mut(),
                channel: 0,
                show_hidden: false,
                scan_type: sys::wifi_scan_type_t_WIFI_SCAN_TYPE_ACTIVE,
                scan_time: sys::wifi_scan_time_t {
                    active: sys::wifi_active_scan_time_t { min: 100, max: 300 },
                    passive: 0,
                },
                home_chan_dwell_time: 0,
                channel_bitmap: sys::wifi_scan_channel_bitmap_t {
                    ghz_2_channels: 0xFFFF,
                    ghz_5_channels: 0,
                },
            };

            // Completion arrives as WIFI_EVENT_SCAN_DONE
            esp!(sys::esp_wifi_scan_start(&scan_config, false)).map_err(driver)?;
        }

        info!("wifi: scan started");
        Ok(())
    }

    fn link_info(&self) -> Option<LinkInfo> {
        unsafe {
            let mut ap: wifi_ap_record_t = std::mem::zeroed();
            if sys::esp_wifi_sta_get_ap_info(&mut ap) != sys::ESP_OK {
                return None;
            }

            let mut ip_info: sys::esp_netif_ip_info_t = std::mem::zeroed();
            let ip = match STA_NETIF.get() {
                Some(&netif)
                    if sys::esp_netif_get_ip_info(netif as *mut sys::esp_netif_t, &mut ip_info)
                        == sys::ESP_OK =>
                {
                    ipv4(ip_info.ip)
                }
                _ => Ipv4Addr::UNSPECIFIED,
            };

            Some(LinkInfo { rssi: ap.rssi, ip })
        }
    }
}
