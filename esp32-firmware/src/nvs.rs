//! NVS-backed key-value store
//!
//! One read-write handle on the bridge namespace stays open for the life of
//! the firmware. If the namespace cannot be opened at boot the store reports
//! itself unavailable and the bridge runs on defaults.

use std::ffi::{c_char, CString};
use std::ptr;
use std::sync::{Mutex, PoisonError};

use ble_wifi_bridge::error::StoreError;
use ble_wifi_bridge::store::{KvStore, MAX_KEY_LEN};
use ble_wifi_bridge::{info, warn};
use esp_idf_svc::sys::{
    self as sys, esp, nvs_close, nvs_commit, nvs_erase_all, nvs_get_stats, nvs_get_str, nvs_get_u8,
    nvs_handle_t, nvs_open, nvs_open_mode_t_NVS_READWRITE, nvs_set_str, nvs_set_u8, nvs_stats_t,
    EspError, ESP_ERR_NVS_NEW_VERSION_FOUND, ESP_ERR_NVS_NOT_FOUND, ESP_ERR_NVS_NO_FREE_PAGES,
    ESP_OK,
};

/// Initialise the default NVS partition, wiping it when it is full or was
/// written by a newer IDF.
pub fn init_flash() -> Result<(), EspError> {
    unsafe {
        let ret = sys::nvs_flash_init();
        if ret == ESP_ERR_NVS_NO_FREE_PAGES as i32 || ret == ESP_ERR_NVS_NEW_VERSION_FOUND as i32 {
            warn!("nvs: partition unusable ({}), erasing", ret);
            esp!(sys::nvs_flash_erase())?;
            return esp!(sys::nvs_flash_init());
        }
        esp!(ret)
    }
}

pub struct NvsStore {
    handle: Mutex<Option<nvs_handle_t>>,
}

impl NvsStore {
    pub fn open(namespace: &str) -> Self {
        let handle = match CString::new(namespace) {
            Ok(name) => {
                let mut handle: nvs_handle_t = 0;
                let ret = unsafe { nvs_open(name.as_ptr(), nvs_open_mode_t_NVS_READWRITE, &mut handle) };
                if ret == ESP_OK {
                    info!("nvs: opened namespace {}", namespace);
                    Some(handle)
                } else {
                    warn!("nvs: failed to open namespace {}: {}", namespace, ret);
                    None
                }
            }
            Err(_) => None,
        };

        Self {
            handle: Mutex::new(handle),
        }
    }

    fn handle(&self) -> Result<nvs_handle_t, StoreError> {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .ok_or(StoreError::Unavailable)
    }
}

impl Drop for NvsStore {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
            unsafe { nvs_close(handle) };
        }
    }
}

fn key_name(key: &'static str) -> Result<CString, StoreError> {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(StoreError::BadKey(key));
    }
    CString::new(key).map_err(|_| StoreError::BadKey(key))
}

impl KvStore for NvsStore {
    fn get_str(&self, key: &'static str) -> Result<Option<String>, StoreError> {
        let handle = self.handle()?;
        let name = key_name(key)?;

        unsafe {
            // First call sizes the value, including its nul
            let mut len: usize = 0;
            let ret = nvs_get_str(handle, name.as_ptr(), ptr::null_mut(), &mut len);
            if ret == ESP_ERR_NVS_NOT_FOUND as i32 {
                return Ok(None);
            }
            if ret != ESP_OK {
                return Err(StoreError::Read { key, code: ret });
            }

            let mut buf = vec![0u8; len];
            let ret = nvs_get_str(handle, name.as_ptr(), buf.as_mut_ptr() as *mut c_char, &mut len);
            if ret != ESP_OK {
                return Err(StoreError::Read { key, code: ret });
            }

            let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
            buf.truncate(end);
            Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
        }
    }

    fn get_u8(&self, key: &'static str) -> Result<Option<u8>, StoreError> {
        let handle = self.handle()?;
        let name = key_name(key)?;

        let mut value: u8 = 0;
        let ret = unsafe { nvs_get_u8(handle, name.as_ptr(), &mut value) };
        match ret {
            ESP_OK => Ok(Some(value)),
            _ if ret == ESP_ERR_NVS_NOT_FOUND as i32 => Ok(None),
            _ => Err(StoreError::Read { key, code: ret }),
        }
    }

    fn set_str(&self, key: &'static str, value: &str) -> Result<(), StoreError> {
        let handle = self.handle()?;
        let name = key_name(key)?;
        let value = CString::new(value).map_err(|_| StoreError::Write {
            key,
            code: sys::ESP_ERR_INVALID_ARG as i32,
        })?;

        let ret = unsafe { nvs_set_str(handle, name.as_ptr(), value.as_ptr()) };
        if ret != ESP_OK {
            return Err(StoreError::Write { key, code: ret });
        }
        Ok(())
    }

    fn set_u8(&self, key: &'static str, value: u8) -> Result<(), StoreError> {
        let handle = self.handle()?;
        let name = key_name(key)?;

        let ret = unsafe { nvs_set_u8(handle, name.as_ptr(), value) };
        if ret != ESP_OK {
            return Err(StoreError::Write { key, code: ret });
        }
        Ok(())
    }

    fn commit(&self) -> Result<(), StoreError> {
        let handle = self.handle()?;
        let ret = unsafe { nvs_commit(handle) };
        if ret != ESP_OK {
            return Err(StoreError::Commit(ret));
        }
        Ok(())
    }

    fn erase_all(&self) -> Result<(), StoreError> {
        let handle = self.handle()?;
        let ret = unsafe { nvs_erase_all(handle) };
        if ret != ESP_OK {
            return Err(StoreError::Erase(ret));
        }
        self.commit()
    }

    fn free_entries(&self) -> usize {
        let mut stats: nvs_stats_t = unsafe { std::mem::zeroed() };
        let ret = unsafe { nvs_get_stats(ptr::null(), &mut stats) };
        if ret != ESP_OK {
            warn!("nvs: stats unavailable: {}", ret);
            return 0;
        }
        stats.free_entries as usize
    }
}
