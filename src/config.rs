//! In-memory mirror of the persisted configuration
//!
//! Reads go to the mirror, writes go to the store first. The mirror only
//! changes after the store accepted the write and the commit, so it always
//! reflects the last successful write.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::StoreError;
use crate::store::KvStore;

pub const KEY_SSID: &str = "ssid";
pub const KEY_PASSWORD: &str = "password";
pub const KEY_AUTOCONNECT: &str = "autoconnect";
pub const KEY_DEVNAME: &str = "devname";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub ssid: String,
    pub password: String,
    pub device_name: String,
    pub auto_connect: bool,
}

impl Config {
    fn defaults(device_name: &str) -> Self {
        Self {
            ssid: String::new(),
            password: String::new(),
            device_name: device_name.to_string(),
            auto_connect: true,
        }
    }

    pub fn has_credentials(&self) -> bool {
        !self.ssid.is_empty()
    }
}

pub struct ConfigMirror {
    store: Arc<dyn KvStore>,
    current: Mutex<Config>,
    default_device_name: String,
}

impl ConfigMirror {
    /// Read every key, falling back to the default for anything missing.
    /// If any key is unreadable the whole config starts from defaults.
    pub fn load(store: Arc<dyn KvStore>, default_device_name: &str) -> Self {
        let config = match read_all(store.as_ref(), default_device_name) {
            Ok(config) => {
                let ssid = if config.ssid.is_empty() {
                    "(not set)"
                } else {
                    config.ssid.as_str()
                };
                info!(
                    "config: loaded ssid={} autoconnect={} devname={}",
                    ssid, config.auto_connect, config.device_name
                );
                config
            }
            Err(e) => {
                warn!("config: store unreadable ({}), using defaults", e);
                Config::defaults(default_device_name)
            }
        };

        Self {
            store,
            current: Mutex::new(config),
            default_device_name: default_device_name.to_string(),
        }
    }

    pub fn snapshot(&self) -> Config {
        self.lock().clone()
    }

    pub fn free_entries(&self) -> usize {
        self.store.free_entries()
    }

    pub fn save_credentials(&self, ssid: &str, password: &str) -> Result<(), StoreError> {
        let saved = self.write(|store| {
            store.set_str(KEY_SSID, ssid)?;
            store.set_str(KEY_PASSWORD, password)
        });

        if let Err(e) = saved {
            error!("config: saving credentials failed: {}", e);
            // The ssid may have landed without its password
            let previous = self.lock().ssid.clone();
            if let Err(e) = self.write(|store| store.set_str(KEY_SSID, &previous)) {
                error!("config: restoring ssid failed: {}", e);
            }
            return Err(e);
        }

        let mut config = self.lock();
        config.ssid = ssid.to_string();
        config.password = password.to_string();
        Ok(())
    }

    pub fn save_auto_connect(&self, enabled: bool) -> Result<(), StoreError> {
        self.write(|store| store.set_u8(KEY_AUTOCONNECT, u8::from(enabled)))
            .inspect_err(|e| error!("config: saving autoconnect failed: {}", e))?;

        self.lock().auto_connect = enabled;
        Ok(())
    }

    pub fn save_device_name(&self, name: &str) -> Result<(), StoreError> {
        self.write(|store| store.set_str(KEY_DEVNAME, name))
            .inspect_err(|e| error!("config: saving device name failed: {}", e))?;

        self.lock().device_name = name.to_string();
        Ok(())
    }

    /// Erase the whole namespace and go back to defaults.
    pub fn clear_all(&self) -> Result<(), StoreError> {
        self.write(|store| store.erase_all())
            .inspect_err(|e| error!("config: erase failed: {}", e))?;

        *self.lock() = Config::defaults(&self.default_device_name);
        info!("config: all preferences cleared");
        Ok(())
    }

    fn write<F>(&self, apply: F) -> Result<(), StoreError>
    where
        F: FnOnce(&dyn KvStore) -> Result<(), StoreError>,
    {
        apply(self.store.as_ref())?;
        self.store.commit()
    }

    fn lock(&self) -> MutexGuard<'_, Config> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn read_all(store: &dyn KvStore, default_device_name: &str) -> Result<Config, StoreError> {
    let mut config = Config::defaults(default_device_name);
    if let Some(ssid) = store.get_str(KEY_SSID)? {
        config.ssid = ssid;
    }
    if let Some(password) = store.get_str(KEY_PASSWORD)? {
        config.password = password;
    }
    if let Some(flag) = store.get_u8(KEY_AUTOCONNECT)? {
        config.auto_connect = flag != 0;
    }
    if let Some(name) = store.get_str(KEY_DEVNAME)? {
        config.device_name = name;
    }
    Ok(config)
}
