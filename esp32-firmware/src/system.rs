//! Chip services: heap, uptime, restart, and the diagnostic LED pair.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use ble_wifi_bridge::services::{Indicator, SystemControl};
use ble_wifi_bridge::{info, warn};
use esp_idf_hal::gpio::{Gpio22, Gpio23, Output, PinDriver};
use esp_idf_sys as sys;

pub struct EspSystem;

impl SystemControl for EspSystem {
    fn free_heap(&self) -> u32 {
        unsafe { sys::esp_get_free_heap_size() }
    }

    fn uptime(&self) -> Duration {
        let micros = unsafe { sys::esp_timer_get_time() };
        Duration::from_micros(micros.max(0) as u64)
    }

    fn restart(&self) {
        info!("system: restarting");
        unsafe { sys::esp_restart() };
    }
}

/// Both outputs follow the same level.
pub struct StatusLed {
    pins: Mutex<(
        PinDriver<'static, Gpio23, Output>,
        PinDriver<'static, Gpio22, Output>,
    )>,
    level: AtomicBool,
}

impl StatusLed {
    pub fn new(primary: Gpio23, secondary: Gpio22) -> Result<Self> {
        let mut primary = PinDriver::output(primary)?;
        let mut secondary = PinDriver::output(secondary)?;
        primary.set_low()?;
        secondary.set_low()?;

        Ok(Self {
            pins: Mutex::new((primary, secondary)),
            level: AtomicBool::new(false),
        })
    }
}

impl Indicator for StatusLed {
    fn toggle(&self) -> bool {
        let mut pins = self.pins.lock().unwrap_or_else(PoisonError::into_inner);
        let level = !self.level.load(Ordering::Acquire);

        let result = if level {
            pins.0.set_high().and_then(|_| pins.1.set_high())
        } else {
            pins.0.set_low().and_then(|_| pins.1.set_low())
        };
        if let Err(err) = result {
            warn!("system: led write failed: {}", err);
        }

        self.level.store(level, Ordering::Release);
        level
    }
}
