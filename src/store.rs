//! Persistent key-value store seam
//!
//! The firmware backs this with an NVS namespace; tests and the host console
//! use [`MemoryStore`].

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::error::StoreError;

/// Namespace every key lives under.
pub const NAMESPACE: &str = "config";

/// NVS keys are limited to 15 bytes.
pub const MAX_KEY_LEN: usize = 15;

/// Bytes of string payload per NVS entry.
const ENTRY_SIZE: usize = 32;

/// `ESP_FAIL`, reported for keys set up to fail.
const ERR_FAIL: i32 = -1;

pub trait KvStore: Send + Sync {
    fn get_str(&self, key: &'static str) -> Result<Option<String>, StoreError>;
    fn get_u8(&self, key: &'static str) -> Result<Option<u8>, StoreError>;
    fn set_str(&self, key: &'static str, value: &str) -> Result<(), StoreError>;
    fn set_u8(&self, key: &'static str, value: u8) -> Result<(), StoreError>;
    fn commit(&self) -> Result<(), StoreError>;
    /// Remove every key in the namespace.
    fn erase_all(&self) -> Result<(), StoreError>;
    /// Entries still available in the partition.
    fn free_entries(&self) -> usize;
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Value {
    Str(String),
    U8(u8),
}

impl Value {
    /// Entries the value occupies, counted the way NVS lays out blobs.
    fn span(&self) -> usize {
        match self {
            Value::U8(_) => 1,
            Value::Str(text) => 1 + (text.len() + 1).div_ceil(ENTRY_SIZE),
        }
    }
}

struct MemoryInner {
    values: HashMap<&'static str, Value>,
    available: bool,
    failing_key: Option<&'static str>,
    commits: usize,
}

/// In-memory store with a switch to simulate an unavailable partition.
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
    total_entries: usize,
}

impl MemoryStore {
    pub fn new(total_entries: usize) -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                values: HashMap::new(),
                available: true,
                failing_key: None,
                commits: 0,
            }),
            total_entries,
        }
    }

    /// While unavailable every operation fails with [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.lock().available = available;
    }

    /// Reads and writes of `key` fail while the rest of the store works.
    pub fn fail_key(&self, key: Option<&'static str>) {
        self.lock().failing_key = key;
    }

    pub fn commits(&self) -> usize {
        self.lock().commits
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open(&self, key: &'static str) -> Result<std::sync::MutexGuard<'_, MemoryInner>, StoreError> {
        if key.is_empty() || key.len() > MAX_KEY_LEN {
            return Err(StoreError::BadKey(key));
        }
        let inner = self.lock();
        if !inner.available {
            return Err(StoreError::Unavailable);
        }
        Ok(inner)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        // One 4 KiB page holds 126 entries, three pages is the smallest
        // usable NVS partition
        Self::new(126 * 3)
    }
}

impl KvStore for MemoryStore {
    fn get_str(&self, key: &'static str) -> Result<Option<String>, StoreError> {
        let inner = self.open(key)?;
        if inner.failing_key == Some(key) {
            return Err(StoreError::Read { key, code: ERR_FAIL });
        }
        Ok(match inner.values.get(key) {
            Some(Value::Str(text)) => Some(text.clone()),
            _ => None,
        })
    }

    fn get_u8(&self, key: &'static str) -> Result<Option<u8>, StoreError> {
        let inner = self.open(key)?;
        if inner.failing_key == Some(key) {
            return Err(StoreError::Read { key, code: ERR_FAIL });
        }
        Ok(match inner.values.get(key) {
            Some(Value::U8(value)) => Some(*value),
            _ => None,
        })
    }

    fn set_str(&self, key: &'static str, value: &str) -> Result<(), StoreError> {
        let mut inner = self.open(key)?;
        if inner.failing_key == Some(key) {
            return Err(StoreError::Write { key, code: ERR_FAIL });
        }
        inner.values.insert(key, Value::Str(value.to_string()));
        Ok(())
    }

    fn set_u8(&self, key: &'static str, value: u8) -> Result<(), StoreError> {
        let mut inner = self.open(key)?;
        if inner.failing_key == Some(key) {
            return Err(StoreError::Write { key, code: ERR_FAIL });
        }
        inner.values.insert(key, Value::U8(value));
        Ok(())
    }

    fn commit(&self) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if !inner.available {
            return Err(StoreError::Unavailable);
        }
        inner.commits += 1;
        Ok(())
    }

    fn erase_all(&self) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if !inner.available {
            return Err(StoreError::Unavailable);
        }
        inner.values.clear();
        Ok(())
    }

    fn free_entries(&self) -> usize {
        let used: usize = self.lock().values.values().map(Value::span).sum();
        self.total_entries.saturating_sub(used)
    }
}
