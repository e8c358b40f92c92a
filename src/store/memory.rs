//! In-memory [`DeviceStore`] for tests and local experiments.
//!
//! Enforces serial uniqueness the same way the `devices` table does and lets a
//! test inject lookup/append failures or lookups that miss a device that was
//! just created by someone else.

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::DeviceStore;
use crate::error::StoreError;
use crate::models::{Device, NewDevice, Reading};

// ---

#[derive(Debug, Default)]
struct Inner {
    devices: Vec<Device>,
    readings: Vec<Reading>,
    next_device_id: i64,
    next_reading_id: i64,
    create_attempts: usize,
    fail_lookups: bool,
    fail_appends: bool,
    /// Number of upcoming lookups that report "absent" regardless of content.
    stale_lookups: usize,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device directly, bypassing the resolver.
    pub async fn insert_device(&self, device: NewDevice) -> Device {
        let mut inner = self.inner.lock().await;
        insert(&mut inner, &device)
    }

    pub async fn devices(&self) -> Vec<Device> {
        self.inner.lock().await.devices.clone()
    }

    pub async fn readings(&self) -> Vec<Reading> {
        self.inner.lock().await.readings.clone()
    }

    /// How many times `create_device` was called, successful or not.
    pub async fn create_attempts(&self) -> usize {
        self.inner.lock().await.create_attempts
    }

    pub async fn fail_lookups(&self, fail: bool) {
        self.inner.lock().await.fail_lookups = fail;
    }

    pub async fn fail_appends(&self, fail: bool) {
        self.inner.lock().await.fail_appends = fail;
    }

    /// Make the next `n` lookups miss, as if another writer had not committed
    /// yet when they ran.
    pub async fn stale_lookups(&self, n: usize) {
        self.inner.lock().await.stale_lookups = n;
    }
}

fn insert(inner: &mut Inner, device: &NewDevice) -> Device {
    inner.next_device_id += 1;
    let now = Utc::now();
    let device = Device {
        id: inner.next_device_id,
        device_type: device.device_type.clone(),
        serial_number: device.serial_number.clone(),
        user_id: device.user_id,
        created_at: now,
        updated_at: now,
    };
    inner.devices.push(device.clone());
    device
}

#[async_trait]
impl DeviceStore for MemoryStore {
    // ---
    async fn find_device_by_serial(&self, serial: &str) -> Result<Option<Device>, StoreError> {
        // ---
        let mut inner = self.inner.lock().await;
        if inner.fail_lookups {
            return Err(StoreError::Unavailable("lookup failure injected".into()));
        }
        if inner.stale_lookups > 0 {
            inner.stale_lookups -= 1;
            return Ok(None);
        }
        Ok(inner
            .devices
            .iter()
            .find(|d| d.serial_number == serial)
            .cloned())
    }

    async fn create_device(&self, device: &NewDevice) -> Result<(), StoreError> {
        // ---
        let mut inner = self.inner.lock().await;
        inner.create_attempts += 1;
        if inner
            .devices
            .iter()
            .any(|d| d.serial_number == device.serial_number)
        {
            return Err(StoreError::DuplicateSerial(device.serial_number.clone()));
        }
        insert(&mut inner, device);
        Ok(())
    }

    async fn append_reading(&self, reading: &Reading) -> Result<Reading, StoreError> {
        // ---
        let mut inner = self.inner.lock().await;
        if inner.fail_appends {
            return Err(StoreError::Unavailable("append failure injected".into()));
        }
        inner.next_reading_id += 1;
        let stored = Reading {
            id: inner.next_reading_id,
            ..reading.clone()
        };
        inner.readings.push(stored.clone());
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_serial_is_reported() {
        let store = MemoryStore::new();
        let device = NewDevice::auto_registered("SN-1");

        store.create_device(&device).await.unwrap();
        let second = store.create_device(&device).await;

        assert!(matches!(second, Err(StoreError::DuplicateSerial(s)) if s == "SN-1"));
        assert_eq!(store.devices().await.len(), 1);
        assert_eq!(store.create_attempts().await, 2);
    }

    #[tokio::test]
    async fn stale_lookups_miss_then_recover() {
        let store = MemoryStore::new();
        store.insert_device(NewDevice::auto_registered("SN-1")).await;
        store.stale_lookups(1).await;

        assert!(store.find_device_by_serial("SN-1").await.unwrap().is_none());
        assert!(store.find_device_by_serial("SN-1").await.unwrap().is_some());
    }
}
