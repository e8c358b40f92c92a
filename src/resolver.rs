//! Serial number to device resolution with auto-registration.

use std::sync::Arc;

use crate::error::StoreError;
use crate::models::{Device, NewDevice};
use crate::store::DeviceStore;

// ---

/// How a device was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The serial was already registered (possibly by a concurrent caller).
    Found(Device),
    /// This call registered the device.
    Created(Device),
}

impl Resolution {
    pub fn device(&self) -> &Device {
        match self {
            Resolution::Found(device) | Resolution::Created(device) => device,
        }
    }

    pub fn into_device(self) -> Device {
        match self {
            Resolution::Found(device) | Resolution::Created(device) => device,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, Resolution::Created(_))
    }
}

/// Maps serial numbers to devices, registering unknown serials as unclaimed
/// `auto_registered` devices.
///
/// Never updates an existing device; ownership and type belong to the claim
/// workflow.
#[derive(Clone)]
pub struct DeviceResolver {
    store: Arc<dyn DeviceStore>,
}

impl DeviceResolver {
    pub fn new(store: Arc<dyn DeviceStore>) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, serial: &str) -> Result<Resolution, StoreError> {
        // ---
        if let Some(device) = self.store.find_device_by_serial(serial).await? {
            return Ok(Resolution::Found(device));
        }

        tracing::info!(serial, "Device not found, auto-registering");

        match self
            .store
            .create_device(&NewDevice::auto_registered(serial))
            .await
        {
            Ok(()) => {
                let device = self.reread(serial).await?;
                tracing::info!(serial, device_id = device.id, "Auto-registered device");
                Ok(Resolution::Created(device))
            }
            Err(StoreError::DuplicateSerial(_)) => {
                // Another handler registered it between our lookup and insert.
                tracing::debug!(serial, "Lost registration race, re-resolving");
                let device = self.reread(serial).await?;
                Ok(Resolution::Found(device))
            }
            Err(e) => Err(e),
        }
    }

    async fn reread(&self, serial: &str) -> Result<Device, StoreError> {
        self.store
            .find_device_by_serial(serial)
            .await?
            .ok_or_else(|| {
                StoreError::Unavailable(format!("device '{serial}' missing after registration"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AUTO_REGISTERED_DEVICE_TYPE;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn unknown_serial_is_registered_unclaimed() {
        let store = Arc::new(MemoryStore::new());
        let resolver = DeviceResolver::new(store.clone());

        let resolution = resolver.resolve("SN-1").await.unwrap();

        assert!(resolution.was_created());
        let device = resolution.device();
        assert_eq!(device.serial_number, "SN-1");
        assert_eq!(device.device_type, AUTO_REGISTERED_DEVICE_TYPE);
        assert!(!device.is_claimed());
        assert_eq!(store.devices().await.len(), 1);
    }

    #[tokio::test]
    async fn known_serial_is_found_and_left_alone() {
        let store = Arc::new(MemoryStore::new());
        let owned = store
            .insert_device(NewDevice {
                device_type: "soil_probe".into(),
                serial_number: "SN-7".into(),
                user_id: Some(11),
            })
            .await;
        let resolver = DeviceResolver::new(store.clone());

        let resolution = resolver.resolve("SN-7").await.unwrap();

        assert_eq!(resolution, Resolution::Found(owned));
        assert_eq!(store.create_attempts().await, 0);
    }

    #[tokio::test]
    async fn registration_race_resolves_to_existing_device() {
        let store = Arc::new(MemoryStore::new());
        let existing = store.insert_device(NewDevice::auto_registered("SN-2")).await;
        // First lookup misses as if the other writer had not committed yet.
        store.stale_lookups(1).await;
        let resolver = DeviceResolver::new(store.clone());

        let resolution = resolver.resolve("SN-2").await.unwrap();

        assert_eq!(resolution, Resolution::Found(existing));
        assert_eq!(store.create_attempts().await, 1);
        assert_eq!(store.devices().await.len(), 1);
    }

    #[tokio::test]
    async fn lookup_failure_is_reported() {
        let store = Arc::new(MemoryStore::new());
        store.fail_lookups(true).await;
        let resolver = DeviceResolver::new(store.clone());

        let err = resolver.resolve("SN-3").await.unwrap_err();

        assert!(matches!(err, StoreError::Unavailable(_)));
        assert_eq!(store.create_attempts().await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_sight_creates_one_device() {
        let store = Arc::new(MemoryStore::new());
        let resolver = DeviceResolver::new(store.clone());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let resolver = resolver.clone();
            handles.push(tokio::spawn(async move { resolver.resolve("SN-X").await }));
        }

        let mut created = 0;
        let mut ids = Vec::new();
        for handle in handles {
            let resolution = handle.await.unwrap().unwrap();
            if resolution.was_created() {
                created += 1;
            }
            ids.push(resolution.device().id);
        }

        assert_eq!(created, 1);
        assert!(ids.iter().all(|id| *id == ids[0]));
        assert_eq!(store.devices().await.len(), 1);
    }
}
