//! Fire-and-forget invalidation of a device's cached log views.

use std::sync::Arc;

use super::{Cache, CacheKey};
use crate::tasks::BackgroundTasks;

// ---

/// Deletes the cache entries a new reading makes stale.
///
/// Each call launches one tracked task; callers never wait on it and never
/// see its errors. Drain outstanding work through [`CacheInvalidator::tasks`]
/// at shutdown.
#[derive(Clone)]
pub struct CacheInvalidator {
    cache: Arc<dyn Cache>,
    tasks: BackgroundTasks,
}

impl CacheInvalidator {
    pub fn new(cache: Arc<dyn Cache>, tasks: BackgroundTasks) -> Self {
        Self { cache, tasks }
    }

    pub fn tasks(&self) -> &BackgroundTasks {
        &self.tasks
    }

    /// Keys holding log views of one device.
    pub fn keys_for_device(device_id: i64, serial: &str) -> [CacheKey; 2] {
        [
            CacheKey::DeviceLogs { device_id },
            CacheKey::DeviceLogsBySerial {
                serial: serial.to_string(),
            },
        ]
    }

    pub fn invalidate_for_device(&self, device_id: i64, serial: &str) {
        // ---
        let cache = Arc::clone(&self.cache);
        let keys = Self::keys_for_device(device_id, serial);
        let serial = serial.to_string();

        self.tasks.spawn(async move {
            let mut failed = 0usize;
            // Keys are independent; one failing must not skip the other.
            for key in keys {
                let key = key.to_string();
                if let Err(e) = cache.delete(&key).await {
                    failed += 1;
                    tracing::warn!(key = %key, error = %e, "Cache invalidation failed");
                }
            }
            if failed == 0 {
                tracing::debug!(device_id, serial = %serial, "Invalidated device log caches");
            }
        });
    }
}
