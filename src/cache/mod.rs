//! Read-cache collaborator and the invalidation coordinator.
//!
//! The ingestion path never reads the cache. It only deletes entries that a
//! new reading makes stale, so the next read recomputes them from the
//! database. Invalidation is best-effort: entries also expire on their own.

use std::fmt;

use async_trait::async_trait;

mod invalidator;
mod memory;
mod redis_cache;

pub use invalidator::CacheInvalidator;
pub use memory::MemoryCache;
pub use redis_cache::RedisCache;

// ---

/// Key shapes shared with the services that populate the cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    DeviceLogs { device_id: i64 },
    DeviceLogsBySerial { serial: String },
    UserDevices { user_id: i64 },
    MlAnalysis { device_id: i64, analysis_type: String },
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::DeviceLogs { device_id } => write!(f, "device-logs:{device_id}"),
            CacheKey::DeviceLogsBySerial { serial } => write!(f, "device-logs-by-serial:{serial}"),
            CacheKey::UserDevices { user_id } => write!(f, "user-devices:{user_id}"),
            CacheKey::MlAnalysis {
                device_id,
                analysis_type,
            } => write!(f, "ml-analysis:{device_id}:{analysis_type}"),
        }
    }
}

/// Minimal cache surface needed for invalidation.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn delete(&self, key: &str) -> anyhow::Result<()>;
}

/// Used when no cache is configured; every delete succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCache;

#[async_trait]
impl Cache for NoopCache {
    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        tracing::trace!(key, "No cache configured, skipping delete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_shapes() {
        assert_eq!(CacheKey::DeviceLogs { device_id: 7 }.to_string(), "device-logs:7");
        assert_eq!(
            CacheKey::DeviceLogsBySerial {
                serial: "SN-1".into()
            }
            .to_string(),
            "device-logs-by-serial:SN-1"
        );
        assert_eq!(CacheKey::UserDevices { user_id: 3 }.to_string(), "user-devices:3");
        assert_eq!(
            CacheKey::MlAnalysis {
                device_id: 7,
                analysis_type: "soil".into()
            }
            .to_string(),
            "ml-analysis:7:soil"
        );
    }
}
