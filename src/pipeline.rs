//! The single ingestion path shared by MQTT frames and the HTTP ingress.
//!
//! decode -> resolve device -> stamp internal id -> persist -> invalidate.
//! Each step depends on the previous one succeeding; a failure drops the
//! reading and is counted in [`IngestStats`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::cache::CacheInvalidator;
use crate::error::IngestError;
use crate::models::{Device, RawReading, Reading};
use crate::resolver::DeviceResolver;
use crate::store::DeviceStore;

// ---

/// Outcome of a successfully ingested reading.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReceipt {
    pub reading: Reading,
    pub device: Device,
    /// The device was auto-registered by this reading.
    pub device_created: bool,
}

impl IngestReceipt {
    pub fn user_assigned(&self) -> bool {
        self.device.is_claimed()
    }
}

/// Running counters, exposed on `/health`.
#[derive(Debug, Default)]
pub struct IngestStats {
    ingested: AtomicU64,
    decode_failures: AtomicU64,
    resolve_failures: AtomicU64,
    persist_failures: AtomicU64,
    devices_registered: AtomicU64,
}

/// Point-in-time copy of [`IngestStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStatsSnapshot {
    pub ingested: u64,
    pub decode_failures: u64,
    pub resolve_failures: u64,
    pub persist_failures: u64,
    pub devices_registered: u64,
}

impl IngestStats {
    pub fn snapshot(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            ingested: self.ingested.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            resolve_failures: self.resolve_failures.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            devices_registered: self.devices_registered.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct IngestPipeline {
    resolver: DeviceResolver,
    store: Arc<dyn DeviceStore>,
    invalidator: CacheInvalidator,
    stats: IngestStats,
}

impl IngestPipeline {
    pub fn new(store: Arc<dyn DeviceStore>, invalidator: CacheInvalidator) -> Self {
        Self {
            resolver: DeviceResolver::new(Arc::clone(&store)),
            store,
            invalidator,
            stats: IngestStats::default(),
        }
    }

    pub fn stats(&self) -> IngestStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn invalidator(&self) -> &CacheInvalidator {
        &self.invalidator
    }

    /// Ingest one encoded reading.
    ///
    /// Undecodable payloads are logged and rejected before anything is
    /// looked up or written.
    pub async fn ingest(&self, payload: &[u8]) -> Result<IngestReceipt, IngestError> {
        // ---
        let raw = match RawReading::decode(payload) {
            Ok(raw) => raw,
            Err(e) => {
                IngestStats::bump(&self.stats.decode_failures);
                tracing::warn!(error = %e, bytes = payload.len(), "Dropping undecodable reading");
                return Err(e);
            }
        };

        self.ingest_reading(raw).await
    }

    /// Ingest an already-decoded reading.
    pub async fn ingest_reading(&self, raw: RawReading) -> Result<IngestReceipt, IngestError> {
        // ---
        if let Err(e) = raw.validate() {
            IngestStats::bump(&self.stats.decode_failures);
            tracing::warn!(error = %e, "Dropping invalid reading");
            return Err(e);
        }
        let serial = raw.serial_number.clone();

        // Step 2: resolve
        let resolution = match self.resolver.resolve(&serial).await {
            Ok(resolution) => resolution,
            Err(source) => {
                IngestStats::bump(&self.stats.resolve_failures);
                tracing::error!(serial = %serial, error = %source, "Device resolution failed");
                return Err(IngestError::Resolve { serial, source });
            }
        };
        let device_created = resolution.was_created();
        if device_created {
            IngestStats::bump(&self.stats.devices_registered);
        }
        let device = resolution.into_device();

        // Step 3: the resolved id is authoritative
        let reading = raw.into_reading(device.id, Utc::now());

        // Step 4: persist
        let reading = match self.store.append_reading(&reading).await {
            Ok(stored) => stored,
            Err(source) => {
                IngestStats::bump(&self.stats.persist_failures);
                tracing::error!(
                    serial = %serial,
                    device_id = device.id,
                    error = %source,
                    "Failed to persist reading"
                );
                return Err(IngestError::Persist { serial, source });
            }
        };
        IngestStats::bump(&self.stats.ingested);

        // Step 5: best-effort, not awaited
        self.invalidator.invalidate_for_device(device.id, &serial);

        tracing::info!(
            serial = %serial,
            device_id = device.id,
            reading_id = reading.id,
            device_created,
            "Reading ingested"
        );

        Ok(IngestReceipt {
            reading,
            device,
            device_created,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::models::NewDevice;
    use crate::store::MemoryStore;
    use crate::tasks::BackgroundTasks;
    use std::time::Duration;

    struct Harness {
        store: Arc<MemoryStore>,
        cache: Arc<MemoryCache>,
        pipeline: IngestPipeline,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryCache::new());
        let invalidator = CacheInvalidator::new(cache.clone(), BackgroundTasks::new());
        let pipeline = IngestPipeline::new(store.clone(), invalidator);
        Harness {
            store,
            cache,
            pipeline,
        }
    }

    async fn drain(h: &Harness) {
        assert!(h
            .pipeline
            .invalidator()
            .tasks()
            .shutdown(Duration::from_secs(1))
            .await);
    }

    #[tokio::test]
    async fn decode_failure_touches_nothing() {
        let h = harness();
        h.cache.put("device-logs:1", "cached").await;

        let err = h.pipeline.ingest(b"{not json").await.unwrap_err();
        assert!(err.is_malformed_input());

        let err = h.pipeline.ingest(br#"{"serial_number":""}"#).await.unwrap_err();
        assert!(matches!(err, IngestError::Invalid(_)));

        drain(&h).await;
        assert!(h.store.devices().await.is_empty());
        assert!(h.store.readings().await.is_empty());
        assert_eq!(h.store.create_attempts().await, 0);
        assert!(h.cache.deleted().await.is_empty());
        assert!(h.cache.contains("device-logs:1").await);
        assert_eq!(h.pipeline.stats().decode_failures, 2);
    }

    #[tokio::test]
    async fn reading_is_bound_to_resolved_device() {
        let h = harness();
        let owned = h
            .store
            .insert_device(NewDevice {
                device_type: "weather_station".into(),
                serial_number: "SN-5".into(),
                user_id: Some(9),
            })
            .await;

        let receipt = h
            .pipeline
            .ingest(br#"{"serial_number":"SN-5","device_id":12345,"humidity":61.0}"#)
            .await
            .unwrap();
        drain(&h).await;

        assert!(!receipt.device_created);
        assert!(receipt.user_assigned());
        assert_eq!(receipt.reading.device_id, owned.id);
        assert_eq!(receipt.reading.humidity, 61.0);
        assert_eq!(h.store.devices().await, vec![owned]);
        assert_eq!(
            h.cache.deleted().await,
            vec![
                format!("device-logs:{}", receipt.device.id),
                "device-logs-by-serial:SN-5".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn persist_failure_skips_invalidation() {
        let h = harness();
        h.store.fail_appends(true).await;

        let err = h
            .pipeline
            .ingest(br#"{"serial_number":"SN-6"}"#)
            .await
            .unwrap_err();
        drain(&h).await;

        assert!(matches!(err, IngestError::Persist { .. }));
        assert!(!err.is_malformed_input());
        assert!(h.store.readings().await.is_empty());
        assert!(h.cache.deleted().await.is_empty());

        let stats = h.pipeline.stats();
        assert_eq!(stats.persist_failures, 1);
        assert_eq!(stats.ingested, 0);
    }

    #[tokio::test]
    async fn resolve_failure_is_reported() {
        let h = harness();
        h.store.fail_lookups(true).await;

        let err = h
            .pipeline
            .ingest(br#"{"serial_number":"SN-8"}"#)
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Resolve { ref serial, .. } if serial == "SN-8"));
        assert_eq!(h.pipeline.stats().resolve_failures, 1);
        assert!(h.store.readings().await.is_empty());
    }

    #[tokio::test]
    async fn cache_failure_does_not_fail_ingest() {
        let h = harness();
        h.cache.fail_deletes(true).await;

        let receipt = h
            .pipeline
            .ingest(br#"{"serial_number":"SN-9","ph":6.1}"#)
            .await
            .unwrap();
        drain(&h).await;

        assert!(receipt.device_created);
        assert_eq!(h.store.readings().await.len(), 1);
        assert_eq!(h.pipeline.stats().ingested, 1);
        assert_eq!(h.pipeline.stats().devices_registered, 1);
    }
}
