//! Persistence collaborator used by the ingestion pipeline.
//!
//! The pipeline only needs three operations from the system of record, so the
//! seam is kept that narrow. `postgres` backs the running service; `memory`
//! backs the tests.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{Device, NewDevice, Reading};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

// ---

/// Device lookup/registration and reading storage.
///
/// Implementations must enforce serial number uniqueness and report a
/// violation as [`StoreError::DuplicateSerial`] so the resolver can tell a
/// registration race apart from a real failure.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn find_device_by_serial(&self, serial: &str) -> Result<Option<Device>, StoreError>;

    async fn create_device(&self, device: &NewDevice) -> Result<(), StoreError>;

    /// Append a reading and return it as stored (with its row id).
    async fn append_reading(&self, reading: &Reading) -> Result<Reading, StoreError>;
}
