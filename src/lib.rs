//! Telemetry ingestion for field-deployed sensor devices.
//!
//! Devices publish readings over MQTT, either whole on
//! `<root>/<serial>/data` or split on `<root>/<serial>/chunked/<total>/<index>`.
//! This crate reassembles split readings, resolves (and if needed
//! auto-registers) the originating device, appends the reading to the system
//! of record and invalidates the read caches that the new reading makes stale.
//!
//! The binary (`main.rs`) and the integration tests consume the crate through
//! the re-exports below (EMBP gateway).

pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod reassembly;
pub mod resolver;
pub mod routes;
pub mod schema;
pub mod store;
pub mod subscriber;
pub mod tasks;

pub use cache::{Cache, CacheInvalidator, CacheKey, MemoryCache, NoopCache, RedisCache};
pub use config::Config;
pub use error::{IngestError, ReassemblyError, StoreError, TopicError};
pub use models::{Device, NewDevice, RawReading, Reading};
pub use pipeline::{IngestPipeline, IngestReceipt, IngestStatsSnapshot};
pub use reassembly::{PartOutcome, ReassemblyTable, SweepReport};
pub use resolver::{DeviceResolver, Resolution};
pub use store::{DeviceStore, MemoryStore, PgStore};
pub use subscriber::{FrameHandler, FrameOutcome, MqttSubscriber, TopicLayout};
pub use tasks::{join_with_timeout, BackgroundTasks};
