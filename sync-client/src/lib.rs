//! # sync-client
//!
//! Providers, stateful clients and the replication loop for stagesync.
//!
//! This is the I/O layer on top of `sync-core`'s pure progress tracking.
//!
//! ## Features
//!
//! - **Provider Abstraction**: staged, sharded log sources behind one async trait
//! - **Single-Stage Adapter**: implement three shard primitives, get a provider
//! - **Stage Chaining**: compose a full snapshot and an incremental tail
//! - **Resumable Clients**: per-shard markers, checkpointed to a state store
//! - **Provider Registry**: process-wide lookup of shared providers
//!
//! ## Example
//!
//! ```ignore
//! use stagesync_client::{Driver, DriverConfig, MemoryLog, ProviderClient, SingleStageProvider};
//! use stagesync_types::{Entry, StageInfo, StageType, SyncError};
//! use std::sync::Arc;
//!
//! let log = MemoryLog::new(4);
//! let provider = Arc::new(SingleStageProvider::new("inc", StageType::Incremental, 4, log));
//! let client = ProviderClient::new(provider);
//!
//! let mut apply = |stage: &StageInfo, shard: usize, entry: &Entry| -> Result<(), SyncError> {
//!     println!("{} shard {}: {}", stage.stage_id, shard, entry.key);
//!     Ok(())
//! };
//! let driver = Driver::new(DriverConfig::default())?;
//! driver.run(&client, &mut apply).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod driver;
pub mod provider;
pub mod registry;
pub mod store;

pub use client::{Client, ClientRef, ProviderClient, DEFAULT_STREAM_ID};
pub use config::{ConfigError, DriverConfig};
pub use driver::{DrainStats, DriveOutcome, Driver, EntrySink};
pub use provider::{
    FetchCall, MemoryLog, MockProvider, Provider, ProviderRef, ShardSource, SingleStageProvider,
    StagedProvider,
};
pub use registry::ProviderRegistry;
pub use store::{FileStateStore, MemoryStateStore, StateStore};
