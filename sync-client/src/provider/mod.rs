//! Provider abstraction for stagesync.
//!
//! A provider is a read-only, stateless-per-call source of staged and
//! sharded log data. Clients hold it through a shared [`ProviderRef`] and
//! never mutate it.
//!
//! # Design
//!
//! Topology queries are synchronous (a provider caches its stage layout);
//! everything that touches the underlying log is async:
//! - `get_first_stage()` / `get_next_stage()` walk the stages in order
//! - `get_stage_info()` describes one stage
//! - `fetch()` pages through one shard of one stage
//!
//! Implementations:
//! - [`SingleStageProvider`] - one fixed stage over a [`ShardSource`]
//! - [`StagedProvider`] - several providers chained into ordered stages
//! - [`MockProvider`] - scripted results for testing

mod log;
mod mock;
mod single;
mod staged;

pub use log::MemoryLog;
pub use mock::{FetchCall, MockProvider};
pub use single::{ShardSource, SingleStageProvider};
pub use staged::StagedProvider;

use async_trait::async_trait;
use stagesync_types::{FetchResult, StageId, StageInfo, SyncError};
use std::sync::Arc;

/// Shared, read-only handle to a provider.
pub type ProviderRef = Arc<dyn Provider>;

/// Source of staged, sharded log data.
///
/// Must be safe to call concurrently for distinct `(stage, shard)` pairs.
#[async_trait]
pub trait Provider: Send + Sync {
    /// First stage of the topology.
    fn get_first_stage(&self) -> StageId;

    /// Last stage of the topology.
    fn get_last_stage(&self) -> StageId;

    /// Stage following `stage_id`.
    ///
    /// Fails with [`SyncError::OutOfRange`] on the last stage, which signals
    /// "no further stages" rather than a fault.
    fn get_next_stage(&self, stage_id: &str) -> Result<StageId, SyncError>;

    /// All stages, in order.
    fn get_stages(&self) -> Vec<StageId>;

    /// Describe a stage; [`SyncError::NotFound`] for unknown ids.
    fn get_stage_info(&self, stage_id: &str) -> Result<StageInfo, SyncError>;

    /// Fetch up to `max_entries` entries strictly after `marker`.
    ///
    /// An empty marker means the start of the shard. Calling again with the
    /// same marker returns the same entries; calling with the key of the last
    /// returned entry continues without gaps or duplicates.
    async fn fetch(
        &self,
        stage_id: &str,
        shard_id: usize,
        marker: &str,
        max_entries: usize,
    ) -> Result<FetchResult, SyncError>;

    /// Marker positioned before the first entry of a shard.
    async fn get_start_marker(&self, stage_id: &str, shard_id: usize) -> Result<String, SyncError>;

    /// Marker positioned at the current tail of a shard.
    async fn get_cur_state(&self, stage_id: &str, shard_id: usize) -> Result<String, SyncError>;
}
