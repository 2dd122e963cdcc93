//! Single-stage providers.
//!
//! Most providers expose exactly one stage. [`SingleStageProvider`] answers
//! all topology queries for that stage and validates stage and shard ids, so
//! an implementation only supplies the shard-level primitives of
//! [`ShardSource`].

use super::Provider;
use async_trait::async_trait;
use stagesync_types::{FetchResult, StageId, StageInfo, StageType, SyncError};

/// Shard-level primitives behind a [`SingleStageProvider`].
///
/// Shard ids are validated before any of these are called.
#[async_trait]
pub trait ShardSource: Send + Sync {
    /// Fetch up to `max_entries` entries after `marker` in one shard.
    async fn fetch(
        &self,
        shard_id: usize,
        marker: &str,
        max_entries: usize,
    ) -> Result<FetchResult, SyncError>;

    /// Marker positioned before the first entry of a shard.
    async fn start_marker(&self, shard_id: usize) -> Result<String, SyncError>;

    /// Marker positioned at the current tail of a shard.
    async fn cur_state(&self, shard_id: usize) -> Result<String, SyncError>;
}

/// A provider with one fixed stage.
#[derive(Debug)]
pub struct SingleStageProvider<S> {
    info: StageInfo,
    source: S,
}

impl<S: ShardSource> SingleStageProvider<S> {
    /// Create a provider serving `source` as stage `name`.
    pub fn new(
        name: impl Into<StageId>,
        stage_type: StageType,
        num_shards: i32,
        source: S,
    ) -> Self {
        Self {
            info: StageInfo::new(name, stage_type, num_shards),
            source,
        }
    }

    /// The shard source behind this provider.
    pub fn source(&self) -> &S {
        &self.source
    }

    fn check_stage(&self, stage_id: &str) -> Result<(), SyncError> {
        if stage_id == self.info.stage_id {
            Ok(())
        } else {
            Err(SyncError::NotFound(format!("stage {}", stage_id)))
        }
    }

    fn check_shard(&self, stage_id: &str, shard_id: usize) -> Result<(), SyncError> {
        self.check_stage(stage_id)?;
        stagesync_core::check_shard(&self.info, self.info.shard_count()?, shard_id)
    }
}

#[async_trait]
impl<S: ShardSource> Provider for SingleStageProvider<S> {
    fn get_first_stage(&self) -> StageId {
        self.info.stage_id.clone()
    }

    fn get_last_stage(&self) -> StageId {
        self.info.stage_id.clone()
    }

    fn get_next_stage(&self, stage_id: &str) -> Result<StageId, SyncError> {
        self.check_stage(stage_id)?;
        Err(SyncError::OutOfRange(stage_id.to_string()))
    }

    fn get_stages(&self) -> Vec<StageId> {
        vec![self.info.stage_id.clone()]
    }

    fn get_stage_info(&self, stage_id: &str) -> Result<StageInfo, SyncError> {
        self.check_stage(stage_id)?;
        Ok(self.info.clone())
    }

    async fn fetch(
        &self,
        stage_id: &str,
        shard_id: usize,
        marker: &str,
        max_entries: usize,
    ) -> Result<FetchResult, SyncError> {
        self.check_shard(stage_id, shard_id)?;
        self.source.fetch(shard_id, marker, max_entries).await
    }

    async fn get_start_marker(&self, stage_id: &str, shard_id: usize) -> Result<String, SyncError> {
        self.check_shard(stage_id, shard_id)?;
        self.source.start_marker(shard_id).await
    }

    async fn get_cur_state(&self, stage_id: &str, shard_id: usize) -> Result<String, SyncError> {
        self.check_shard(stage_id, shard_id)?;
        self.source.cur_state(shard_id).await
    }
}
