//! Mock provider for testing.
//!
//! Allows scripting fetch results per shard and capturing fetch calls for
//! verification.

use super::Provider;
use async_trait::async_trait;
use stagesync_types::{FetchResult, StageId, StageInfo, StageType, SyncError};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A fetch call observed by a [`MockProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCall {
    /// Stage requested.
    pub stage_id: StageId,
    /// Shard requested.
    pub shard_id: usize,
    /// Marker the caller resumed from.
    pub marker: String,
    /// Page size requested.
    pub max_entries: usize,
}

/// Mock provider for testing.
///
/// Fetches pop scripted results per `(stage, shard)`; an exhausted script
/// returns an empty page. Clones share the same script.
#[derive(Debug, Default, Clone)]
pub struct MockProvider {
    inner: Arc<Mutex<MockProviderInner>>,
}

#[derive(Debug, Default)]
struct MockProviderInner {
    stages: Vec<StageInfo>,
    results: HashMap<(StageId, usize), VecDeque<FetchResult>>,
    start_markers: HashMap<(StageId, usize), String>,
    cur_states: HashMap<(StageId, usize), String>,
    fetches: Vec<FetchCall>,
    fail_next_fetch: Option<SyncError>,
}

impl MockProvider {
    /// Create a mock serving the given stages in order.
    pub fn new(stages: Vec<StageInfo>) -> Self {
        let provider = Self::default();
        provider.lock().stages = stages;
        provider
    }

    /// Create a mock with a single stage.
    pub fn single(stage_id: &str, stage_type: StageType, num_shards: i32) -> Self {
        Self::new(vec![StageInfo::new(stage_id, stage_type, num_shards)])
    }

    /// Queue a result for the next fetch on `(stage_id, shard_id)`.
    pub fn queue_result(&self, stage_id: &str, shard_id: usize, result: FetchResult) {
        self.lock()
            .results
            .entry((stage_id.to_string(), shard_id))
            .or_default()
            .push_back(result);
    }

    /// Set the start marker reported for a shard (default: empty).
    pub fn set_start_marker(&self, stage_id: &str, shard_id: usize, marker: &str) {
        self.lock()
            .start_markers
            .insert((stage_id.to_string(), shard_id), marker.to_string());
    }

    /// Set the current-state marker reported for a shard (default: empty).
    pub fn set_cur_state(&self, stage_id: &str, shard_id: usize, marker: &str) {
        self.lock()
            .cur_states
            .insert((stage_id.to_string(), shard_id), marker.to_string());
    }

    /// Cause the next fetch to fail with the given error.
    pub fn fail_next_fetch(&self, error: SyncError) {
        self.lock().fail_next_fetch = Some(error);
    }

    /// All fetch calls received so far.
    pub fn fetches(&self) -> Vec<FetchCall> {
        self.lock().fetches.clone()
    }

    /// Fetch calls received for one shard.
    pub fn fetches_for(&self, stage_id: &str, shard_id: usize) -> Vec<FetchCall> {
        self.lock()
            .fetches
            .iter()
            .filter(|c| c.stage_id == stage_id && c.shard_id == shard_id)
            .cloned()
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, MockProviderInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MockProviderInner {
    fn stage(&self, stage_id: &str) -> Result<&StageInfo, SyncError> {
        self.stages
            .iter()
            .find(|s| s.stage_id == stage_id)
            .ok_or_else(|| SyncError::NotFound(format!("stage {}", stage_id)))
    }

    fn check_shard(&self, stage_id: &str, shard_id: usize) -> Result<(), SyncError> {
        let num_shards = self.stage(stage_id)?.shard_count()?;
        if shard_id < num_shards {
            Ok(())
        } else {
            Err(SyncError::InvalidArgument(format!(
                "shard {} out of range for stage {}",
                shard_id, stage_id
            )))
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn get_first_stage(&self) -> StageId {
        self.lock()
            .stages
            .first()
            .map(|s| s.stage_id.clone())
            .unwrap_or_default()
    }

    fn get_last_stage(&self) -> StageId {
        self.lock()
            .stages
            .last()
            .map(|s| s.stage_id.clone())
            .unwrap_or_default()
    }

    fn get_next_stage(&self, stage_id: &str) -> Result<StageId, SyncError> {
        let inner = self.lock();
        let index = inner
            .stages
            .iter()
            .position(|s| s.stage_id == stage_id)
            .ok_or_else(|| SyncError::NotFound(format!("stage {}", stage_id)))?;
        inner
            .stages
            .get(index + 1)
            .map(|s| s.stage_id.clone())
            .ok_or_else(|| SyncError::OutOfRange(stage_id.to_string()))
    }

    fn get_stages(&self) -> Vec<StageId> {
        self.lock().stages.iter().map(|s| s.stage_id.clone()).collect()
    }

    fn get_stage_info(&self, stage_id: &str) -> Result<StageInfo, SyncError> {
        self.lock().stage(stage_id).cloned()
    }

    async fn fetch(
        &self,
        stage_id: &str,
        shard_id: usize,
        marker: &str,
        max_entries: usize,
    ) -> Result<FetchResult, SyncError> {
        let mut inner = self.lock();
        inner.fetches.push(FetchCall {
            stage_id: stage_id.to_string(),
            shard_id,
            marker: marker.to_string(),
            max_entries,
        });

        if let Some(error) = inner.fail_next_fetch.take() {
            return Err(error);
        }
        inner.check_shard(stage_id, shard_id)?;

        Ok(inner
            .results
            .get_mut(&(stage_id.to_string(), shard_id))
            .and_then(VecDeque::pop_front)
            .unwrap_or_default())
    }

    async fn get_start_marker(&self, stage_id: &str, shard_id: usize) -> Result<String, SyncError> {
        let inner = self.lock();
        inner.check_shard(stage_id, shard_id)?;
        Ok(inner
            .start_markers
            .get(&(stage_id.to_string(), shard_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn get_cur_state(&self, stage_id: &str, shard_id: usize) -> Result<String, SyncError> {
        let inner = self.lock();
        inner.check_shard(stage_id, shard_id)?;
        Ok(inner
            .cur_states
            .get(&(stage_id.to_string(), shard_id))
            .cloned()
            .unwrap_or_default())
    }
}
