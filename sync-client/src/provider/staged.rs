//! Multi-stage provider built from single-stage children.
//!
//! Replication usually starts with a full snapshot and continues with an
//! incremental tail. [`StagedProvider`] chains one provider per stage in
//! order and routes shard calls to the child owning the stage.

use super::{Provider, ProviderRef};
use async_trait::async_trait;
use stagesync_types::{FetchResult, StageId, StageInfo, SyncError};

/// Ordered chain of stages, each served by its own provider.
pub struct StagedProvider {
    /// Never empty.
    stages: Vec<(StageId, ProviderRef)>,
}

impl StagedProvider {
    /// Chain `children` in order; each contributes its first stage.
    ///
    /// An empty chain or a stage id used twice is
    /// [`SyncError::InvalidTopology`].
    pub fn new(children: Vec<ProviderRef>) -> Result<Self, SyncError> {
        if children.is_empty() {
            return Err(SyncError::InvalidTopology("no stages".into()));
        }
        let mut stages: Vec<(StageId, ProviderRef)> = Vec::with_capacity(children.len());
        for child in children {
            let stage_id = child.get_first_stage();
            if stages.iter().any(|(id, _)| *id == stage_id) {
                return Err(SyncError::InvalidTopology(format!(
                    "stage {} appears twice",
                    stage_id
                )));
            }
            stages.push((stage_id, child));
        }
        Ok(Self { stages })
    }

    fn position(&self, stage_id: &str) -> Result<usize, SyncError> {
        self.stages
            .iter()
            .position(|(id, _)| id == stage_id)
            .ok_or_else(|| SyncError::NotFound(format!("stage {}", stage_id)))
    }

    fn child(&self, stage_id: &str) -> Result<&ProviderRef, SyncError> {
        let index = self.position(stage_id)?;
        Ok(&self.stages[index].1)
    }
}

impl std::fmt::Debug for StagedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedProvider")
            .field("stages", &self.get_stages())
            .finish()
    }
}

#[async_trait]
impl Provider for StagedProvider {
    fn get_first_stage(&self) -> StageId {
        self.stages[0].0.clone()
    }

    fn get_last_stage(&self) -> StageId {
        self.stages[self.stages.len() - 1].0.clone()
    }

    fn get_next_stage(&self, stage_id: &str) -> Result<StageId, SyncError> {
        let index = self.position(stage_id)?;
        self.stages
            .get(index + 1)
            .map(|(id, _)| id.clone())
            .ok_or_else(|| SyncError::OutOfRange(stage_id.to_string()))
    }

    fn get_stages(&self) -> Vec<StageId> {
        self.stages.iter().map(|(id, _)| id.clone()).collect()
    }

    fn get_stage_info(&self, stage_id: &str) -> Result<StageInfo, SyncError> {
        self.child(stage_id)?.get_stage_info(stage_id)
    }

    async fn fetch(
        &self,
        stage_id: &str,
        shard_id: usize,
        marker: &str,
        max_entries: usize,
    ) -> Result<FetchResult, SyncError> {
        self.child(stage_id)?
            .fetch(stage_id, shard_id, marker, max_entries)
            .await
    }

    async fn get_start_marker(&self, stage_id: &str, shard_id: usize) -> Result<String, SyncError> {
        self.child(stage_id)?.get_start_marker(stage_id, shard_id).await
    }

    async fn get_cur_state(&self, stage_id: &str, shard_id: usize) -> Result<String, SyncError> {
        self.child(stage_id)?.get_cur_state(stage_id, shard_id).await
    }
}
