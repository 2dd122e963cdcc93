//! Persisted form of a client's stage progress.

use serde::{Deserialize, Serialize};
use stagesync_types::{StageId, StageInfo, SyncError};

/// Everything needed to resume a client exactly where it stopped.
///
/// Saving after delivering entries but before the checkpoint lands means
/// those entries are fetched again on restart (at-least-once); entries are
/// never skipped because markers only move after a successful fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCheckpoint {
    /// Stage the markers belong to.
    pub stage_id: StageId,
    /// Resume marker per shard.
    pub markers: Vec<String>,
    /// Terminal flag per shard.
    pub done: Vec<bool>,
    /// Count of `true` entries in `done`.
    pub num_complete: usize,
}

impl StageCheckpoint {
    /// Check the checkpoint against the provider's current view of the stage.
    pub fn validate(&self, info: &StageInfo) -> Result<(), SyncError> {
        if self.stage_id != info.stage_id {
            return Err(SyncError::InvalidTopology(format!(
                "checkpoint for stage {} applied to stage {}",
                self.stage_id, info.stage_id
            )));
        }
        let num_shards = info.shard_count()?;
        if self.markers.len() != num_shards || self.done.len() != num_shards {
            return Err(SyncError::InvalidTopology(format!(
                "stage {} has {} shards, checkpoint has {} markers and {} flags",
                info.stage_id,
                num_shards,
                self.markers.len(),
                self.done.len()
            )));
        }
        let counted = self.done.iter().filter(|&&d| d).count();
        if counted != self.num_complete {
            return Err(SyncError::InvalidData(format!(
                "checkpoint claims {} complete shards, flags say {}",
                self.num_complete, counted
            )));
        }
        Ok(())
    }
}
