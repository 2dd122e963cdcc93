//! Per-shard and per-stage progress tracking.
//!
//! A stage is consumed shard by shard. Every shard keeps a resume marker and
//! a terminal flag; the stage is complete once every shard reported done.
//!
//! Markers are opaque and provider-defined. The tracker never compares them,
//! it only replaces a shard's marker with the last key a successful fetch
//! returned for that shard.

use stagesync_types::{FetchResult, StageInfo, SyncError};

use crate::StageCheckpoint;

/// Lifecycle of a client's replication stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    /// No stage entered yet.
    Uninitialized,
    /// A stage is being consumed.
    StageActive,
    /// Every shard of the current stage is done; ready to promote.
    StageComplete,
    /// The last stage completed and there is nothing to promote to.
    Exhausted,
}

impl StreamPhase {
    /// Derive the phase from the client's observable state.
    ///
    /// `stage_complete` is `None` while no stage has been entered.
    pub fn of(stage_complete: Option<bool>, exhausted: bool) -> Self {
        match stage_complete {
            None => Self::Uninitialized,
            Some(_) if exhausted => Self::Exhausted,
            Some(true) => Self::StageComplete,
            Some(false) => Self::StageActive,
        }
    }
}

/// Resume marker and terminal flag for one shard.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShardProgress {
    marker: String,
    done: bool,
}

impl ShardProgress {
    /// Start a shard at the given marker.
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
            done: false,
        }
    }

    /// Restore a shard from persisted values.
    pub fn restored(marker: impl Into<String>, done: bool) -> Self {
        Self {
            marker: marker.into(),
            done,
        }
    }

    /// Marker the next fetch resumes from.
    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Whether the shard reached the end of the stage.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Fold a successful fetch into this shard.
    ///
    /// Returns `Ok(true)` only for the fetch that finished the shard; later
    /// results carrying `done` again are no-ops. A result whose flags
    /// contradict each other is rejected and leaves the shard unchanged.
    pub fn apply(&mut self, result: &FetchResult) -> Result<bool, SyncError> {
        check_result(result)?;
        if let Some(key) = result.last_key() {
            self.marker = key.to_string();
        }
        if result.done && !self.done {
            self.done = true;
            return Ok(true);
        }
        Ok(false)
    }
}

fn check_result(result: &FetchResult) -> Result<(), SyncError> {
    if result.is_consistent() {
        Ok(())
    } else {
        Err(SyncError::InconsistentResult(
            "result reports more entries on a finished shard".into(),
        ))
    }
}

/// Fail with [`SyncError::InvalidArgument`] unless `shard_id` is one of the
/// `num_shards` shards of `info`.
pub fn check_shard(info: &StageInfo, num_shards: usize, shard_id: usize) -> Result<(), SyncError> {
    if shard_id < num_shards {
        Ok(())
    } else {
        Err(SyncError::InvalidArgument(format!(
            "shard {} out of range for stage {} with {} shards",
            shard_id, info.stage_id, num_shards
        )))
    }
}

/// Progress through one stage.
///
/// Holds exactly one [`ShardProgress`] per shard of the stage; the shard
/// count never changes for the lifetime of a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageProgress {
    info: StageInfo,
    shards: Vec<ShardProgress>,
    num_complete: usize,
}

impl StageProgress {
    /// Enter a stage with one starting marker per shard.
    pub fn enter(info: StageInfo, markers: Vec<String>) -> Result<Self, SyncError> {
        let num_shards = info.shard_count()?;
        if markers.len() != num_shards {
            return Err(SyncError::InvalidTopology(format!(
                "stage {} has {} shards but {} start markers",
                info.stage_id,
                num_shards,
                markers.len()
            )));
        }
        Ok(Self {
            info,
            shards: markers.into_iter().map(ShardProgress::new).collect(),
            num_complete: 0,
        })
    }

    /// Rebuild progress from a checkpoint taken against `info`.
    pub fn restore(info: StageInfo, checkpoint: &StageCheckpoint) -> Result<Self, SyncError> {
        checkpoint.validate(&info)?;
        let shards = checkpoint
            .markers
            .iter()
            .zip(&checkpoint.done)
            .map(|(marker, &done)| ShardProgress::restored(marker.clone(), done))
            .collect();
        Ok(Self {
            info,
            shards,
            num_complete: checkpoint.num_complete,
        })
    }

    /// Assemble progress from shards tracked elsewhere.
    ///
    /// `num_complete` is recounted so it always matches the shards.
    pub fn from_shards(info: StageInfo, shards: Vec<ShardProgress>) -> Result<Self, SyncError> {
        let num_shards = info.shard_count()?;
        if shards.len() != num_shards {
            return Err(SyncError::InvalidTopology(format!(
                "stage {} has {} shards but {} tracked",
                info.stage_id,
                num_shards,
                shards.len()
            )));
        }
        let num_complete = shards.iter().filter(|s| s.is_done()).count();
        Ok(Self {
            info,
            shards,
            num_complete,
        })
    }

    /// The stage being consumed.
    pub fn info(&self) -> &StageInfo {
        &self.info
    }

    /// Number of shards in the stage.
    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    /// Number of shards that reported done.
    pub fn num_complete(&self) -> usize {
        self.num_complete
    }

    /// Snapshot for persistence.
    pub fn checkpoint(&self) -> StageCheckpoint {
        StageCheckpoint {
            stage_id: self.info.stage_id.clone(),
            markers: self.shards.iter().map(|s| s.marker.clone()).collect(),
            done: self.shards.iter().map(|s| s.done).collect(),
            num_complete: self.num_complete,
        }
    }

    /// Split into the stage description and its shards.
    pub fn into_parts(self) -> (StageInfo, Vec<ShardProgress>) {
        (self.info, self.shards)
    }
}
