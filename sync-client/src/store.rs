//! Persistence boundary for client progress.
//!
//! A [`StateStore`] keeps one [`StageCheckpoint`] per stream id. The client
//! decides when to save; the store only has to make a save durable or fail
//! without committing anything.

use async_trait::async_trait;
use dashmap::DashMap;
use stagesync_core::StageCheckpoint;
use stagesync_types::SyncError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Durable storage for client checkpoints.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the checkpoint saved for a stream, if any.
    async fn load(&self, stream_id: &str) -> Result<Option<StageCheckpoint>, SyncError>;

    /// Replace the checkpoint of a stream.
    async fn save(&self, stream_id: &str, checkpoint: &StageCheckpoint) -> Result<(), SyncError>;
}

/// Checkpoints kept in a concurrent map; lost on restart.
///
/// Clones share the same map.
#[derive(Debug, Default, Clone)]
pub struct MemoryStateStore {
    checkpoints: Arc<DashMap<String, StageCheckpoint>>,
    fail_next_save: Arc<Mutex<Option<SyncError>>>,
}

impl MemoryStateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cause the next save to fail with the given error (for testing).
    pub fn fail_next_save(&self, error: SyncError) {
        *self
            .fail_next_save
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    /// The checkpoint currently stored for a stream.
    pub fn get(&self, stream_id: &str) -> Option<StageCheckpoint> {
        self.checkpoints.get(stream_id).map(|c| c.value().clone())
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self, stream_id: &str) -> Result<Option<StageCheckpoint>, SyncError> {
        Ok(self.get(stream_id))
    }

    async fn save(&self, stream_id: &str, checkpoint: &StageCheckpoint) -> Result<(), SyncError> {
        let injected = self
            .fail_next_save
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(error) = injected {
            return Err(error);
        }
        self.checkpoints
            .insert(stream_id.to_string(), checkpoint.clone());
        Ok(())
    }
}

/// Checkpoints stored as one JSON file per stream in a directory.
///
/// Saves write a temporary file and rename it into place, so a crash leaves
/// either the old or the new checkpoint.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    /// Store checkpoints under `dir` (created on first save).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the checkpoint files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, stream_id: &str) -> Result<PathBuf, SyncError> {
        let valid = !stream_id.is_empty()
            && stream_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !stream_id.starts_with('.');
        if !valid {
            return Err(SyncError::InvalidArgument(format!(
                "stream id {:?} is not usable as a file name",
                stream_id
            )));
        }
        Ok(self.dir.join(format!("{}.json", stream_id)))
    }
}

/// Map an I/O failure to the retryable or permanent variant.
fn io_error(context: &str, path: &Path, err: std::io::Error) -> SyncError {
    let message = format!("{} {}: {}", context, path.display(), err);
    match err.kind() {
        ErrorKind::TimedOut | ErrorKind::Interrupted | ErrorKind::WouldBlock => {
            SyncError::TransientIo(message)
        }
        _ => SyncError::Io(message),
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self, stream_id: &str) -> Result<Option<StageCheckpoint>, SyncError> {
        let path = self.path_for(stream_id)?;
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error("failed to read checkpoint", &path, e)),
        };
        serde_json::from_str(&contents).map(Some).map_err(|e| {
            SyncError::InvalidData(format!("checkpoint {}: {}", path.display(), e))
        })
    }

    async fn save(&self, stream_id: &str, checkpoint: &StageCheckpoint) -> Result<(), SyncError> {
        let path = self.path_for(stream_id)?;
        let contents = serde_json::to_string_pretty(checkpoint)
            .map_err(|e| SyncError::InvalidData(format!("checkpoint encoding: {}", e)))?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error("failed to create", &self.dir, e))?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, contents)
            .await
            .map_err(|e| io_error("failed to write", &tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_error("failed to replace", &path, e))?;

        tracing::debug!(
            "Saved checkpoint for stream {} at stage {}",
            stream_id,
            checkpoint.stage_id
        );
        Ok(())
    }
}
