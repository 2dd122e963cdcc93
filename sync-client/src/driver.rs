//! Replication loop over a [`ProviderClient`].
//!
//! The driver drains every shard of the current stage, hands each entry to
//! an [`EntrySink`], checkpoints progress and promotes to the next stage
//! until the provider has nothing left to promote to. Transient fetch
//! failures are retried with exponential backoff; every other error is
//! returned to the caller.

use stagesync_core::{calculate_backoff, StreamPhase};
use stagesync_types::{Entry, FetchResult, StageInfo, SyncError};

use crate::client::{Client, ProviderClient};
use crate::config::{ConfigError, DriverConfig};

/// Receiver of replicated entries.
///
/// Entries of one shard arrive in order. After a restart, entries delivered
/// after the last checkpoint are delivered again.
pub trait EntrySink: Send {
    /// Apply one entry fetched from `shard_id` of `stage`.
    fn deliver(
        &mut self,
        stage: &StageInfo,
        shard_id: usize,
        entry: &Entry,
    ) -> Result<(), SyncError>;
}

impl<F> EntrySink for F
where
    F: FnMut(&StageInfo, usize, &Entry) -> Result<(), SyncError> + Send,
{
    fn deliver(
        &mut self,
        stage: &StageInfo,
        shard_id: usize,
        entry: &Entry,
    ) -> Result<(), SyncError> {
        self(stage, shard_id, entry)
    }
}

/// Counters for one drain or run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    /// Successful fetches.
    pub fetches: usize,
    /// Entries handed to the sink.
    pub entries: usize,
    /// Transient failures that were retried.
    pub retries: usize,
    /// Checkpoints saved.
    pub checkpoints: usize,
}

impl DrainStats {
    fn merge(&mut self, other: DrainStats) {
        self.fetches += other.fetches;
        self.entries += other.entries;
        self.retries += other.retries;
        self.checkpoints += other.checkpoints;
    }
}

/// How [`Driver::run`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveOutcome {
    /// The last stage completed; nothing is left to replicate.
    Exhausted,
    /// The current stage is caught up but not finished, as when tailing an
    /// incremental log. Run again later to pick up new entries.
    Idle,
}

/// Drives a client through its stages.
#[derive(Debug, Clone, Default)]
pub struct Driver {
    config: DriverConfig,
}

impl Driver {
    /// Create a driver.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the configuration fails
    /// [`DriverConfig::validate`].
    pub fn new(config: DriverConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The driver's configuration.
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Replicate until the stream is exhausted or caught up.
    ///
    /// An uninitialized client resumes from its saved checkpoint, or enters
    /// the first stage when none was saved.
    pub async fn run<S: EntrySink>(
        &self,
        client: &ProviderClient,
        sink: &mut S,
    ) -> Result<DriveOutcome, SyncError> {
        match client.phase().await {
            StreamPhase::Uninitialized => match client.load_state().await {
                Ok(()) => {}
                Err(SyncError::NotFound(_)) => client.init_markers().await?,
                Err(e) => return Err(e),
            },
            StreamPhase::Exhausted => return Ok(DriveOutcome::Exhausted),
            StreamPhase::StageActive | StreamPhase::StageComplete => {}
        }

        let mut total = DrainStats::default();
        loop {
            let stats = self.drain_stage(client, sink).await?;
            total.merge(stats);

            if !client.stage_complete().await {
                if stats.entries == 0 {
                    tracing::debug!(
                        "Stream {} idle after {} entries",
                        client.stream_id(),
                        total.entries
                    );
                    return Ok(DriveOutcome::Idle);
                }
                continue;
            }

            match client.promote_stage().await {
                Ok(_) => {
                    client.save_state().await?;
                    total.checkpoints += 1;
                }
                Err(SyncError::NoMoreStages) => {
                    tracing::info!(
                        "Stream {} exhausted: {} entries in {} fetches, {} retries",
                        client.stream_id(),
                        total.entries,
                        total.fetches,
                        total.retries
                    );
                    return Ok(DriveOutcome::Exhausted);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Fetch every unfinished shard of the current stage until it is done or
    /// returns an empty page.
    ///
    /// Progress is saved after a batch that delivered entries and after a
    /// batch that finished its shard, even when that batch was empty.
    pub async fn drain_stage<S: EntrySink>(
        &self,
        client: &ProviderClient,
        sink: &mut S,
    ) -> Result<DrainStats, SyncError> {
        let info = client.get_stage_info().await.ok_or(SyncError::NotInitialized)?;
        let num_shards = client.stage_num_shards().await;
        let mut stats = DrainStats::default();
        let mut unsaved = false;

        for shard_id in 0..num_shards {
            while !client.is_shard_done(shard_id).await {
                let result = self.fetch_with_retry(client, shard_id, &mut stats).await?;
                stats.fetches += 1;

                for entry in &result.entries {
                    sink.deliver(&info, shard_id, entry)?;
                }
                stats.entries += result.entries.len();

                let finished = client.is_shard_done(shard_id).await;
                if !result.entries.is_empty() || finished {
                    if self.config.checkpoint_every_batch {
                        client.save_state().await?;
                        stats.checkpoints += 1;
                    } else {
                        unsaved = true;
                    }
                }

                // An empty page makes no progress, whatever `more` says
                if result.entries.is_empty() {
                    break;
                }
            }
        }

        if unsaved {
            client.save_state().await?;
            stats.checkpoints += 1;
        }
        Ok(stats)
    }

    async fn fetch_with_retry(
        &self,
        client: &ProviderClient,
        shard_id: usize,
        stats: &mut DrainStats,
    ) -> Result<FetchResult, SyncError> {
        let mut attempt = 0;
        loop {
            match client.fetch(shard_id, self.config.batch_size).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    stats.retries += 1;
                    let delay = calculate_backoff(
                        attempt,
                        self.config.retry_base(),
                        self.config.retry_max(),
                    );
                    tracing::warn!(
                        "Fetch on shard {} failed ({}), retry {}/{} in {:?}",
                        shard_id,
                        e,
                        attempt,
                        self.config.max_retries,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
