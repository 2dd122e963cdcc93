//! Stateful replication clients.
//!
//! A [`ProviderClient`] consumes one provider stage by stage. It keeps a
//! resume marker and a done flag per shard, notices when every shard of the
//! current stage finished and moves on to the next stage when asked to.
//!
//! ```text
//! init_markers ─▶ StageActive ─▶ StageComplete ─▶ promote_stage ─┬─▶ StageActive
//!                   ▲    │ fetch                                  └─▶ Exhausted
//!                   └────┘
//! ```
//!
//! # Concurrency
//!
//! Fetches on distinct shards run concurrently and fetches on the same shard
//! are serialized by that shard's lock. Entering a stage (`init_markers`,
//! `promote_stage`, `load_state`) and taking a checkpoint hold the state lock
//! exclusively, so they never interleave with an in-flight fetch.

use async_trait::async_trait;
use stagesync_core::{check_shard, ShardProgress, StageCheckpoint, StageProgress, StreamPhase};
use stagesync_types::{FetchResult, StageId, StageInfo, SyncError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::provider::ProviderRef;
use crate::store::{MemoryStateStore, StateStore};

/// Stream id used by [`ProviderClient::new`].
pub const DEFAULT_STREAM_ID: &str = "default";

/// A consumer of a staged, sharded log.
#[async_trait]
pub trait Client: Send + Sync {
    /// Enter the provider's first stage.
    async fn init_markers(&self) -> Result<(), SyncError>;

    /// Fetch the next page of a shard and advance its marker.
    async fn fetch(&self, shard_id: usize, max_entries: usize) -> Result<FetchResult, SyncError>;

    /// Restore progress from the state store.
    async fn load_state(&self) -> Result<(), SyncError>;

    /// Persist progress to the state store.
    async fn save_state(&self) -> Result<(), SyncError>;

    /// The stage being consumed, if one was entered.
    async fn get_stage_info(&self) -> Option<StageInfo>;

    /// Shard count of the current stage; zero before a stage was entered.
    async fn stage_num_shards(&self) -> usize;

    /// Whether a shard of the current stage finished.
    async fn is_shard_done(&self, shard_id: usize) -> bool;

    /// Whether every shard of the current stage finished.
    async fn stage_complete(&self) -> bool;
}

/// Shared handle to a client.
pub type ClientRef = Arc<dyn Client>;

/// The stage a client is consuming.
struct ActiveStage {
    info: StageInfo,
    /// One lock per shard; the index is the shard id.
    shards: Vec<Mutex<ShardProgress>>,
    /// Only advanced while holding the lock of the shard that finished.
    num_complete: AtomicUsize,
}

impl ActiveStage {
    fn num_complete(&self) -> usize {
        self.num_complete.load(Ordering::Acquire)
    }

    fn is_complete(&self) -> bool {
        self.num_complete() == self.shards.len()
    }

    async fn snapshot(&self) -> Result<StageProgress, SyncError> {
        let mut shards = Vec::with_capacity(self.shards.len());
        for shard in &self.shards {
            shards.push(shard.lock().await.clone());
        }
        StageProgress::from_shards(self.info.clone(), shards)
    }
}

impl From<StageProgress> for ActiveStage {
    fn from(progress: StageProgress) -> Self {
        let num_complete = AtomicUsize::new(progress.num_complete());
        let (info, shards) = progress.into_parts();
        Self {
            info,
            shards: shards.into_iter().map(Mutex::new).collect(),
            num_complete,
        }
    }
}

#[derive(Default)]
struct ClientState {
    stage: Option<ActiveStage>,
    exhausted: bool,
    /// Seed markers applied whenever the named stage is entered.
    initial_stage_markers: HashMap<StageId, Vec<String>>,
}

/// Client tracking per-shard progress against one provider.
pub struct ProviderClient {
    provider: ProviderRef,
    stream_id: String,
    store: Arc<dyn StateStore>,
    state: RwLock<ClientState>,
}

impl ProviderClient {
    /// Create a client with an in-memory state store.
    pub fn new(provider: ProviderRef) -> Self {
        Self::with_store(provider, DEFAULT_STREAM_ID, Arc::new(MemoryStateStore::new()))
    }

    /// Create a client persisting its progress under `stream_id` in `store`.
    pub fn with_store(
        provider: ProviderRef,
        stream_id: impl Into<String>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            provider,
            stream_id: stream_id.into(),
            store,
            state: RwLock::new(ClientState::default()),
        }
    }

    /// The provider this client consumes.
    pub fn provider(&self) -> &ProviderRef {
        &self.provider
    }

    /// Key the client's checkpoint is stored under.
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Use `markers` as the starting markers the next time `stage_id` is
    /// entered. Shards without a seed start at the provider's start marker.
    pub async fn set_initial_stage_markers(
        &self,
        stage_id: impl Into<StageId>,
        markers: Vec<String>,
    ) {
        self.state
            .write()
            .await
            .initial_stage_markers
            .insert(stage_id.into(), markers);
    }

    /// Seed `stage_id` with the provider's current tail of every shard.
    ///
    /// A client seeded this way skips everything already in the stage and
    /// only sees entries appended afterwards.
    pub async fn seed_from_current_state(&self, stage_id: &str) -> Result<(), SyncError> {
        let num_shards = self.provider.get_stage_info(stage_id)?.shard_count()?;
        let mut markers = Vec::with_capacity(num_shards);
        for shard_id in 0..num_shards {
            markers.push(self.provider.get_cur_state(stage_id, shard_id).await?);
        }
        tracing::debug!("Seeded {} shards of stage {} from current state", num_shards, stage_id);
        self.set_initial_stage_markers(stage_id, markers).await;
        Ok(())
    }

    /// Move to the next stage once every shard of the current one finished.
    ///
    /// Returns the shard count of the new stage. Past the last stage the
    /// client becomes exhausted, keeps its current stage untouched and fails
    /// with [`SyncError::NoMoreStages`].
    pub async fn promote_stage(&self) -> Result<usize, SyncError> {
        let mut state = self.state.write().await;
        let current = state.stage.as_ref().ok_or(SyncError::NotInitialized)?;
        let total = current.shards.len();
        let complete = current.num_complete();
        if complete != total {
            return Err(SyncError::StageIncomplete { complete, total });
        }

        let next = match self.provider.get_next_stage(&current.info.stage_id) {
            Ok(next) => next,
            Err(SyncError::OutOfRange(last)) => {
                tracing::info!("Stream {} exhausted after stage {}", self.stream_id, last);
                state.exhausted = true;
                return Err(SyncError::NoMoreStages);
            }
            Err(e) => return Err(e),
        };

        let info = self.provider.get_stage_info(&next)?;
        let stage = self.enter_stage(&state.initial_stage_markers, info).await?;
        let num_shards = stage.shards.len();
        tracing::info!(
            "Stream {} promoted to {} stage {} ({} shards)",
            self.stream_id,
            stage.info.stage_type,
            next,
            num_shards
        );
        state.stage = Some(stage);
        state.exhausted = false;
        Ok(num_shards)
    }

    /// Current progress as a checkpoint.
    pub async fn checkpoint(&self) -> Result<StageCheckpoint, SyncError> {
        let state = self.state.read().await;
        let stage = state.stage.as_ref().ok_or(SyncError::NotInitialized)?;
        Ok(stage.snapshot().await?.checkpoint())
    }

    /// Resume marker of a shard in the current stage.
    pub async fn marker(&self, shard_id: usize) -> Option<String> {
        let state = self.state.read().await;
        let shard = state.stage.as_ref()?.shards.get(shard_id)?;
        let marker = shard.lock().await.marker().to_string();
        Some(marker)
    }

    /// Number of finished shards in the current stage.
    pub async fn num_complete(&self) -> usize {
        let state = self.state.read().await;
        state.stage.as_ref().map_or(0, ActiveStage::num_complete)
    }

    /// Where the client is in its lifecycle.
    pub async fn phase(&self) -> StreamPhase {
        let state = self.state.read().await;
        StreamPhase::of(
            state.stage.as_ref().map(ActiveStage::is_complete),
            state.exhausted,
        )
    }

    async fn enter_stage(
        &self,
        seeds: &HashMap<StageId, Vec<String>>,
        info: StageInfo,
    ) -> Result<ActiveStage, SyncError> {
        let num_shards = info.shard_count()?;
        let seeded = seeds.get(&info.stage_id);

        let mut markers = Vec::with_capacity(num_shards);
        for shard_id in 0..num_shards {
            let marker = match seeded.and_then(|m| m.get(shard_id)) {
                Some(marker) => marker.clone(),
                None => {
                    self.provider
                        .get_start_marker(&info.stage_id, shard_id)
                        .await?
                }
            };
            markers.push(marker);
        }

        Ok(StageProgress::enter(info, markers)?.into())
    }
}

impl std::fmt::Debug for ProviderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderClient")
            .field("stream_id", &self.stream_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Client for ProviderClient {
    async fn init_markers(&self) -> Result<(), SyncError> {
        let mut state = self.state.write().await;
        let first = self.provider.get_first_stage();
        // A first stage without info is a topology error
        let info = self.provider.get_stage_info(&first).map_err(|e| match e {
            SyncError::NotFound(what) | SyncError::OutOfRange(what) => SyncError::InvalidTopology(
                format!("first stage {:?} has no stage info: {}", first, what),
            ),
            other => other,
        })?;
        let stage = self.enter_stage(&state.initial_stage_markers, info).await?;
        tracing::info!(
            "Stream {} entered {} stage {} ({} shards)",
            self.stream_id,
            stage.info.stage_type,
            first,
            stage.shards.len()
        );
        state.stage = Some(stage);
        state.exhausted = false;
        Ok(())
    }

    async fn fetch(&self, shard_id: usize, max_entries: usize) -> Result<FetchResult, SyncError> {
        let state = self.state.read().await;
        let stage = state.stage.as_ref().ok_or(SyncError::NotInitialized)?;
        check_shard(&stage.info, stage.shards.len(), shard_id)?;

        let mut shard = stage.shards[shard_id].lock().await;
        let result = self
            .provider
            .fetch(&stage.info.stage_id, shard_id, shard.marker(), max_entries)
            .await?;
        if shard.apply(&result)? {
            let complete = stage.num_complete.fetch_add(1, Ordering::AcqRel) + 1;
            tracing::info!(
                "Shard {} of stage {} done ({}/{})",
                shard_id,
                stage.info.stage_id,
                complete,
                stage.shards.len()
            );
        }
        tracing::debug!(
            "Fetched {} entries from shard {} of stage {}, marker now {:?}",
            result.entries.len(),
            shard_id,
            stage.info.stage_id,
            shard.marker()
        );
        Ok(result)
    }

    async fn load_state(&self) -> Result<(), SyncError> {
        let mut state = self.state.write().await;
        let checkpoint = self
            .store
            .load(&self.stream_id)
            .await?
            .ok_or_else(|| {
                SyncError::NotFound(format!("checkpoint for stream {}", self.stream_id))
            })?;

        let info = self.provider.get_stage_info(&checkpoint.stage_id)?;
        let progress = StageProgress::restore(info, &checkpoint)?;
        tracing::info!(
            "Stream {} resumed stage {} with {}/{} shards done",
            self.stream_id,
            checkpoint.stage_id,
            progress.num_complete(),
            progress.num_shards()
        );
        state.stage = Some(progress.into());
        state.exhausted = false;
        Ok(())
    }

    async fn save_state(&self) -> Result<(), SyncError> {
        let state = self.state.write().await;
        let stage = state.stage.as_ref().ok_or(SyncError::NotInitialized)?;
        let checkpoint = stage.snapshot().await?.checkpoint();
        self.store.save(&self.stream_id, &checkpoint).await
    }

    async fn get_stage_info(&self) -> Option<StageInfo> {
        let state = self.state.read().await;
        state.stage.as_ref().map(|s| s.info.clone())
    }

    async fn stage_num_shards(&self) -> usize {
        let state = self.state.read().await;
        state.stage.as_ref().map_or(0, |s| s.shards.len())
    }

    async fn is_shard_done(&self, shard_id: usize) -> bool {
        let state = self.state.read().await;
        let Some(shard) = state.stage.as_ref().and_then(|s| s.shards.get(shard_id)) else {
            return false;
        };
        // Bound first so the guard drops before `state`
        let done = shard.lock().await.is_done();
        done
    }

    async fn stage_complete(&self) -> bool {
        let state = self.state.read().await;
        state.stage.as_ref().is_some_and(ActiveStage::is_complete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockProvider;
    use stagesync_types::{Entry, StageType};

    fn page(keys: &[&str], more: bool, done: bool) -> FetchResult {
        FetchResult::new(
            keys.iter().map(|k| Entry::new(*k, k.as_bytes().to_vec())).collect(),
            more,
            done,
        )
    }

    fn full_then_inc() -> MockProvider {
        MockProvider::new(vec![
            StageInfo::new("full", StageType::Full, 1),
            StageInfo::new("inc", StageType::Incremental, 2),
        ])
    }

    fn client_for(mock: &MockProvider) -> ProviderClient {
        ProviderClient::new(Arc::new(mock.clone()))
    }

    #[tokio::test]
    async fn fresh_client_is_uninitialized() {
        let mock = full_then_inc();
        let client = client_for(&mock);

        assert_eq!(client.phase().await, StreamPhase::Uninitialized);
        assert_eq!(client.get_stage_info().await, None);
        assert_eq!(client.stage_num_shards().await, 0);
        assert!(!client.stage_complete().await);
        assert!(matches!(client.fetch(0, 10).await, Err(SyncError::NotInitialized)));
        assert!(matches!(client.promote_stage().await, Err(SyncError::NotInitialized)));
        assert!(matches!(client.save_state().await, Err(SyncError::NotInitialized)));
    }

    #[tokio::test]
    async fn init_enters_first_stage_with_start_markers() {
        let mock = full_then_inc();
        mock.set_start_marker("full", 0, "m0");
        let client = client_for(&mock);

        client.init_markers().await.unwrap();

        let info = client.get_stage_info().await.unwrap();
        assert_eq!(info.stage_id, "full");
        assert_eq!(client.stage_num_shards().await, 1);
        assert_eq!(client.marker(0).await.as_deref(), Some("m0"));
        assert_eq!(client.phase().await, StreamPhase::StageActive);
    }

    #[tokio::test]
    async fn init_prefers_seeded_markers() {
        let mock = full_then_inc();
        mock.set_start_marker("full", 0, "provider-start");
        let client = client_for(&mock);
        client.set_initial_stage_markers("full", vec!["seed".into()]).await;

        client.init_markers().await.unwrap();
        assert_eq!(client.marker(0).await.as_deref(), Some("seed"));

        client.fetch(0, 5).await.unwrap();
        assert_eq!(mock.fetches_for("full", 0)[0].marker, "seed");
    }

    #[tokio::test]
    async fn init_rejects_negative_shard_count() {
        let mock = MockProvider::single("broken", StageType::Full, -1);
        let client = client_for(&mock);
        assert!(matches!(
            client.init_markers().await,
            Err(SyncError::InvalidTopology(_))
        ));
        assert_eq!(client.phase().await, StreamPhase::Uninitialized);
    }

    /// Names a first stage whose info lookup fails with `error`.
    struct BrokenFirstStage {
        error: fn(String) -> SyncError,
    }

    #[async_trait]
    impl crate::provider::Provider for BrokenFirstStage {
        fn get_first_stage(&self) -> StageId {
            "ghost".into()
        }

        fn get_last_stage(&self) -> StageId {
            "ghost".into()
        }

        fn get_next_stage(&self, stage_id: &str) -> Result<StageId, SyncError> {
            Err(SyncError::OutOfRange(stage_id.into()))
        }

        fn get_stages(&self) -> Vec<StageId> {
            vec!["ghost".into()]
        }

        fn get_stage_info(&self, stage_id: &str) -> Result<StageInfo, SyncError> {
            Err((self.error)(format!("stage {}", stage_id)))
        }

        async fn fetch(
            &self,
            stage_id: &str,
            _shard_id: usize,
            _marker: &str,
            _max_entries: usize,
        ) -> Result<FetchResult, SyncError> {
            Err(SyncError::NotFound(format!("stage {}", stage_id)))
        }

        async fn get_start_marker(&self, _: &str, _: usize) -> Result<String, SyncError> {
            Ok(String::new())
        }

        async fn get_cur_state(&self, _: &str, _: usize) -> Result<String, SyncError> {
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn init_with_unknown_first_stage_is_invalid_topology() {
        let client = ProviderClient::new(Arc::new(BrokenFirstStage {
            error: SyncError::NotFound,
        }));
        let err = client.init_markers().await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidTopology(_)));
        assert!(err.to_string().contains("ghost"));
        assert_eq!(client.phase().await, StreamPhase::Uninitialized);

        // A provider without any stage names an empty first stage
        let empty = client_for(&MockProvider::new(vec![]));
        assert!(matches!(
            empty.init_markers().await,
            Err(SyncError::InvalidTopology(_))
        ));
    }

    #[tokio::test]
    async fn init_propagates_provider_io_failures() {
        let client = ProviderClient::new(Arc::new(BrokenFirstStage {
            error: SyncError::TransientIo,
        }));
        assert!(matches!(
            client.init_markers().await,
            Err(SyncError::TransientIo(_))
        ));
    }

    #[tokio::test]
    async fn marker_advances_and_resends() {
        let mock = full_then_inc();
        mock.queue_result("full", 0, page(&["a", "b"], true, false));
        mock.queue_result("full", 0, page(&[], false, false));
        mock.queue_result("full", 0, page(&["c"], false, false));
        let client = client_for(&mock);
        client.init_markers().await.unwrap();

        client.fetch(0, 2).await.unwrap();
        assert_eq!(client.marker(0).await.as_deref(), Some("b"));

        // An empty page keeps the marker
        client.fetch(0, 2).await.unwrap();
        assert_eq!(client.marker(0).await.as_deref(), Some("b"));

        client.fetch(0, 2).await.unwrap();
        let markers: Vec<_> = mock.fetches_for("full", 0).into_iter().map(|c| c.marker).collect();
        assert_eq!(markers, vec!["", "b", "b"]);
        assert_eq!(client.marker(0).await.as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn completion_counts_once_per_shard() {
        let mock = MockProvider::single("full", StageType::Full, 2);
        mock.queue_result("full", 0, page(&["x"], false, true));
        mock.queue_result("full", 0, page(&[], false, true));
        let client = client_for(&mock);
        client.init_markers().await.unwrap();

        client.fetch(0, 10).await.unwrap();
        client.fetch(0, 10).await.unwrap();
        assert_eq!(client.num_complete().await, 1);
        assert!(client.is_shard_done(0).await);
        assert!(!client.is_shard_done(1).await);
        assert!(!client.stage_complete().await);

        // Done never reverts
        client.fetch(0, 10).await.unwrap();
        assert!(client.is_shard_done(0).await);
    }

    #[tokio::test]
    async fn failed_fetch_leaves_state_unchanged() {
        let mock = full_then_inc();
        mock.queue_result("full", 0, page(&["a"], true, false));
        let client = client_for(&mock);
        client.init_markers().await.unwrap();
        client.fetch(0, 1).await.unwrap();
        let before = client.checkpoint().await.unwrap();

        mock.fail_next_fetch(SyncError::TransientIo("timeout".into()));
        let err = client.fetch(0, 1).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(client.checkpoint().await.unwrap(), before);
    }

    #[tokio::test]
    async fn more_with_done_is_rejected() {
        let mock = full_then_inc();
        mock.queue_result("full", 0, page(&["a"], true, true));
        let client = client_for(&mock);
        client.init_markers().await.unwrap();
        let before = client.checkpoint().await.unwrap();

        assert!(matches!(
            client.fetch(0, 10).await,
            Err(SyncError::InconsistentResult(_))
        ));
        assert_eq!(client.checkpoint().await.unwrap(), before);
    }

    #[tokio::test]
    async fn out_of_range_shard_is_rejected_without_mutation() {
        let mock = MockProvider::single("full", StageType::Full, 3);
        let client = client_for(&mock);
        client.init_markers().await.unwrap();
        let before = client.checkpoint().await.unwrap();

        assert!(matches!(
            client.fetch(5, 10).await,
            Err(SyncError::InvalidArgument(_))
        ));
        assert_eq!(client.checkpoint().await.unwrap(), before);
        assert!(!client.is_shard_done(5).await);
        assert!(mock.fetches().is_empty());
    }

    #[tokio::test]
    async fn promotion_requires_complete_stage() {
        let mock = MockProvider::single("full", StageType::Full, 2);
        mock.queue_result("full", 0, page(&[], false, true));
        let client = client_for(&mock);
        client.init_markers().await.unwrap();
        client.fetch(0, 10).await.unwrap();

        assert!(matches!(
            client.promote_stage().await,
            Err(SyncError::StageIncomplete { complete: 1, total: 2 })
        ));
        assert_eq!(client.get_stage_info().await.unwrap().stage_id, "full");
    }

    #[tokio::test]
    async fn promotion_reinitializes_for_next_stage() {
        let mock = full_then_inc();
        mock.queue_result("full", 0, page(&["snap"], false, true));
        mock.set_start_marker("inc", 1, "tail-1");
        let client = client_for(&mock);
        client.init_markers().await.unwrap();
        client.fetch(0, 10).await.unwrap();
        assert_eq!(client.phase().await, StreamPhase::StageComplete);

        assert_eq!(client.promote_stage().await.unwrap(), 2);
        let info = client.get_stage_info().await.unwrap();
        assert_eq!(info.stage_type, StageType::Incremental);
        assert_eq!(client.num_complete().await, 0);
        assert!(!client.is_shard_done(0).await);
        assert!(!client.is_shard_done(1).await);
        assert_eq!(client.marker(0).await.as_deref(), Some(""));
        assert_eq!(client.marker(1).await.as_deref(), Some("tail-1"));
        assert_eq!(client.phase().await, StreamPhase::StageActive);
    }

    #[tokio::test]
    async fn promotion_past_last_stage_exhausts() {
        let mock = MockProvider::single("full", StageType::Full, 1);
        mock.queue_result("full", 0, page(&["k"], false, true));
        let client = client_for(&mock);
        client.init_markers().await.unwrap();
        client.fetch(0, 10).await.unwrap();
        let before = client.checkpoint().await.unwrap();

        for _ in 0..2 {
            assert!(matches!(client.promote_stage().await, Err(SyncError::NoMoreStages)));
        }
        assert_eq!(client.phase().await, StreamPhase::Exhausted);
        assert_eq!(client.checkpoint().await.unwrap(), before);
        assert!(client.stage_complete().await);
    }

    #[tokio::test]
    async fn zero_shard_stage_is_immediately_complete() {
        let mock = MockProvider::new(vec![
            StageInfo::new("empty", StageType::Full, 0),
            StageInfo::new("inc", StageType::Incremental, 1),
        ]);
        let client = client_for(&mock);
        client.init_markers().await.unwrap();

        assert!(client.stage_complete().await);
        assert!(!client.is_shard_done(0).await);
        assert_eq!(client.promote_stage().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn seed_from_current_state_skips_backlog() {
        let mock = full_then_inc();
        mock.set_cur_state("inc", 0, "t0");
        mock.set_cur_state("inc", 1, "t1");
        mock.queue_result("full", 0, page(&[], false, true));
        let client = client_for(&mock);

        client.seed_from_current_state("inc").await.unwrap();
        client.init_markers().await.unwrap();
        client.fetch(0, 10).await.unwrap();
        client.promote_stage().await.unwrap();

        assert_eq!(client.marker(0).await.as_deref(), Some("t0"));
        assert_eq!(client.marker(1).await.as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn save_then_load_restores_progress() {
        let mock = MockProvider::single("inc", StageType::Incremental, 2);
        mock.queue_result("inc", 0, page(&["a", "b"], false, true));
        mock.queue_result("inc", 1, page(&["c"], true, false));
        let store = Arc::new(MemoryStateStore::new());
        let provider: ProviderRef = Arc::new(mock.clone());

        let client = ProviderClient::with_store(provider.clone(), "zone", store.clone());
        client.init_markers().await.unwrap();
        client.fetch(0, 10).await.unwrap();
        client.fetch(1, 10).await.unwrap();
        client.save_state().await.unwrap();

        let resumed = ProviderClient::with_store(provider, "zone", store);
        resumed.load_state().await.unwrap();
        assert_eq!(resumed.checkpoint().await.unwrap(), client.checkpoint().await.unwrap());
        assert_eq!(resumed.num_complete().await, 1);
        assert!(resumed.is_shard_done(0).await);
        assert_eq!(resumed.marker(1).await.as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn load_without_checkpoint_is_not_found() {
        let mock = full_then_inc();
        let client = client_for(&mock);
        assert!(matches!(client.load_state().await, Err(SyncError::NotFound(_))));
        assert_eq!(client.phase().await, StreamPhase::Uninitialized);
    }

    #[tokio::test]
    async fn load_rejects_resharded_stage() {
        let store = Arc::new(MemoryStateStore::new());
        store
            .save(
                "zone",
                &StageCheckpoint {
                    stage_id: "inc".into(),
                    markers: vec![String::new(); 3],
                    done: vec![false; 3],
                    num_complete: 0,
                },
            )
            .await
            .unwrap();

        let client = ProviderClient::with_store(Arc::new(full_then_inc()), "zone", store);
        assert!(matches!(
            client.load_state().await,
            Err(SyncError::InvalidTopology(_))
        ));
    }

    #[tokio::test]
    async fn failed_save_leaves_state_unchanged() {
        let mock = full_then_inc();
        mock.queue_result("full", 0, page(&["a"], true, false));
        let store = Arc::new(MemoryStateStore::new());
        let client = ProviderClient::with_store(Arc::new(mock), "zone", store.clone());
        client.init_markers().await.unwrap();
        client.fetch(0, 10).await.unwrap();
        let before = client.checkpoint().await.unwrap();

        store.fail_next_save(SyncError::TransientIo("busy".into()));
        assert!(matches!(
            client.save_state().await,
            Err(SyncError::TransientIo(_))
        ));
        assert_eq!(client.checkpoint().await.unwrap(), before);
        assert_eq!(store.get("zone"), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_shards_complete_exactly_once() {
        const SHARDS: usize = 16;
        let mock = MockProvider::single("full", StageType::Full, SHARDS as i32);
        for shard in 0..SHARDS {
            let key = format!("k{}", shard);
            mock.queue_result("full", shard, page(&[key.as_str()], false, true));
            mock.queue_result("full", shard, page(&[], false, true));
        }
        let client = Arc::new(client_for(&mock));
        client.init_markers().await.unwrap();

        let mut handles = Vec::new();
        for shard in 0..SHARDS {
            for _ in 0..2 {
                let client = client.clone();
                handles.push(tokio::spawn(async move { client.fetch(shard, 10).await }));
            }
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(client.num_complete().await, SHARDS);
        assert!(client.stage_complete().await);
        for shard in 0..SHARDS {
            assert_eq!(client.marker(shard).await, Some(format!("k{}", shard)));
        }
    }

    #[tokio::test]
    async fn clients_share_one_provider() {
        let mock = MockProvider::single("full", StageType::Full, 1);
        let provider: ProviderRef = Arc::new(mock.clone());
        let a = ProviderClient::new(provider.clone());
        let b = ProviderClient::new(provider);
        a.init_markers().await.unwrap();
        b.init_markers().await.unwrap();

        mock.queue_result("full", 0, page(&["x"], false, true));
        a.fetch(0, 1).await.unwrap();
        assert!(a.stage_complete().await);
        assert!(!b.stage_complete().await);
    }
}
