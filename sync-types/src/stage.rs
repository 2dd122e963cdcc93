//! Stage topology and fetch results.
//!
//! A replication stream is split into stages (a full backfill, an
//! incremental tail) and every stage into independently consumable shards.

use serde::{Deserialize, Serialize};

use crate::SyncError;

/// Provider-defined stage identifier.
pub type StageId = String;

/// The kind of data a stage carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StageType {
    /// No stage; never reported for a real stage.
    #[default]
    Unknown,
    /// Complete snapshot (bulk backfill).
    Full,
    /// Tailing delta stage.
    Incremental,
}

impl std::fmt::Display for StageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StageType::Unknown => "unknown",
            StageType::Full => "full",
            StageType::Incremental => "incremental",
        };
        f.write_str(name)
    }
}

/// Description of one stage as reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StageInfo {
    /// Stage identifier.
    pub stage_id: StageId,
    /// What the stage carries.
    pub stage_type: StageType,
    /// Shard count exactly as the provider reported it.
    pub num_shards: i32,
}

impl StageInfo {
    /// Create a stage description.
    pub fn new(stage_id: impl Into<StageId>, stage_type: StageType, num_shards: i32) -> Self {
        Self {
            stage_id: stage_id.into(),
            stage_type,
            num_shards,
        }
    }

    /// The shard count as a size.
    ///
    /// A negative count is reported as [`SyncError::InvalidTopology`], never
    /// clamped.
    pub fn shard_count(&self) -> Result<usize, SyncError> {
        usize::try_from(self.num_shards).map_err(|_| {
            SyncError::InvalidTopology(format!(
                "stage {} reports {} shards",
                self.stage_id, self.num_shards
            ))
        })
    }
}

/// One item returned by a shard fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Marker that resumes the shard right after this entry.
    pub key: String,
    /// Opaque payload.
    pub data: Vec<u8>,
}

impl Entry {
    /// Create an entry.
    pub fn new(key: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            data,
        }
    }
}

/// One page of a shard fetch.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FetchResult {
    /// Entries in shard order.
    pub entries: Vec<Entry>,
    /// More entries are available right now.
    pub more: bool,
    /// The shard has reached the end of the stage.
    pub done: bool,
}

impl FetchResult {
    /// A result with the given entries and flags.
    pub fn new(entries: Vec<Entry>, more: bool, done: bool) -> Self {
        Self {
            entries,
            more,
            done,
        }
    }

    /// An empty page with nothing pending.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A terminal page: the shard is finished after these entries.
    pub fn finished(entries: Vec<Entry>) -> Self {
        Self::new(entries, false, true)
    }

    /// Key of the last entry, i.e. the marker to resume from.
    pub fn last_key(&self) -> Option<&str> {
        self.entries.last().map(|e| e.key.as_str())
    }

    /// Whether the flags describe a valid state.
    ///
    /// `more` and `done` are mutually exclusive: a finished shard has nothing
    /// further to offer.
    pub fn is_consistent(&self) -> bool {
        !(self.more && self.done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_shard_count_is_invalid_topology() {
        let info = StageInfo::new("full", StageType::Full, -1);
        assert!(matches!(
            info.shard_count(),
            Err(SyncError::InvalidTopology(_))
        ));
        assert_eq!(StageInfo::new("inc", StageType::Incremental, 4).shard_count().unwrap(), 4);
    }

    #[test]
    fn stage_type_defaults_to_unknown() {
        assert_eq!(StageInfo::default().stage_type, StageType::Unknown);
        assert_eq!(StageType::Incremental.to_string(), "incremental");
    }

    #[test]
    fn last_key_is_resume_marker() {
        let result = FetchResult::new(
            vec![Entry::new("001", vec![1]), Entry::new("002", vec![2])],
            true,
            false,
        );
        assert_eq!(result.last_key(), Some("002"));
        assert_eq!(FetchResult::empty().last_key(), None);
    }

    #[test]
    fn more_and_done_are_exclusive() {
        assert!(FetchResult::finished(vec![]).is_consistent());
        assert!(FetchResult::new(vec![], true, false).is_consistent());
        assert!(!FetchResult::new(vec![], true, true).is_consistent());
    }

    #[test]
    fn stage_info_json_roundtrip() {
        let info = StageInfo::new("full", StageType::Full, 8);
        let json = serde_json::to_string(&info).unwrap();
        let restored: StageInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(info, restored);
    }
}
