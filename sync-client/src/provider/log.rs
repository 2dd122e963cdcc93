//! In-memory sharded log serving [`LogRecord`]s.
//!
//! Records are appended to a shard and get a zero-padded id from a log-wide
//! sequence, so ids sort lexicographically in append order and double as
//! markers. Entries carry the record's versioned wire encoding.
//!
//! An unsealed log is a tail that never finishes. After [`MemoryLog::seal`]
//! the log is a finite snapshot and a shard reports done once fully read.

use super::ShardSource;
use async_trait::async_trait;
use stagesync_types::{Entry, FetchResult, LogHeader, LogRecord, SyncError, Timestamp};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Width of a record id; fixed so lexicographic order is numeric order.
const ID_WIDTH: usize = 20;

/// A sharded, append-only log kept in memory.
///
/// Clones share the same log.
#[derive(Debug, Clone)]
pub struct MemoryLog {
    num_shards: usize,
    inner: Arc<RwLock<MemoryLogInner>>,
}

#[derive(Debug, Default)]
struct MemoryLogInner {
    shards: Vec<LogShard>,
    next_seq: u64,
    sealed: bool,
}

#[derive(Debug, Default)]
struct LogShard {
    records: Vec<LogRecord>,
    header: LogHeader,
}

impl MemoryLog {
    /// Create an empty log with `num_shards` shards.
    pub fn new(num_shards: usize) -> Self {
        let shards = (0..num_shards).map(|_| LogShard::default()).collect();
        Self {
            num_shards,
            inner: Arc::new(RwLock::new(MemoryLogInner {
                shards,
                next_seq: 1,
                sealed: false,
            })),
        }
    }

    /// Number of shards.
    pub fn num_shards(&self) -> usize {
        self.num_shards
    }

    /// Append a record to a shard, assigning its id and timestamp.
    pub async fn append(
        &self,
        shard_id: usize,
        section: impl Into<String>,
        name: impl Into<String>,
        data: Vec<u8>,
    ) -> Result<LogRecord, SyncError> {
        self.check_shard(shard_id)?;
        let mut inner = self.inner.write().await;
        if inner.sealed {
            return Err(SyncError::InvalidArgument("log is sealed".into()));
        }

        let id = format!("{:0width$}", inner.next_seq, width = ID_WIDTH);
        inner.next_seq += 1;

        let record = LogRecord::new(Timestamp::now(), section, name, data).with_id(id);
        let shard = &mut inner.shards[shard_id];
        shard.header = LogHeader::new(record.id.clone(), record.timestamp);
        shard.records.push(record.clone());
        Ok(record)
    }

    /// Newest committed position of a shard.
    pub async fn header(&self, shard_id: usize) -> Result<LogHeader, SyncError> {
        self.check_shard(shard_id)?;
        let inner = self.inner.read().await;
        Ok(inner.shards[shard_id].header.clone())
    }

    /// Freeze the log; shards report done once fully read.
    pub async fn seal(&self) {
        self.inner.write().await.sealed = true;
    }

    /// Whether the log was sealed.
    pub async fn is_sealed(&self) -> bool {
        self.inner.read().await.sealed
    }

    fn check_shard(&self, shard_id: usize) -> Result<(), SyncError> {
        if shard_id < self.num_shards {
            Ok(())
        } else {
            Err(SyncError::InvalidArgument(format!(
                "shard {} out of range for log with {} shards",
                shard_id, self.num_shards
            )))
        }
    }
}

fn check_marker(marker: &str) -> Result<(), SyncError> {
    if marker.is_empty() || (marker.len() == ID_WIDTH && marker.bytes().all(|b| b.is_ascii_digit()))
    {
        Ok(())
    } else {
        Err(SyncError::InvalidArgument(format!(
            "malformed marker {:?}",
            marker
        )))
    }
}

#[async_trait]
impl ShardSource for MemoryLog {
    async fn fetch(
        &self,
        shard_id: usize,
        marker: &str,
        max_entries: usize,
    ) -> Result<FetchResult, SyncError> {
        self.check_shard(shard_id)?;
        check_marker(marker)?;

        let inner = self.inner.read().await;
        let records = &inner.shards[shard_id].records;
        let start = records.partition_point(|r| r.id.as_str() <= marker);
        let end = start.saturating_add(max_entries).min(records.len());

        let entries = records[start..end]
            .iter()
            .map(|r| r.to_bytes().map(|data| Entry::new(r.id.clone(), data)))
            .collect::<Result<Vec<_>, SyncError>>()?;

        let more = end < records.len();
        let done = inner.sealed && !more;
        Ok(FetchResult::new(entries, more, done))
    }

    async fn start_marker(&self, shard_id: usize) -> Result<String, SyncError> {
        self.check_shard(shard_id)?;
        Ok(String::new())
    }

    async fn cur_state(&self, shard_id: usize) -> Result<String, SyncError> {
        Ok(self.header(shard_id).await?.max_marker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn log_with(records_per_shard: &[usize]) -> MemoryLog {
        let log = MemoryLog::new(records_per_shard.len());
        for (shard, &count) in records_per_shard.iter().enumerate() {
            for i in 0..count {
                log.append(shard, "bucket", format!("obj-{}", i), vec![i as u8])
                    .await
                    .unwrap();
            }
        }
        log
    }

    #[tokio::test]
    async fn ids_sort_in_append_order() {
        let log = MemoryLog::new(1);
        let a = log.append(0, "s", "a", vec![]).await.unwrap();
        let b = log.append(0, "s", "b", vec![]).await.unwrap();
        assert_eq!(a.id.len(), ID_WIDTH);
        assert!(a.id < b.id);
    }

    #[tokio::test]
    async fn fetch_returns_decodable_records() {
        let log = log_with(&[2]).await;
        let result = log.fetch(0, "", 10).await.unwrap();
        assert_eq!(result.entries.len(), 2);

        let record = LogRecord::from_bytes(&result.entries[1].data).unwrap();
        assert_eq!(record.name, "obj-1");
        assert_eq!(record.id, result.entries[1].key);
    }

    #[tokio::test]
    async fn pagination_has_no_gaps_or_duplicates() {
        let log = log_with(&[7]).await;
        let mut marker = String::new();
        let mut seen = Vec::new();
        loop {
            let page = log.fetch(0, &marker, 3).await.unwrap();
            seen.extend(page.entries.iter().map(|e| e.key.clone()));
            if let Some(last) = page.last_key() {
                marker = last.to_string();
            }
            if !page.more {
                break;
            }
        }
        assert_eq!(seen.len(), 7);
        let mut deduped = seen.clone();
        deduped.dedup();
        assert_eq!(seen, deduped);
    }

    #[tokio::test]
    async fn fetch_is_idempotent() {
        let log = log_with(&[5]).await;
        let first = log.fetch(0, "", 2).await.unwrap();
        let again = log.fetch(0, "", 2).await.unwrap();
        assert_eq!(first, again);
    }

    #[tokio::test]
    async fn unsealed_log_never_reports_done() {
        let log = log_with(&[1]).await;
        let page = log.fetch(0, "", 10).await.unwrap();
        assert!(!page.more);
        assert!(!page.done);
    }

    #[tokio::test]
    async fn sealed_log_reports_done_at_end() {
        let log = log_with(&[3]).await;
        log.seal().await;

        let first = log.fetch(0, "", 2).await.unwrap();
        assert!(first.more);
        assert!(!first.done);

        let rest = log.fetch(0, first.last_key().unwrap(), 2).await.unwrap();
        assert!(!rest.more);
        assert!(rest.done);
        assert!(rest.is_consistent());
    }

    #[tokio::test]
    async fn sealed_log_rejects_appends() {
        let log = MemoryLog::new(1);
        log.seal().await;
        assert!(log.is_sealed().await);
        assert!(matches!(
            log.append(0, "s", "n", vec![]).await,
            Err(SyncError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn header_tracks_newest_record() {
        let log = MemoryLog::new(2);
        assert_eq!(log.header(0).await.unwrap(), LogHeader::default());

        let record = log.append(0, "s", "n", vec![]).await.unwrap();
        let header = log.header(0).await.unwrap();
        assert_eq!(header.max_marker, record.id);
        assert_eq!(header.max_time, record.timestamp);
        assert_eq!(log.cur_state(0).await.unwrap(), record.id);
        assert_eq!(log.cur_state(1).await.unwrap(), "");
    }

    #[tokio::test]
    async fn fetch_from_current_state_skips_backlog() {
        let log = log_with(&[4]).await;
        let tail = log.cur_state(0).await.unwrap();
        assert!(log.fetch(0, &tail, 10).await.unwrap().entries.is_empty());

        log.append(0, "s", "fresh", vec![]).await.unwrap();
        let page = log.fetch(0, &tail, 10).await.unwrap();
        assert_eq!(page.entries.len(), 1);
    }

    #[tokio::test]
    async fn malformed_marker_is_invalid_argument() {
        let log = log_with(&[1]).await;
        assert!(matches!(
            log.fetch(0, "not-a-marker", 1).await,
            Err(SyncError::InvalidArgument(_))
        ));
        assert!(matches!(
            log.fetch(3, "", 1).await,
            Err(SyncError::InvalidArgument(_))
        ));
    }
}
