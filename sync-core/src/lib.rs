//! # sync-core
//!
//! Pure logic for stagesync (no I/O, instant tests).
//!
//! This crate implements per-shard progress tracking, stage completion and
//! the stream lifecycle without any network or disk I/O.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (provider fetches, state persistence) is performed by
//! `sync-client`, which owns the locking around these types.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod checkpoint;
pub mod progress;

pub use backoff::calculate_backoff;
pub use checkpoint::StageCheckpoint;
pub use progress::{check_shard, ShardProgress, StageProgress, StreamPhase};
