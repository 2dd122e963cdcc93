//! # sync-types
//!
//! Wire format and protocol types for stagesync, a staged and sharded log
//! replication protocol.
//!
//! This crate provides the foundational types used across all stagesync crates:
//! - [`LogRecord`], [`LogHeader`] - The replicated unit and its log summary
//! - [`StageType`], [`StageInfo`] - Stage topology as reported by a provider
//! - [`Entry`], [`FetchResult`] - One page of a shard fetch
//! - [`Timestamp`] - Wall-clock time carried on the wire
//! - [`SyncError`] - Error taxonomy shared by providers and clients

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod log;
mod stage;
mod time;

pub use error::{Result, SyncError};
pub use log::{LogHeader, LogRecord, LOG_HEADER_VERSION, LOG_RECORD_VERSION};
pub use stage::{Entry, FetchResult, StageId, StageInfo, StageType};
pub use time::Timestamp;
