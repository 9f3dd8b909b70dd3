//! Slipstream Storage Layer
//!
//! The local durable storage writer engine: this crate owns everything
//! between an accepted record and bytes safely on a local disk.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌───────────────┐
//! │   Producers   │
//! └───────┬───────┘
//!         │ write_record(timestamp, values)
//!         ▼
//! ┌───────────────────────────────────────────────┐
//! │ SliceWriter                                   │
//! │  format encoder ─▶ write chain ─▶ slice file  │
//! │        │                ▲                     │
//! │   counters/meters       │ flush / fsync       │
//! │        │                │                     │
//! │        └──▶ disk-sync engine (triggers)       │
//! └───────────────────┬───────────────────────────┘
//!                     │ owned by
//!                     ▼
//! ┌───────────────────────────────────────────────┐
//! │ Volume  {path}/{kind}/{label}                 │
//! │  ID file · lock file · drain marker           │
//! └───────────────────┬───────────────────────────┘
//!                     │ detected/owned by
//!                     ▼
//!             Volumes collection
//! ```
//!
//! ## Main Components
//!
//! - [`chain::WriteChain`] - composable pipeline of byte-transforming stages
//!   ending in the file, with ordered flush/sync/close.
//! - [`sync::Syncer`] - decides when accumulated writes become durable and
//!   what callers must wait for; coalesces concurrent sync requests into a
//!   single in-flight cycle.
//! - [`writer::SliceWriter`] - per-slice record API with statistics
//!   accessors and lifecycle events.
//! - [`volume::Volume`] / [`volumes::Volumes`] - exclusive ownership of the
//!   on-disk directories hosting the slices.
//! - [`count`] / [`meter`] - record/byte statistics with crash-surviving
//!   disk backups.

pub mod alloc;
pub mod buffer;
pub mod chain;
pub mod compress;
pub mod config;
pub mod count;
pub mod error;
pub mod events;
pub mod format;
pub mod lock;
pub mod meter;
pub mod notify;
pub mod sync;
pub mod volume;
pub mod volumes;
pub mod writer;

pub use chain::{ChainFile, WriteChain};
pub use config::{FileOpener, VolumeConfig, WriterConfig};
pub use count::{Counter, CounterWithBackup};
pub use error::{Error, MultiError, Result};
pub use events::Events;
pub use meter::MeterWithBackup;
pub use notify::Notifier;
pub use sync::{SyncStats, Syncer};
pub use volume::{Volume, VolumeSpec, DRAIN_FILE, ID_FILE, LOCK_FILE};
pub use volumes::Volumes;
pub use writer::{
    SliceWriter, COMPLETED_COUNT_FILE, COMPRESSED_SIZE_FILE, UNCOMPRESSED_SIZE_FILE,
};
