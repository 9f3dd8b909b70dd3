//! Slipstream Core Types
//!
//! Shared model types for the slipstream storage engine. Everything here is
//! plain data: identity keys, column declarations, the per-slice local
//! storage layout, and the sync/compression policies a slice carries.
//!
//! The crate is dependency-light on purpose - it sits under every other
//! slipstream crate:
//!
//! ```text
//! ┌───────────────────┐  ┌────────────────────┐
//! │ slipstream-remote │  │ slipstream-metadata │
//! └─────────┬─────────┘  └──────────┬─────────┘
//!           │   ┌──────────────────┐│
//!           └──▶│ slipstream-storage│◀
//!               └─────────┬────────┘
//!                         ▼
//!               ┌──────────────────┐
//!               │ slipstream-core  │ ◀── You are here
//!               └──────────────────┘
//! ```

pub mod column;
pub mod compression;
pub mod error;
pub mod keys;
pub mod slice;
pub mod sync;

pub use column::{Column, ColumnKind};
pub use compression::Compression;
pub use error::{Error, Result};
pub use keys::{SinkId, SliceId, SliceKey, SourceId, VolumeId};
pub use slice::{FileType, LocalSlice, Slice};
pub use sync::{SyncConfig, SyncMode};
