//! Slipstream Metadata Interfaces
//!
//! The storage core consumes and produces metadata through two narrow seams,
//! both defined here:
//!
//! - **Slice registry** ([`registry`]) - a read-only, continuously updated
//!   view of "slice → local-storage layout". The distributed store behind it
//!   is an external collaborator; the in-process implementation is the
//!   in-memory registry with a broadcast change feed.
//! - **Statistics registry** ([`statistics`]) - per-slice counters/meters
//!   snapshots pushed by slice writers, consumed by the two-tier read cache
//!   ([`cache`]): L1 mirrors every record and aggregates by key prefix on
//!   each query; L2 memoizes aggregates per prefix and is invalidated
//!   wholesale on a fixed interval.

pub mod cache;
pub mod error;
pub mod registry;
pub mod statistics;

pub use cache::{L1Cache, L2Cache};
pub use error::{Error, Result};
pub use registry::{MemoryRegistry, SliceEvent, SliceRegistry};
pub use statistics::{StatsEvent, StatsRegistry, StatsValue};
