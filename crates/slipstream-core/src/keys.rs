//! Identity Keys
//!
//! Stable identifiers for sources, sinks, volumes and slices. A slice is
//! addressed by the full coordinate set ([`SliceKey`]): which source produced
//! it, which sink it belongs to, which file generation it is part of, which
//! volume hosts it, and when it was opened.
//!
//! `SliceKey::path()` renders the canonical `{source}/{sink}/{file}/{volume}/{slice}`
//! form used both for the on-disk directory layout and as the statistics key
//! prefix, so aggregation over "everything under a sink" is a prefix scan.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Identifier of a record producer (an ingestion endpoint).
    SourceId
);
string_id!(
    /// Identifier of a sink (a destination table) under a source.
    SinkId
);
string_id!(
    /// Unique identifier of a volume, generated on first open and persisted
    /// in the volume ID file.
    VolumeId
);

/// Opening timestamp of a slice, also its identity within a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SliceId(pub DateTime<Utc>);

impl SliceId {
    pub fn opened_at(&self) -> DateTime<Utc> {
        self.0
    }
}

impl fmt::Display for SliceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_rfc3339_opts(SecondsFormat::Millis, true))
    }
}

/// Full coordinates of one slice.
///
/// The key is immutable for the lifetime of the slice. Two writers for the
/// same key must never be open at the same time within a volume.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SliceKey {
    pub source_id: SourceId,
    pub sink_id: SinkId,
    /// Opening timestamp of the parent file generation.
    pub file_id: SliceId,
    pub volume_id: VolumeId,
    pub slice_id: SliceId,
}

impl SliceKey {
    /// Canonical path form, used for directory layout and statistics prefixes.
    pub fn path(&self) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.source_id, self.sink_id, self.file_id, self.volume_id, self.slice_id
        )
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.slice_id.opened_at()
    }
}

impl fmt::Display for SliceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}
