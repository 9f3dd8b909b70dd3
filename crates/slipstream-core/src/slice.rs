//! Slice Model
//!
//! A slice is one append-only data file plus its small auxiliary backup
//! files. [`SliceKey`] is its immutable identity; [`LocalSlice`] is the
//! mutable local-storage layout the metadata layer assigns to it: where the
//! file lives inside the volume, how it is synced, whether it is compressed,
//! and how much disk space to pre-allocate.

use serde::{Deserialize, Serialize};

use crate::column::Column;
use crate::compression::Compression;
use crate::keys::SliceKey;
use crate::sync::SyncConfig;

/// Format of the slice data file, selects the format writer implementation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    #[default]
    Csv,
}

/// Local-storage layout of a slice inside its volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalSlice {
    /// Directory of the slice, relative to the volume path.
    pub dir: String,

    /// Data file name inside `dir` (compression extension included).
    pub filename: String,

    /// Disk space to pre-allocate when the file is first created.
    /// Zero disables pre-allocation. Allocation failure is not fatal.
    pub allocate_space: u64,

    pub compression: Compression,

    pub sync: SyncConfig,
}

impl LocalSlice {
    /// Default layout for a slice key: the key path as directory, a `slice.csv`
    /// file with the compression extension appended.
    pub fn for_key(key: &SliceKey, compression: Compression, sync: SyncConfig) -> Self {
        Self {
            dir: key.path(),
            filename: format!("slice.csv{}", compression.extension()),
            allocate_space: 0,
            compression,
            sync,
        }
    }
}

/// A slice: identity, declared columns, file type and local-storage layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slice {
    pub key: SliceKey,
    pub file_type: FileType,
    pub columns: Vec<Column>,
    pub local: LocalSlice,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::ColumnKind;
    use crate::keys::{SliceId, SliceKey};
    use chrono::{TimeZone, Utc};

    #[test]
    fn local_slice_for_key_appends_compression_extension() {
        let at = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        let key = SliceKey {
            source_id: "s".into(),
            sink_id: "t".into(),
            file_id: SliceId(at),
            volume_id: "v".into(),
            slice_id: SliceId(at),
        };

        let plain = LocalSlice::for_key(&key, Compression::None, SyncConfig::default());
        assert_eq!(plain.filename, "slice.csv");

        let compressed = LocalSlice::for_key(&key, Compression::Lz4, SyncConfig::default());
        assert_eq!(compressed.filename, "slice.csv.lz4");
        assert_eq!(compressed.dir, key.path());
    }

    #[test]
    fn slice_roundtrip_json() {
        let at = Utc.with_ymd_and_hms(2001, 2, 3, 4, 5, 6).unwrap();
        let key = SliceKey {
            source_id: "src".into(),
            sink_id: "sink".into(),
            file_id: SliceId(at),
            volume_id: "vol".into(),
            slice_id: SliceId(at),
        };
        let slice = Slice {
            local: LocalSlice::for_key(&key, Compression::None, SyncConfig::default()),
            key,
            file_type: FileType::Csv,
            columns: vec![
                Column::new("id", ColumnKind::Id),
                Column::new("body", ColumnKind::Body),
            ],
        };
        let json = serde_json::to_string(&slice).unwrap();
        let decoded: Slice = serde_json::from_str(&json).unwrap();
        assert_eq!(slice, decoded);
    }
}
