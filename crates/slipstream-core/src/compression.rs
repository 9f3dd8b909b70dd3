//! Compression Policy
//!
//! The compression stage itself is pluggable; the slice only carries which
//! codec to insert into the write chain.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Lz4,
}

impl Compression {
    /// File extension appended to the slice filename, empty for no compression.
    pub fn extension(&self) -> &'static str {
        match self {
            Compression::None => "",
            Compression::Lz4 => ".lz4",
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Compression::None)
    }
}
