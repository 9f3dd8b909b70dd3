//! Column Declarations
//!
//! A slice declares the columns every record must provide. The writer rejects
//! rows whose value count does not match the declared column count before any
//! byte is written.

use serde::{Deserialize, Serialize};

/// How a column value is produced/interpreted by the format writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    /// Opaque generated identifier.
    Id,
    /// Record timestamp.
    Datetime,
    /// Raw record body.
    Body,
    /// Arbitrary header/metadata value.
    Header,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}
