//! Wire ↔ Model Conversions
//!
//! Slice keys travel as plain strings on the wire; timestamps use the same
//! RFC 3339 millisecond form as the rest of the system.

use chrono::{DateTime, SecondsFormat, Utc};

use slipstream_core::{SliceId, SliceKey};
use slipstream_proto::slicefile as pb;

use crate::error::Error;

pub fn key_to_pb(key: &SliceKey) -> pb::SliceKey {
    pb::SliceKey {
        source_id: key.source_id.to_string(),
        sink_id: key.sink_id.to_string(),
        file_id: format_ts(key.file_id.opened_at()),
        volume_id: key.volume_id.to_string(),
        slice_id: format_ts(key.slice_id.opened_at()),
    }
}

pub fn key_from_pb(key: &pb::SliceKey) -> Result<SliceKey, Error> {
    Ok(SliceKey {
        source_id: key.source_id.as_str().into(),
        sink_id: key.sink_id.as_str().into(),
        file_id: SliceId(parse_ts(&key.file_id)?),
        volume_id: key.volume_id.as_str().into(),
        slice_id: SliceId(parse_ts(&key.slice_id)?),
    })
}

fn format_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, Error> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| Error::InvalidKey(format!("invalid timestamp \"{s}\": {err}")))
}
