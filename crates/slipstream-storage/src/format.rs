//! Format Encoders
//!
//! Converts record values into the bytes written through the chain. Encoders
//! are selected by a factory keyed on the slice file type - adding a format
//! means a new variant and a new factory branch, nothing else.
//!
//! Encoders are stateless and shared: many write calls render rows
//! concurrently (bounded by the writer's formatting semaphore) and only the
//! final chain write is serialized.

use std::sync::Arc;

use serde_json::Value;

use slipstream_core::{Error as CoreError, FileType, Slice};

use crate::error::Result;

pub trait FormatEncoder: Send + Sync {
    /// Render one record into `out`. The value count is already validated
    /// against the slice columns by the writer.
    fn encode_record(&self, values: &[Value], out: &mut Vec<u8>) -> Result<()>;
}

/// Select the encoder implementation for a slice.
pub fn new_encoder(slice: &Slice) -> Result<Arc<dyn FormatEncoder>> {
    match slice.file_type {
        FileType::Csv => Ok(Arc::new(CsvEncoder)),
    }
}

/// RFC 4180 CSV rows: fields quoted when needed, `\n` row terminator.
pub struct CsvEncoder;

impl CsvEncoder {
    fn write_field(out: &mut Vec<u8>, field: &str) {
        let needs_quoting = field
            .bytes()
            .any(|b| matches!(b, b',' | b'"' | b'\n' | b'\r'));
        if !needs_quoting {
            out.extend_from_slice(field.as_bytes());
            return;
        }

        out.push(b'"');
        for b in field.bytes() {
            if b == b'"' {
                out.push(b'"');
            }
            out.push(b);
        }
        out.push(b'"');
    }

    /// Cast a JSON value to its CSV text form: strings as-is, scalars via
    /// their display form, composites as JSON.
    fn cast(value: &Value) -> std::result::Result<String, CoreError> {
        match value {
            Value::Null => Ok(String::new()),
            Value::String(s) => Ok(s.clone()),
            Value::Bool(b) => Ok(b.to_string()),
            Value::Number(n) => Ok(n.to_string()),
            composite => serde_json::to_string(composite)
                .map_err(|e| CoreError::InvalidConfig(format!("cannot cast value to string: {e}"))),
        }
    }
}

impl FormatEncoder for CsvEncoder {
    fn encode_record(&self, values: &[Value], out: &mut Vec<u8>) -> Result<()> {
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                out.push(b',');
            }
            let field = Self::cast(value)?;
            Self::write_field(out, &field);
        }
        out.push(b'\n');
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encode(values: &[Value]) -> String {
        let mut out = Vec::new();
        CsvEncoder.encode_record(values, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn plain_fields() {
        assert_eq!(encode(&[json!("abc"), json!("def")]), "abc,def\n");
    }

    #[test]
    fn scalars_are_cast_to_text() {
        assert_eq!(encode(&[json!(1), json!(2.5), json!(true), json!(null)]), "1,2.5,true,\n");
    }

    #[test]
    fn fields_with_separators_are_quoted() {
        assert_eq!(encode(&[json!("a,b"), json!("c")]), "\"a,b\",c\n");
        assert_eq!(encode(&[json!("line\nbreak")]), "\"line\nbreak\"\n");
    }

    #[test]
    fn quotes_are_doubled() {
        assert_eq!(encode(&[json!("say \"hi\"")]), "\"say \"\"hi\"\"\"\n");
    }

    #[test]
    fn composites_are_encoded_as_json() {
        assert_eq!(encode(&[json!({"a": 1})]), "\"{\"\"a\"\":1}\"\n");
    }
}
