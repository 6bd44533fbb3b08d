//! Change event sources.
//!
//! A source delivers raw event envelopes (value JSON plus optional key
//! JSON) to the router one at a time; the router's synchronous handling
//! keeps source order intact. The bundled [`JsonLinesSource`] reads
//! newline-delimited JSON from a file or stdin, which is how a CDC
//! console consumer or a replayed event capture is wired in.

use crate::config::SourceConfig;
use crate::error::{Result, RouterError};
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tracing::debug;

/// One raw envelope as delivered by a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    /// Key envelope JSON, when the source carries one
    pub key: Option<String>,
    /// Value envelope JSON
    pub value: String,
}

/// A pull-based source of change event envelopes
#[async_trait]
pub trait ChangeSource: Send {
    /// Next envelope in source order; `None` at end of stream
    async fn next_record(&mut self) -> Result<Option<SourceRecord>>;
}

/// Newline-delimited JSON source.
///
/// Each non-blank line is one event. A line may be either a bare value
/// envelope, or a wrapper object `{"key": ..., "value": ...}` pairing the
/// key and value envelopes on one line. Lines that are not valid JSON are
/// passed through untouched; the router treats them as fatal.
pub struct JsonLinesSource {
    lines: Lines<BufReader<Box<dyn AsyncRead + Send + Unpin>>>,
}

impl std::fmt::Debug for JsonLinesSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesSource").finish_non_exhaustive()
    }
}

impl JsonLinesSource {
    /// Open the source described by configuration: a file path, or stdin
    /// when the path is absent or `-`
    pub async fn open(config: &SourceConfig) -> Result<Self> {
        match config.path.as_deref() {
            Some(path) if path != Path::new("-") => Self::from_path(path).await,
            _ => Ok(Self::stdin()),
        }
    }

    /// Read events from a file
    pub async fn from_path(path: &Path) -> Result<Self> {
        let file = tokio::fs::File::open(path).await.map_err(|e| {
            RouterError::config(format!("could not open source '{}': {}", path.display(), e))
        })?;
        debug!("Reading change events from '{}'", path.display());
        Ok(Self::from_reader(Box::new(file)))
    }

    /// Read events from stdin
    pub fn stdin() -> Self {
        debug!("Reading change events from stdin");
        Self::from_reader(Box::new(tokio::io::stdin()))
    }

    fn from_reader(reader: Box<dyn AsyncRead + Send + Unpin>) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
        }
    }

    /// Split a wrapper line into its key and value envelopes. Returns
    /// `None` when the line is not a wrapper.
    fn unwrap_line(line: &str) -> Option<SourceRecord> {
        let parsed: Value = serde_json::from_str(line).ok()?;
        let object = parsed.as_object()?;
        if !object.contains_key("value") {
            return None;
        }
        if !object.keys().all(|k| k == "key" || k == "value") {
            return None;
        }
        let key = match object.get("key") {
            Some(Value::Null) | None => None,
            Some(key) => Some(key.to_string()),
        };
        Some(SourceRecord {
            key,
            value: object["value"].to_string(),
        })
    }
}

#[async_trait]
impl ChangeSource for JsonLinesSource {
    async fn next_record(&mut self) -> Result<Option<SourceRecord>> {
        while let Some(line) = self.lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(record) = Self::unwrap_line(line) {
                return Ok(Some(record));
            }
            return Ok(Some(SourceRecord {
                key: None,
                value: line.to_string(),
            }));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    async fn collect(content: &str) -> Vec<SourceRecord> {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file.flush().unwrap();

        let mut source = JsonLinesSource::from_path(file.path()).await.unwrap();
        let mut records = Vec::new();
        while let Some(record) = source.next_record().await.unwrap() {
            records.push(record);
        }
        records
    }

    #[tokio::test]
    async fn test_bare_value_lines() {
        let records = collect("{\"payload\": {\"op\": \"c\"}}\n{\"payload\": {\"op\": \"u\"}}\n").await;
        assert_eq!(records.len(), 2);
        assert!(records[0].key.is_none());
        assert_eq!(records[0].value, "{\"payload\": {\"op\": \"c\"}}");
    }

    #[tokio::test]
    async fn test_blank_lines_skipped() {
        let records = collect("\n{\"payload\": {}}\n\n   \n{\"payload\": {}}\n").await;
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn test_wrapper_line_splits_key_and_value() {
        let records =
            collect("{\"key\": {\"schema\": {}}, \"value\": {\"payload\": {\"op\": \"d\"}}}\n")
                .await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key.as_deref(), Some("{\"schema\":{}}"));
        assert_eq!(records[0].value, "{\"payload\":{\"op\":\"d\"}}");
    }

    #[tokio::test]
    async fn test_wrapper_with_null_key() {
        let records = collect("{\"key\": null, \"value\": {\"payload\": {}}}\n").await;
        assert_eq!(records[0].key, None);
    }

    #[tokio::test]
    async fn test_tombstone_wrapper_keeps_null_value() {
        // Delete tombstones arrive as a key with a null value; the router
        // recognizes the literal "null" and skips it.
        let records = collect("{\"key\": {\"schema\": {}}, \"value\": null}\n").await;
        assert_eq!(records[0].value, "null");
        assert!(records[0].key.is_some());
    }

    #[tokio::test]
    async fn test_envelope_with_value_field_is_not_a_wrapper() {
        // A value envelope that happens to contain a "value" key alongside
        // other keys must pass through whole.
        let line = "{\"payload\": {}, \"value\": 1}";
        let records = collect(&format!("{}\n", line)).await;
        assert_eq!(records[0].value, line);
    }

    #[tokio::test]
    async fn test_non_json_line_passes_through() {
        let records = collect("not json\n").await;
        assert_eq!(records[0].value, "not json");
    }

    #[tokio::test]
    async fn test_missing_file_is_config_error() {
        let err = JsonLinesSource::from_path(Path::new("/nonexistent/events.ndjson"))
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::Config(_)));
    }
}
