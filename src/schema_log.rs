//! Append-only log of detected schema-change (DDL) events.
//!
//! One timestamped line per event. Logging failures are never fatal: if a
//! line cannot be written the failure falls back to a console warning, and
//! if the log file cannot be opened at all the router keeps running with
//! schema changes reported to the log output only.

use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

const TIMESTAMP_FORMAT: &str = "%Y.%m.%d.%H.%M.%S";

/// Append-only schema-change event log
pub struct SchemaChangeLog {
    path: PathBuf,
    file: Option<File>,
}

impl SchemaChangeLog {
    /// Open (or create) the log in append mode. Open failure degrades to a
    /// warn-only log.
    pub fn open(path: &Path) -> Self {
        let file = match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(file),
            Err(e) => {
                warn!(
                    "Unable to open schema change event log '{}': {}",
                    path.display(),
                    e
                );
                None
            }
        };
        Self {
            path: path.to_path_buf(),
            file,
        }
    }

    /// Record one DDL event. Falls back to a generic line when source or
    /// DDL text could not be extracted, and to a console warning when the
    /// log itself is unwritable.
    pub fn record(&mut self, source: Option<(&str, &str)>, ddl: Option<&str>) {
        let timestamp = Local::now().format(TIMESTAMP_FORMAT);
        let line = match (source, ddl) {
            (Some((schema, table)), Some(ddl)) => {
                // DDL statements may span lines; keep the log one line per event.
                let flat = ddl.split_whitespace().collect::<Vec<_>>().join(" ");
                format!(
                    "{}: Database structure change event '{}' detected for table '{}.{}'.\n",
                    timestamp, flat, schema, table
                )
            }
            _ => format!("{}: Database structure change event detected.\n", timestamp),
        };

        let written = self
            .file
            .as_mut()
            .map(|f| f.write_all(line.as_bytes()))
            .unwrap_or_else(|| Err(std::io::Error::other("log not open")));
        if let Err(e) = written {
            warn!(
                "Unable to write to database change event log '{}': {}",
                self.path.display(),
                e
            );
        }
    }

    /// Flush and close the log; close failure is warn-only.
    pub fn close(&mut self) {
        if let Some(mut file) = self.file.take() {
            if let Err(e) = file.flush() {
                warn!(
                    "Could not close schema change event log file '{}': {}",
                    self.path.display(),
                    e
                );
            }
        }
    }
}

impl Drop for SchemaChangeLog {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_ddl_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.log");
        let mut log = SchemaChangeLog::open(&path);
        log.record(
            Some(("public", "orders")),
            Some("ALTER TABLE orders\nADD COLUMN note text"),
        );
        log.close();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("'ALTER TABLE orders ADD COLUMN note text'"));
        assert!(content.contains("'public.orders'"));
        // Newlines in the DDL are flattened
        assert_eq!(content.lines().count(), 1);
    }

    #[test]
    fn test_generic_fallback_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.log");
        let mut log = SchemaChangeLog::open(&path);
        log.record(None, None);
        log.close();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("Database structure change event detected."));
    }

    #[test]
    fn test_append_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.log");
        SchemaChangeLog::open(&path).record(None, None);
        SchemaChangeLog::open(&path).record(None, None);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn test_unwritable_log_is_not_fatal() {
        let mut log = SchemaChangeLog::open(Path::new("/nonexistent/dir/schema.log"));
        // Must not panic
        log.record(Some(("s", "t")), Some("DROP TABLE t"));
        log.close();
    }
}
