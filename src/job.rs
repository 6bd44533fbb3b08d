//! In-memory model of a transformation job and its fields.
//!
//! A [`Job`] owns one long-lived engine subprocess plus the script and field
//! metadata for one `(operation, source table, column list)` shape. Fields
//! are mutable only during creation (type inference) and classification;
//! after the script is compiled they are never touched again.

use crate::config::TargetSpec;
use crate::event::Op;
use crate::rules::RuleKind;
use crate::supervisor::EngineProcess;
use std::path::Path;
use tempfile::NamedTempFile;

/// Sentinel for "precision not set"
pub const PRECISION_UNSET: i32 = -1;

/// One field of a transformation job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Column name
    pub name: String,
    /// Engine datatype; the engine infers width from data for ASCII
    pub data_type: String,
    /// Precision clause value, [`PRECISION_UNSET`] when absent
    pub precision: i32,
    /// Whether a classification entry matched this field
    pub classified: bool,
    /// Unsubstituted rule template copied on classification
    pub expression: Option<String>,
    /// Kind of the matched rule
    pub rule_kind: Option<RuleKind>,
}

impl Field {
    /// New pass-through field with engine defaults
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: "ASCII".to_string(),
            precision: PRECISION_UNSET,
            classified: false,
            expression: None,
            rule_kind: None,
        }
    }
}

/// Composite identity of a job: one job exists per distinct signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobSignature {
    /// Operation the job handles
    pub operation: Op,
    /// Qualified `schema.table` source identifier
    pub source_table: String,
    /// Ordered column names of the row shape
    pub columns: Vec<String>,
}

/// A transformation job: field metadata, resolved targets, script file, and
/// the engine subprocess streaming rows for this shape.
pub struct Job {
    /// Registry key, a monotonically increasing integer stored as a string
    pub key: String,
    /// Signature this job serves
    pub signature: JobSignature,
    /// Qualified source identifier (mirrors the signature, used in logs)
    pub source_table_identifier: String,
    /// `[schema.]table[postfix]` for database targets
    pub target_table_identifier: Option<String>,
    /// Resolved file-target path
    pub target_path: Option<String>,
    /// File-target process type, RECORD substituted at render time
    pub target_process_type: Option<String>,
    /// Operation the job handles
    pub operation: Op,
    /// Database connection reference
    pub dsn: Option<String>,
    /// Target-side column separator
    pub separator: String,
    /// Primary-key column used for UPDATE/DELETE key clauses
    pub key_column: Option<String>,
    /// Ordered fields of the row shape
    pub fields: Vec<Field>,
    /// Generated script; removing the job removes the file
    pub script_file: Option<NamedTempFile>,
    /// Live engine subprocess, set on spawn
    pub engine: Option<EngineProcess>,
}

impl Job {
    /// Construct a job for a signature against the configured targets.
    ///
    /// Resolves the target table identifier (`[schema.]table[postfix]`) and,
    /// for file targets, splits the configured path into parent and file
    /// name to derive `parent/<schema>_<table>-<postfix>-<file>`.
    pub fn new(
        key: String,
        signature: JobSignature,
        source_schema: &str,
        source_table: &str,
        target: &TargetSpec,
        key_column: Option<String>,
    ) -> Self {
        let fields = signature.columns.iter().map(Field::new).collect();

        let target_table_identifier = target.dsn.as_ref().map(|_| {
            let base = format!("{}{}", source_table, target.postfix);
            match target.schema.as_deref() {
                Some(schema) if !schema.is_empty() => format!("{}.{}", schema, base),
                _ => base,
            }
        });

        let target_path = target
            .path
            .as_deref()
            .map(|p| file_target_path(p, source_schema, source_table, &target.postfix));

        Self {
            key,
            source_table_identifier: signature.source_table.clone(),
            operation: signature.operation,
            signature,
            target_table_identifier,
            target_path,
            target_process_type: target.process_type.clone(),
            dsn: target.dsn.clone(),
            separator: target.separator.clone(),
            key_column,
            fields,
            script_file: None,
            engine: None,
        }
    }

    /// Key column for UPDATE/DELETE clauses: the CDC-supplied primary key if
    /// known, else the first field's name.
    pub fn effective_key_column(&self) -> Option<&str> {
        self.key_column
            .as_deref()
            .or_else(|| self.fields.first().map(|f| f.name.as_str()))
    }
}

/// Derive the per-table file target path from the configured base path:
/// the parent directory keeps its place, the file name is prefixed with
/// `<schema>_<table>-<postfix>-`.
fn file_target_path(base: &Path, schema: &str, table: &str, postfix: &str) -> String {
    let parent = base
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| ".".to_string());
    let file = base
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{}/{}_{}-{}-{}", parent, schema, table, postfix, file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn signature(op: Op, table: &str, columns: &[&str]) -> JobSignature {
        JobSignature {
            operation: op,
            source_table: table.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[test]
    fn test_field_defaults() {
        let field = Field::new("email");
        assert_eq!(field.data_type, "ASCII");
        assert_eq!(field.precision, PRECISION_UNSET);
        assert!(!field.classified);
        assert!(field.expression.is_none());
    }

    #[test]
    fn test_database_target_naming() {
        let target = TargetSpec {
            schema: Some("staging".to_string()),
            postfix: "_masked".to_string(),
            dsn: Some("warehouse".to_string()),
            separator: "\t".to_string(),
            ..Default::default()
        };
        let job = Job::new(
            "0".to_string(),
            signature(Op::Insert, "public.orders", &["id"]),
            "public",
            "orders",
            &target,
            None,
        );
        assert_eq!(
            job.target_table_identifier.as_deref(),
            Some("staging.orders_masked")
        );
        assert!(job.target_path.is_none());
    }

    #[test]
    fn test_database_target_without_schema() {
        let target = TargetSpec {
            dsn: Some("warehouse".to_string()),
            separator: "\t".to_string(),
            ..Default::default()
        };
        let job = Job::new(
            "0".to_string(),
            signature(Op::Insert, "public.orders", &["id"]),
            "public",
            "orders",
            &target,
            None,
        );
        assert_eq!(job.target_table_identifier.as_deref(), Some("orders"));
    }

    #[test]
    fn test_file_target_naming() {
        let target = TargetSpec {
            path: Some(PathBuf::from("/data/out.txt")),
            postfix: "x".to_string(),
            separator: "\t".to_string(),
            ..Default::default()
        };
        let job = Job::new(
            "0".to_string(),
            signature(Op::Insert, "public.orders", &["id"]),
            "public",
            "orders",
            &target,
            None,
        );
        assert_eq!(job.target_path.as_deref(), Some("/data/public_orders-x-out.txt"));
        assert!(job.target_table_identifier.is_none());
    }

    #[test]
    fn test_file_target_bare_name() {
        let target = TargetSpec {
            path: Some(PathBuf::from("out.txt")),
            separator: "\t".to_string(),
            ..Default::default()
        };
        let job = Job::new(
            "0".to_string(),
            signature(Op::Insert, "s.t", &["id"]),
            "s",
            "t",
            &target,
            None,
        );
        assert_eq!(job.target_path.as_deref(), Some("./s_t--out.txt"));
    }

    #[test]
    fn test_effective_key_column() {
        let target = TargetSpec::default();
        let job = Job::new(
            "0".to_string(),
            signature(Op::Delete, "s.t", &["id", "email"]),
            "s",
            "t",
            &target,
            Some("order_id".to_string()),
        );
        assert_eq!(job.effective_key_column(), Some("order_id"));

        let job = Job::new(
            "1".to_string(),
            signature(Op::Delete, "s.t", &["id", "email"]),
            "s",
            "t",
            &target,
            None,
        );
        assert_eq!(job.effective_key_column(), Some("id"));
    }

    #[test]
    fn test_signature_equality() {
        let a = signature(Op::Insert, "s.t", &["id", "email"]);
        let b = signature(Op::Insert, "s.t", &["id", "email"]);
        let c = signature(Op::Update, "s.t", &["id", "email"]);
        let d = signature(Op::Insert, "s.t", &["email", "id"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d); // column order is part of the shape
    }
}
