//! Script compiler: renders a [`Job`] into the external engine's DSL.
//!
//! The generated text has three parts: an input declaration reading
//! tab-separated records from stdin, a stream boundary, and one target
//! block per configured target. Output field clauses are classification
//! aware - a classified field is renamed with the masking prefix and
//! back-referenced to its unmasked source name, while pass-through fields
//! keep their shape. Rendering is deterministic: identical job state
//! produces byte-identical text.

use crate::job::{Field, Job, PRECISION_UNSET};
use crate::rules::{RuleKind, FIELD_NAME_TOKEN};
use crate::event::Op;
use std::fmt::Write;

/// Rename prefix applied to masked output fields
pub const MASK_PREFIX: &str = "ALTERED_";

/// Fixed processing mode of the stdin input block
const INPUT_PROCESS_MODE: &str = "CONCH";

/// Render the full script for a job.
pub fn render(job: &Job) -> String {
    let mut out = String::new();

    // Input block: always the plain, unmasked read shape.
    out.push_str("/INFILE=stdin\n");
    out.push_str(&format!("/PROCESS={}\n", INPUT_PROCESS_MODE));
    for (position, field) in job.fields.iter().enumerate() {
        let _ = writeln!(
            out,
            "/FIELD=({}, TYPE=ASCII, POSITION={}, SEPARATOR=\"\\t\")",
            field.name,
            position + 1
        );
    }
    out.push_str("/STREAM\n");

    // File target block; file output is insert-only.
    if let Some(target_path) = &job.target_path {
        if job.operation == Op::Insert {
            let _ = writeln!(out, "/OUTFILE={}", target_path);
            let _ = writeln!(
                out,
                "/PROCESS={}",
                job.target_process_type.as_deref().unwrap_or("RECORD")
            );
            out.push_str("/APPEND\n");
            render_output_fields(&mut out, job);
        }
    }

    // Database target block.
    if let Some(dsn) = &job.dsn {
        let _ = writeln!(
            out,
            "/OUTFILE=\"{};DSN={};\"",
            job.target_table_identifier.as_deref().unwrap_or_default(),
            dsn
        );
        out.push_str("/PROCESS=ODBC\n");
        match job.operation {
            Op::Update => {
                let _ = writeln!(
                    out,
                    "/UPDATE=({})",
                    job.effective_key_column().unwrap_or_default()
                );
            }
            Op::Delete => {
                let _ = writeln!(
                    out,
                    "/DELETE=({})",
                    job.effective_key_column().unwrap_or_default()
                );
            }
            _ => out.push_str("/APPEND\n"),
        }
        render_output_fields(&mut out, job);
    }

    // Diagnostic dry-run: no target configured at all.
    if job.dsn.is_none() && job.target_path.is_none() {
        out.push_str("/OUTFILE=stdout\n");
    }

    out
}

fn render_output_fields(out: &mut String, job: &Job) {
    let separator = escape_tab(&job.separator);
    for (position, field) in job.fields.iter().enumerate() {
        render_output_field(out, field, position + 1, &separator);
    }
}

/// One classification-aware output field clause.
fn render_output_field(out: &mut String, field: &Field, position: usize, separator: &str) {
    if field.classified {
        let template = field.expression.as_deref().unwrap_or_default();
        if field.rule_kind == Some(RuleKind::Set) {
            let _ = write!(
                out,
                "/FIELD=({prefix}{name}, TYPE={dt}, POSITION={pos}, ODEF=\"{name}\", SEPARATOR=\"{sep}\", SET={set}",
                prefix = MASK_PREFIX,
                name = field.name,
                dt = field.data_type,
                pos = position,
                sep = separator,
                set = template,
            );
        } else {
            let _ = write!(
                out,
                "/FIELD=({prefix}{name}={expr}, TYPE={dt}, POSITION={pos}, ODEF=\"{name}\", SEPARATOR=\"{sep}\"",
                prefix = MASK_PREFIX,
                name = field.name,
                expr = template.replace(FIELD_NAME_TOKEN, &field.name),
                dt = field.data_type,
                pos = position,
                sep = separator,
            );
        }
    } else {
        let _ = write!(
            out,
            "/FIELD=({name}, TYPE={dt}, POSITION={pos}, SEPARATOR=\"{sep}\"",
            name = field.name,
            dt = field.data_type,
            pos = position,
            sep = separator,
        );
    }
    if field.precision != PRECISION_UNSET {
        let _ = write!(out, ", PRECISION={}", field.precision);
    }
    out.push_str(")\n");
}

/// Escape literal tab separators for the emitted script text
fn escape_tab(separator: &str) -> String {
    separator.replace('\t', "\\t")
}
