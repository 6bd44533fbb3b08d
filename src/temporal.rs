//! Temporal normalization of change-stream values.
//!
//! Connectors deliver temporal columns as raw integers: dates as days since
//! the Unix epoch, times as microseconds of day, timestamps as milliseconds
//! since the epoch (UTC). The router rewrites these to ISO-8601 strings
//! before any row is dispatched, so downstream engine scripts only ever see
//! text representations.

use crate::event::ColumnSchema;
use chrono::{DateTime, NaiveDate, NaiveTime};
use serde_json::{Map, Value};

/// Semantic type name marking an `int32` column as an epoch-day date
pub const SEMANTIC_DATE: &str = "io.debezium.time.Date";
/// Semantic type name marking an `int64` column as microseconds of day
pub const SEMANTIC_MICRO_TIME: &str = "io.debezium.time.MicroTime";
/// Semantic type name marking an `int64` column as epoch milliseconds
pub const SEMANTIC_TIMESTAMP: &str = "io.debezium.time.Timestamp";

/// Days from 0001-01-01 (CE) to 1970-01-01
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Temporal encoding of a column position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporalKind {
    /// Days since the Unix epoch (may be negative)
    EpochDay,
    /// Microseconds since midnight
    MicroOfDay,
    /// Milliseconds since the Unix epoch, UTC
    MilliEpoch,
}

/// Classify each column position by its declared temporal semantic, if any.
///
/// Runs once per event over the column schema; positions line up with the
/// row image's column order.
pub fn temporal_kinds(columns: &[ColumnSchema]) -> Vec<Option<TemporalKind>> {
    columns
        .iter()
        .map(|col| match (col.type_name.as_str(), col.semantic.as_deref()) {
            ("int32", Some(SEMANTIC_DATE)) => Some(TemporalKind::EpochDay),
            ("int64", Some(SEMANTIC_MICRO_TIME)) => Some(TemporalKind::MicroOfDay),
            ("int64", Some(SEMANTIC_TIMESTAMP)) => Some(TemporalKind::MilliEpoch),
            _ => None,
        })
        .collect()
}

/// Render an epoch-day count as an ISO date (`2021-06-08`)
pub fn epoch_day_to_date(days: i64) -> Option<String> {
    let days = i32::try_from(days).ok()?;
    NaiveDate::from_num_days_from_ce_opt(UNIX_EPOCH_DAYS_FROM_CE.checked_add(days)?)
        .map(|d| d.to_string())
}

/// Render microseconds of day as an ISO time (`10:00:00`)
pub fn micros_to_time(micros: i64) -> Option<String> {
    if micros < 0 {
        return None;
    }
    let secs = u32::try_from(micros / 1_000_000).ok()?;
    let nanos = u32::try_from((micros % 1_000_000) * 1_000).ok()?;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos).map(|t| t.to_string())
}

/// Render epoch milliseconds as a naive UTC date-time (`2021-02-01T00:00:00`)
pub fn millis_to_datetime(millis: i64) -> Option<String> {
    // Sub-second remainder is dropped: connector timestamps carry whole
    // seconds by the time they reach this encoding.
    let secs = millis.div_euclid(1_000);
    DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.naive_utc().format("%Y-%m-%dT%H:%M:%S").to_string())
}

/// Rewrite every non-null value at a temporally marked position with its
/// ISO-8601 rendering. Values that fail to decode are left untouched.
pub fn normalize_row(columns: &[ColumnSchema], row: &mut Map<String, Value>) {
    let kinds = temporal_kinds(columns);
    for (position, (_, value)) in row.iter_mut().enumerate() {
        let Some(Some(kind)) = kinds.get(position) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        let Some(raw) = value.as_i64() else {
            continue;
        };
        let rendered = match kind {
            TemporalKind::EpochDay => epoch_day_to_date(raw),
            TemporalKind::MicroOfDay => micros_to_time(raw),
            TemporalKind::MilliEpoch => millis_to_datetime(raw),
        };
        if let Some(text) = rendered {
            *value = Value::String(text);
        }
    }
}
