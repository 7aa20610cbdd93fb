//! Record types accepted by the ingestion write path.
//!
//! Two kinds of records flow through the pipeline: [`TimeSeries`] rows, which describe the
//! identity (fingerprint and label set) of a series, and [`Sample`] rows, which carry the values
//! recorded for a series. Both implement [`Record`], which exposes the column list and the
//! per-row argument values needed to build and execute a parameterized insert.

pub mod labels;

use std::fmt::{Debug, Display};

use chrono::NaiveDate;

/// The kind of record, used to pick the destination table on a backend node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    TimeSeries,
    Sample,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TimeSeries => "time_series",
            Self::Sample => "sample",
        }
    }
}

impl Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single argument bound to a placeholder of a prepared insert statement
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Date(NaiveDate),
    UInt64(u64),
    Int64(i64),
    Float64(f64),
    String(String),
}

/// A row that can be written through a prepared insert statement.
///
/// The order of [`Record::COLUMNS`] and of the values returned from [`Record::values`] must
/// match, since the values are bound positionally.
pub trait Record: Debug + Send + Sync + 'static {
    const KIND: RecordKind;

    /// Column names, in placeholder order
    const COLUMNS: &'static [&'static str];

    /// Argument values for one execution of the insert statement
    fn values(&self) -> Vec<ColumnValue>;
}

/// Build the parameterized insert statement for `columns` into `table`
pub fn insert_statement(table: &str, columns: &[&str]) -> String {
    let placeholders = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT INTO {table} ({columns}) VALUES ({placeholders})",
        columns = columns.join(", ")
    )
}

/// Identity of a series: its fingerprint and the JSON encoded label set
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    pub date: NaiveDate,
    pub fingerprint: u64,
    /// JSON object of label name to label value
    pub labels: String,
    pub name: String,
}

impl Record for TimeSeries {
    const KIND: RecordKind = RecordKind::TimeSeries;
    const COLUMNS: &'static [&'static str] = &["date", "fingerprint", "labels", "name"];

    fn values(&self) -> Vec<ColumnValue> {
        vec![
            ColumnValue::Date(self.date),
            ColumnValue::UInt64(self.fingerprint),
            ColumnValue::String(self.labels.clone()),
            ColumnValue::String(self.name.clone()),
        ]
    }
}

/// A single observation for the series identified by `fingerprint`
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub fingerprint: u64,
    pub timestamp_ms: i64,
    pub value: f64,
    pub string: String,
}

impl Record for Sample {
    const KIND: RecordKind = RecordKind::Sample;
    const COLUMNS: &'static [&'static str] = &["fingerprint", "timestamp_ms", "value", "string"];

    fn values(&self) -> Vec<ColumnValue> {
        vec![
            ColumnValue::UInt64(self.fingerprint),
            ColumnValue::Int64(self.timestamp_ms),
            ColumnValue::Float64(self.value),
            ColumnValue::String(self.string.clone()),
        ]
    }
}
