//! Typed row records produced by the normalizer and consumed by the sink.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime};
use serde_json::Value;

use crate::table::{ColumnKind, Table};

// ---

/// A single column value. Nulls stay typed so they bind with the right type.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(Option<String>),
    SmallInt(Option<i16>),
    Int(Option<i32>),
    BigInt(Option<i64>),
    Timestamp(Option<NaiveDateTime>),
}

impl Cell {
    pub fn null(kind: ColumnKind) -> Self {
        // ---
        match kind {
            ColumnKind::Text => Cell::Text(None),
            ColumnKind::SmallInt => Cell::SmallInt(None),
            ColumnKind::Int => Cell::Int(None),
            ColumnKind::BigInt => Cell::BigInt(None),
            ColumnKind::Timestamp => Cell::Timestamp(None),
        }
    }

    pub fn is_null(&self) -> bool {
        match self {
            Cell::Text(v) => v.is_none(),
            Cell::SmallInt(v) => v.is_none(),
            Cell::Int(v) => v.is_none(),
            Cell::BigInt(v) => v.is_none(),
            Cell::Timestamp(v) => v.is_none(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Cell::Text(Some(s)) => Some(s),
            _ => None,
        }
    }

    /// Convert a JSON value into a cell of the given kind.
    ///
    /// Values that cannot be represented become null rather than failing
    /// the row.
    pub fn from_json(kind: ColumnKind, value: &Value) -> Self {
        // ---
        match kind {
            ColumnKind::Text => Cell::Text(json_text(value)),
            ColumnKind::SmallInt => Cell::SmallInt(json_int(value).and_then(|n| n.try_into().ok())),
            ColumnKind::Int => Cell::Int(json_int(value).and_then(|n| n.try_into().ok())),
            ColumnKind::BigInt => Cell::BigInt(json_int(value)),
            ColumnKind::Timestamp => Cell::Timestamp(parse_timestamp(value)),
        }
    }
}

fn json_text(value: &Value) -> Option<String> {
    // ---
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        // Lists and objects are stored as their JSON text.
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}

fn json_int(value: &Value) -> Option<i64> {
    // ---
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

/// Parse an API timestamp into naive UTC.
///
/// Accepts epoch seconds, epoch milliseconds (anything above 1e11), RFC 3339
/// and naive ISO-8601 strings. `0`, `"0"` and `""` mean "unset".
pub fn parse_timestamp(value: &Value) -> Option<NaiveDateTime> {
    // ---
    match value {
        Value::Number(n) => n.as_f64().and_then(from_epoch),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            if let Ok(n) = s.parse::<f64>() {
                return from_epoch(n);
            }
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.naive_utc());
            }
            ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        }
        _ => None,
    }
}

fn from_epoch(n: f64) -> Option<NaiveDateTime> {
    // ---
    if !n.is_finite() || n <= 0.0 {
        return None;
    }
    let millis = if n > 1e11 { n } else { n * 1000.0 };
    DateTime::from_timestamp_millis(millis as i64).map(|dt| dt.naive_utc())
}

// ---

/// Rows grouped by target table. Iterates parents before children.
pub type RowBatch = BTreeMap<Table, Vec<Row>>;

/// One normalized record for a target table, cells in column order.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    table: Table,
    cells: Vec<Cell>,
}

impl Row {
    /// A row with every column null.
    pub fn new(table: Table) -> Self {
        let cells = table.columns().iter().map(|c| Cell::null(c.kind)).collect();
        Self { table, cells }
    }

    pub fn table(&self) -> Table {
        self.table
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn get(&self, column: &str) -> Option<&Cell> {
        self.table.column_index(column).map(|i| &self.cells[i])
    }

    /// Text value of a column, if present and non-null.
    pub fn text(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(Cell::as_text)
    }

    /// Replace a column's value. Returns `false` for unknown columns.
    pub fn set(&mut self, column: &str, cell: Cell) -> bool {
        match self.table.column_index(column) {
            Some(i) => {
                self.cells[i] = cell;
                true
            }
            None => false,
        }
    }

    pub(crate) fn set_at(&mut self, index: usize, cell: Cell) {
        self.cells[index] = cell;
    }
}
