//! Typed result tables.

use std::fmt;

use mysql_async::Value as SqlValue;
use serde::{Serialize, Serializer};
use serde_json::{json, Map, Value};

use crate::error::ExportError;

/// How a column's raw bytes are to be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Character data, decoded as UTF-8.
    Text,
    /// `BINARY`/`BLOB`-family data, kept as bytes.
    Binary,
    /// `DATE`, rendered without a time of day.
    Date,
}

/// One result cell. SQL `NULL` is [`Cell::Null`], distinct from any text.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    /// `YYYY-MM-DD`, or `YYYY-MM-DD HH:MM:SS[.ffffff]`.
    DateTime(String),
    /// `[-]HH:MM:SS[.ffffff]`; hours may exceed 24.
    Time(String),
}

impl Cell {
    /// JSON form: numbers stay numbers, bytes become lowercase hex.
    pub fn to_json(&self) -> Value {
        match self {
            Cell::Null => Value::Null,
            Cell::Int(n) => json!(n),
            Cell::UInt(n) => json!(n),
            Cell::Float(f) => json!(f),
            Cell::Text(s) | Cell::DateTime(s) | Cell::Time(s) => Value::String(s.clone()),
            Cell::Bytes(bytes) => Value::String(hex::encode(bytes)),
        }
    }
}

impl Serialize for Cell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => f.write_str("NULL"),
            Cell::Int(n) => write!(f, "{n}"),
            Cell::UInt(n) => write!(f, "{n}"),
            Cell::Float(x) => write!(f, "{x}"),
            Cell::Text(s) | Cell::DateTime(s) | Cell::Time(s) => f.write_str(s),
            Cell::Bytes(bytes) => write!(f, "0x{}", hex::encode(bytes)),
        }
    }
}

/// Convert one protocol value of `column`.
///
/// Invalid UTF-8 in a text column is an error rather than a lossy decode.
pub fn cell_from(value: SqlValue, kind: ColumnKind, column: &str) -> Result<Cell, ExportError> {
    let cell = match value {
        SqlValue::NULL => Cell::Null,
        SqlValue::Int(n) => Cell::Int(n),
        SqlValue::UInt(n) => Cell::UInt(n),
        // through the shortest text form, so 0.1f32 stays 0.1
        SqlValue::Float(x) => Cell::Float(x.to_string().parse().unwrap_or(f64::from(x))),
        SqlValue::Double(x) => Cell::Float(x),
        SqlValue::Bytes(bytes) if kind == ColumnKind::Binary => Cell::Bytes(bytes),
        SqlValue::Bytes(bytes) => {
            let text = String::from_utf8(bytes).map_err(|e| ExportError::Decode {
                column: column.to_string(),
                message: e.to_string(),
            })?;
            Cell::Text(text)
        }
        SqlValue::Date(year, month, day, hour, minute, second, micros) => {
            let date = format!("{year:04}-{month:02}-{day:02}");
            if kind == ColumnKind::Date {
                Cell::DateTime(date)
            } else {
                Cell::DateTime(format!(
                    "{date} {}",
                    clock(u32::from(hour), minute, second, micros)
                ))
            }
        }
        SqlValue::Time(negative, days, hours, minutes, seconds, micros) => {
            let sign = if negative { "-" } else { "" };
            let hours = days * 24 + u32::from(hours);
            Cell::Time(format!("{sign}{}", clock(hours, minutes, seconds, micros)))
        }
    };
    Ok(cell)
}

fn clock(hours: u32, minutes: u8, seconds: u8, micros: u32) -> String {
    if micros == 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{hours:02}:{minutes:02}:{seconds:02}.{micros:06}")
    }
}

/// A query result: column names plus rows of typed cells.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// One JSON object per row, keys in column order.
    pub fn records(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row)
                    .map(|(column, cell)| (column.clone(), cell.to_json()))
                    .collect()
            })
            .collect()
    }
}
