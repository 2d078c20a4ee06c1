// src/dataset/csv.rs

use csv::ReaderBuilder;
use std::io::Read;
use tracing::debug;

use super::{Column, ColumnKind, Dataset, Value};
use crate::error::LoadError;

/// Parse a headed CSV stream into a [`Dataset`].
///
/// Column kinds are inferred after the whole stream is read: a column is
/// Integer if every non-empty cell parses as `i64`, Float if every non-empty
/// cell parses as `f64`, Text otherwise. Empty cells become `Null`.
pub fn read_csv<R: Read>(reader: R) -> Result<Dataset, LoadError> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
    if headers.is_empty() {
        return Err(LoadError::Shape("no header row".into()));
    }
    let mut raw: Vec<csv::StringRecord> = Vec::new();
    for record in rdr.records() {
        raw.push(record?);
    }
    debug!(columns = headers.len(), rows = raw.len(), "parsed csv");

    let kinds: Vec<ColumnKind> = (0..headers.len())
        .map(|i| infer_kind(raw.iter().filter_map(|r| r.get(i))))
        .collect();

    let rows = raw
        .iter()
        .map(|record| {
            kinds
                .iter()
                .enumerate()
                .map(|(i, kind)| convert(record.get(i).unwrap_or(""), *kind))
                .collect()
        })
        .collect();

    let columns = headers
        .into_iter()
        .zip(kinds)
        .map(|(name, kind)| Column::new(name, kind))
        .collect();

    Dataset::new(columns, rows)
}

fn infer_kind<'a>(cells: impl Iterator<Item = &'a str>) -> ColumnKind {
    let mut kind = ColumnKind::Integer;
    for cell in cells.filter(|c| !c.is_empty()) {
        match kind {
            ColumnKind::Integer if cell.parse::<i64>().is_ok() => {}
            ColumnKind::Integer | ColumnKind::Float if cell.parse::<f64>().is_ok() => {
                kind = ColumnKind::Float
            }
            _ => return ColumnKind::Text,
        }
    }
    kind
}

fn convert(cell: &str, kind: ColumnKind) -> Value {
    if cell.is_empty() {
        return Value::Null;
    }
    match kind {
        ColumnKind::Integer => cell.parse().map(Value::Int).unwrap_or(Value::Null),
        ColumnKind::Float => cell.parse().map(Value::Float).unwrap_or(Value::Null),
        ColumnKind::Text => Value::Text(cell.to_string()),
    }
}
