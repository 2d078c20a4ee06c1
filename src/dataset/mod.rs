// src/dataset/mod.rs

pub mod arrow;
pub mod csv;

use serde::ser::{Serialize, SerializeMap, Serializer};
use std::fmt;

use crate::error::LoadError;

pub use self::arrow::{read_parquet, record_batches_to_dataset};
pub use self::csv::read_csv;

/// One scalar cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// Numbers are shown without decimal places: floats are truncated toward
/// zero, non-finite floats and nulls render empty.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) if v.is_finite() => write!(f, "{:.0}", v.trunc() + 0.0),
            Value::Float(_) => Ok(()),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Int(v) => serializer.serialize_i64(*v),
            Value::Float(v) if v.is_finite() => serializer.serialize_f64(*v),
            Value::Float(_) => serializer.serialize_none(),
            Value::Text(s) => serializer.serialize_str(s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Float,
    Text,
}

impl ColumnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnKind::Integer => "integer",
            ColumnKind::Float => "float",
            ColumnKind::Text => "text",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// An in-memory table, loaded wholesale and never mutated afterwards.
///
/// A dataset with no columns is *schema-less*; that is what failed or
/// unconfigured loads hand back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    columns: Vec<Column>,
    rows: Vec<Vec<Value>>,
}

impl Dataset {
    /// Build a dataset, checking that every row has one value per column.
    pub fn new(columns: Vec<Column>, rows: Vec<Vec<Value>>) -> Result<Self, LoadError> {
        if let Some((idx, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, r)| r.len() != columns.len())
        {
            return Err(LoadError::Shape(format!(
                "row {} has {} values, expected {}",
                idx,
                row.len(),
                columns.len()
            )));
        }
        Ok(Self { columns, rows })
    }

    /// The empty, schema-less dataset.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn row(&self, idx: usize) -> Option<&[Value]> {
        self.rows.get(idx).map(Vec::as_slice)
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn is_schemaless(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// A single row lifted out of a dataset, key column first.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    /// Copy row `row` of `dataset`, moving column `key_pos` to the front.
    pub fn from_row(dataset: &Dataset, row: usize, key_pos: usize) -> Option<Self> {
        let values = dataset.row(row)?;
        let columns = dataset.columns();
        let mut fields = Vec::with_capacity(columns.len());
        fields.push((columns[key_pos].name.clone(), values[key_pos].clone()));
        for (i, (col, val)) in columns.iter().zip(values).enumerate() {
            if i != key_pos {
                fields.push((col.name.clone(), val.clone()));
            }
        }
        Some(Self { fields })
    }

    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// Serializes as a JSON object whose keys follow field order.
impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}
