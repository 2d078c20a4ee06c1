// src/lookup.rs

use std::{collections::HashMap, sync::Arc};
use tracing::{debug, warn};

use crate::dataset::{Dataset, Record, Value};
use crate::error::{KeyParseError, SchemaError};

pub const DEFAULT_KEY_COLUMN: &str = "CEDULA";

/// Parse user-supplied key text: surrounding whitespace is ignored, an
/// optional sign is accepted, anything else must be decimal digits.
pub fn parse_key(text: &str) -> Result<i64, KeyParseError> {
    let trimmed = text.trim();
    trimmed.parse::<i64>().map_err(|source| KeyParseError {
        input: trimmed.to_string(),
        source,
    })
}

/// The key a stored value is indexed under, if it has one.
fn index_key(value: &Value) -> Option<i64> {
    match value {
        Value::Int(v) => Some(*v),
        Value::Float(v) if v.is_finite() && v.fract() == 0.0 => {
            let k = *v as i64;
            (k as f64 == *v).then_some(k)
        }
        Value::Text(s) => parse_key(s).ok(),
        _ => None,
    }
}

/// Result of answering one user query.
#[derive(Debug, Clone, PartialEq)]
pub enum LookupOutcome {
    Found(Record),
    NotFound(i64),
    InvalidInput(KeyParseError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    /// Distinct keys in the index.
    pub keys: usize,
    /// Rows shadowed by an earlier row with the same key.
    pub duplicates: usize,
    /// Rows whose key value could not be indexed (null, fractional, text).
    pub skipped: usize,
}

/// A dataset plus a key→row index over one column. Read-only once built.
#[derive(Debug, Clone)]
pub struct IndexedDataset {
    dataset: Arc<Dataset>,
    key_column: String,
    key_pos: usize,
    index: HashMap<i64, usize>,
    stats: IndexStats,
}

impl IndexedDataset {
    /// Build the index in one pass over `dataset`.
    ///
    /// Fails if `key_column` is missing from a dataset that has columns. A
    /// schema-less dataset (what a failed load hands back) indexes to nothing,
    /// so every query against it is a plain miss. On duplicate keys the first
    /// row in load order wins.
    pub fn prepare(dataset: Arc<Dataset>, key_column: &str) -> Result<Self, SchemaError> {
        let key_pos = match dataset.column_index(key_column) {
            Some(pos) => pos,
            None if dataset.is_schemaless() => 0,
            None => {
                return Err(SchemaError::MissingKeyColumn {
                    column: key_column.to_string(),
                    available: dataset.column_names(),
                })
            }
        };

        let mut index = HashMap::with_capacity(dataset.num_rows());
        let mut stats = IndexStats::default();
        for (row_idx, row) in dataset.rows().iter().enumerate() {
            match index_key(&row[key_pos]) {
                Some(key) => {
                    if index.contains_key(&key) {
                        stats.duplicates += 1;
                    } else {
                        index.insert(key, row_idx);
                    }
                }
                None => stats.skipped += 1,
            }
        }
        stats.keys = index.len();

        if stats.duplicates > 0 {
            warn!(
                column = key_column,
                duplicates = stats.duplicates,
                "duplicate keys; the first row in load order wins"
            );
        }
        debug!(column = key_column, ?stats, "index built");

        Ok(Self {
            dataset,
            key_column: key_column.to_string(),
            key_pos,
            index,
            stats,
        })
    }

    pub fn find(&self, key: i64) -> Option<Record> {
        let row = *self.index.get(&key)?;
        Record::from_row(&self.dataset, row, self.key_pos)
    }

    pub fn contains(&self, key: i64) -> bool {
        self.index.contains_key(&key)
    }

    /// Parse `text` and look it up. Unparseable text never reaches the index.
    pub fn query(&self, text: &str) -> LookupOutcome {
        match parse_key(text) {
            Ok(key) => match self.find(key) {
                Some(record) => LookupOutcome::Found(record),
                None => LookupOutcome::NotFound(key),
            },
            Err(e) => LookupOutcome::InvalidInput(e),
        }
    }

    pub fn dataset(&self) -> &Arc<Dataset> {
        &self.dataset
    }

    pub fn key_column(&self) -> &str {
        &self.key_column
    }

    pub fn stats(&self) -> IndexStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}
