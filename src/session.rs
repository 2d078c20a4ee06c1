// src/session.rs

use std::sync::Arc;
use tracing::info;

use crate::error::SchemaError;
use crate::fetch::Retrieve;
use crate::loader::{LoadOutcome, Loader};
use crate::lookup::{IndexedDataset, LookupOutcome};

/// What one interaction produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    /// Load diagnostic to show alongside the result, if the load did not
    /// succeed.
    pub notice: Option<String>,
    /// `None` when the input was blank and nothing was looked up.
    pub outcome: Option<LookupOutcome>,
}

/// Drives load → prepare → query for each interaction.
///
/// The loader is consulted every time (its memo makes that cheap); the index
/// is rebuilt only when the loader hands back a different dataset.
pub struct Session<S> {
    loader: Loader<S>,
    key_column: String,
    indexed: Option<IndexedDataset>,
}

impl<S: Retrieve> Session<S> {
    pub fn new(loader: Loader<S>, key_column: impl Into<String>) -> Self {
        Self {
            loader,
            key_column: key_column.into(),
            indexed: None,
        }
    }

    pub fn key_column(&self) -> &str {
        &self.key_column
    }

    pub fn indexed(&self) -> Option<&IndexedDataset> {
        self.indexed.as_ref()
    }

    /// Load (possibly from memo) and make sure the index matches the result.
    ///
    /// Only failed or unconfigured loads may hand back a schema-less dataset;
    /// a successful load without columns cannot carry the key column.
    pub async fn refresh(&mut self) -> Result<(LoadOutcome, &IndexedDataset), SchemaError> {
        let outcome = self.loader.load().await;
        if outcome.is_loaded() && outcome.dataset().is_schemaless() {
            self.indexed = None;
            return Err(SchemaError::MissingKeyColumn {
                column: self.key_column.clone(),
                available: Vec::new(),
            });
        }
        let idx = match self.indexed.take() {
            Some(idx) if Arc::ptr_eq(idx.dataset(), outcome.dataset()) => idx,
            _ => {
                let idx =
                    IndexedDataset::prepare(Arc::clone(outcome.dataset()), &self.key_column)?;
                info!(column = %self.key_column, keys = idx.len(), "index ready");
                idx
            }
        };
        let idx: &IndexedDataset = self.indexed.insert(idx);
        Ok((outcome, idx))
    }

    /// Answer one user input. Only a schema failure is an error.
    pub async fn ask(&mut self, input: &str) -> Result<Answer, SchemaError> {
        let (outcome, idx) = self.refresh().await?;
        let lookup = (!input.trim().is_empty()).then(|| idx.query(input));
        Ok(Answer {
            notice: outcome.diagnostic(),
            outcome: lookup,
        })
    }
}
