// src/loader.rs

use chrono::{DateTime, Utc};
use std::{sync::Arc, time::Duration};
use tracing::{info, instrument, warn};

use crate::cache::TtlCache;
use crate::dataset::Dataset;
use crate::error::LoadError;
use crate::fetch::Retrieve;

/// Memo of loaded datasets keyed by the strategy's inputs.
pub type DatasetCache = TtlCache<String, Dataset>;

/// What a load produced. Every variant carries a dataset the lookup side can
/// index; only `Loaded` carries one that came from the source.
#[derive(Debug, Clone)]
pub enum LoadOutcome {
    /// The source answered. The dataset may legitimately have zero rows.
    Loaded {
        dataset: Arc<Dataset>,
        loaded_at: DateTime<Utc>,
    },
    /// The source is configured but retrieval failed; `dataset` is empty and
    /// schema-less.
    Failed {
        diagnostic: String,
        dataset: Arc<Dataset>,
    },
    /// There is no source to load from; `dataset` is empty and schema-less.
    NotConfigured { dataset: Arc<Dataset> },
}

impl LoadOutcome {
    pub fn dataset(&self) -> &Arc<Dataset> {
        match self {
            LoadOutcome::Loaded { dataset, .. }
            | LoadOutcome::Failed { dataset, .. }
            | LoadOutcome::NotConfigured { dataset } => dataset,
        }
    }

    /// User-facing text for anything other than a successful load.
    pub fn diagnostic(&self) -> Option<String> {
        match self {
            LoadOutcome::Loaded { .. } => None,
            LoadOutcome::Failed { diagnostic, .. } => {
                Some(format!("Error loading data: {}", diagnostic))
            }
            LoadOutcome::NotConfigured { .. } => Some("No data source is configured.".to_string()),
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, LoadOutcome::Loaded { .. })
    }
}

/// Runs exactly one retrieval strategy, optionally through a dataset memo.
pub struct Loader<S> {
    source: Option<S>,
    cache: Option<Arc<DatasetCache>>,
}

impl<S: Retrieve> Loader<S> {
    pub fn new(source: Option<S>, cache: Option<Arc<DatasetCache>>) -> Self {
        Self { source, cache }
    }

    /// A dataset memo whose window is `ttl`, or the source's own default
    /// (no expiry for files, one hour for the relational source).
    pub fn cache_for(source: &S, ttl: Option<Duration>) -> Arc<DatasetCache> {
        Arc::new(TtlCache::with_ttl("datasets", ttl.or(source.default_ttl())))
    }

    pub fn source(&self) -> Option<&S> {
        self.source.as_ref()
    }

    async fn fetch(&self, source: &S) -> Result<Arc<Dataset>, LoadError> {
        match &self.cache {
            Some(cache) => {
                cache
                    .get_or_try_insert_with(source.cache_key(), || source.retrieve())
                    .await
            }
            None => source.retrieve().await.map(Arc::new),
        }
    }

    /// Never fails: retrieval errors come back as [`LoadOutcome::Failed`].
    #[instrument(level = "info", skip(self))]
    pub async fn load(&self) -> LoadOutcome {
        let Some(source) = &self.source else {
            return LoadOutcome::NotConfigured {
                dataset: Arc::new(Dataset::empty()),
            };
        };

        match self.fetch(source).await {
            Ok(dataset) => {
                info!(
                    source = %source.cache_key(),
                    rows = dataset.num_rows(),
                    columns = dataset.columns().len(),
                    "dataset ready"
                );
                LoadOutcome::Loaded {
                    dataset,
                    loaded_at: Utc::now(),
                }
            }
            Err(e) => {
                warn!(source = %source.cache_key(), error = %e, "load failed");
                LoadOutcome::Failed {
                    diagnostic: e.to_string(),
                    dataset: Arc::new(Dataset::empty()),
                }
            }
        }
    }
}
