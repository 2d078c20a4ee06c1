// src/fetch/mod.rs

pub mod direct;
pub mod relational;
pub mod remote;
pub mod staged;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::{fmt, path::Path, time::Duration};
use url::Url;

use crate::dataset::{self, Dataset};
use crate::error::LoadError;

pub use direct::DirectFile;
pub use relational::{ConnectionSettings, Connector, PgConnector, RelationalSource};
pub use remote::RemoteFile;
pub use staged::StagedFile;

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// A single way of obtaining the whole dataset.
#[async_trait]
pub trait Retrieve: Send + Sync {
    /// Identifies the strategy's inputs; two sources with the same key are
    /// interchangeable for memoization.
    fn cache_key(&self) -> String;

    /// How long a retrieved dataset stays valid when nothing overrides it.
    fn default_ttl(&self) -> Option<Duration> {
        None
    }

    async fn retrieve(&self) -> Result<Dataset, LoadError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Fetch over HTTP and parse the body in memory.
    Remote,
    /// Download to a temporary file, then parse from disk.
    Staged,
    /// Parse straight off the HTTP response reader.
    Direct,
    /// Query a Postgres table.
    Postgres,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Parquet,
    Csv,
}

impl Format {
    /// Guess the format from the extension of the URL's path.
    pub fn from_url(url: &Url) -> Result<Self, LoadError> {
        let ext = Path::new(url.path())
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("parquet") | Some("pq") => Ok(Format::Parquet),
            Some("csv") => Ok(Format::Csv),
            _ => Err(LoadError::UnsupportedFormat(url.to_string())),
        }
    }

    pub fn resolve(explicit: Option<Format>, url: &Url) -> Result<Self, LoadError> {
        match explicit {
            Some(f) => Ok(f),
            None => Self::from_url(url),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Parquet => "parquet",
            Format::Csv => "csv",
        }
    }

    /// Decode a fully buffered body.
    pub fn decode<B>(self, body: B) -> Result<Dataset, LoadError>
    where
        B: parquet::file::reader::ChunkReader + AsRef<[u8]> + 'static,
    {
        match self {
            Format::Parquet => dataset::read_parquet(body),
            Format::Csv => dataset::read_csv(body.as_ref()),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the shared async HTTP client.
pub fn http_client(timeout: Duration) -> Result<Client, LoadError> {
    Ok(Client::builder().timeout(timeout).build()?)
}

/// The configured retrieval strategy.
pub enum Source {
    Remote(RemoteFile),
    Staged(StagedFile),
    Direct(DirectFile),
    Relational(RelationalSource<PgConnector>),
}

impl Source {
    pub fn kind(&self) -> SourceKind {
        match self {
            Source::Remote(_) => SourceKind::Remote,
            Source::Staged(_) => SourceKind::Staged,
            Source::Direct(_) => SourceKind::Direct,
            Source::Relational(_) => SourceKind::Postgres,
        }
    }

    fn inner(&self) -> &dyn Retrieve {
        match self {
            Source::Remote(s) => s,
            Source::Staged(s) => s,
            Source::Direct(s) => s,
            Source::Relational(s) => s,
        }
    }
}

#[async_trait]
impl Retrieve for Source {
    fn cache_key(&self) -> String {
        self.inner().cache_key()
    }

    fn default_ttl(&self) -> Option<Duration> {
        self.inner().default_ttl()
    }

    async fn retrieve(&self) -> Result<Dataset, LoadError> {
        self.inner().retrieve().await
    }
}
