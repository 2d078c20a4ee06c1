// src/config.rs

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{debug, info};
use url::Url;

use crate::fetch::{
    http_client, ConnectionSettings, DirectFile, Format, PgConnector, RelationalSource,
    RemoteFile, Source, SourceKind, StagedFile, DEFAULT_HTTP_TIMEOUT,
};
use crate::loader::Loader;
use crate::lookup::DEFAULT_KEY_COLUMN;

/// Picked up from the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "cedula-lookup.yaml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub key_column: String,
    pub source: Option<SourceConfig>,
    pub cache: CacheConfig,
    pub connection: ConnectionSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            key_column: DEFAULT_KEY_COLUMN.to_string(),
            source: None,
            cache: CacheConfig::default(),
            connection: ConnectionSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SourceConfig {
    pub kind: SourceKind,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub format: Option<Format>,
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl SourceConfig {
    pub fn new(kind: SourceKind) -> Self {
        Self {
            kind,
            url: None,
            format: None,
            staging_dir: None,
            timeout_secs: None,
        }
    }

    fn timeout(&self) -> Duration {
        self.timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_HTTP_TIMEOUT)
    }

    fn parsed_url(&self) -> Result<Url> {
        let raw = match &self.url {
            Some(u) => u,
            None => bail!("source kind {:?} needs a `url`", self.kind),
        };
        Url::parse(raw).with_context(|| format!("parsing source url {}", raw))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: None,
        }
    }
}

impl Config {
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parsing config YAML")
    }

    /// Read `path`, or `cedula-lookup.yaml` if it exists, or fall back to
    /// defaults. Connection settings are then overlaid from the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);
        let path = match path {
            Some(p) => Some(p),
            None if default_path.is_file() => Some(default_path),
            None => None,
        };

        let mut config = match path {
            Some(p) => {
                let text = fs::read_to_string(p)
                    .with_context(|| format!("reading config {}", p.display()))?;
                info!(path = %p.display(), "loaded config");
                Self::from_yaml(&text)?
            }
            None => {
                debug!("no config file, using defaults");
                Self::default()
            }
        };
        config.connection.apply_env();
        Ok(config)
    }

    /// Instantiate the configured strategy, or `None` if there is none.
    pub fn build_source(&self) -> Result<Option<Source>> {
        let Some(sc) = &self.source else {
            return Ok(None);
        };

        let source = match sc.kind {
            SourceKind::Remote => {
                let client = http_client(sc.timeout())?;
                Source::Remote(RemoteFile::new(client, sc.parsed_url()?, sc.format))
            }
            SourceKind::Staged => {
                let client = http_client(sc.timeout())?;
                Source::Staged(StagedFile::new(
                    client,
                    sc.parsed_url()?,
                    sc.format,
                    sc.staging_dir.clone(),
                ))
            }
            SourceKind::Direct => {
                Source::Direct(DirectFile::new(sc.parsed_url()?, sc.format, sc.timeout()))
            }
            SourceKind::Postgres => Source::Relational(RelationalSource::new(
                PgConnector,
                self.connection.clone(),
                RelationalSource::<PgConnector>::connection_cache(),
            )),
        };
        Ok(Some(source))
    }

    /// A loader for the configured source, memoized unless caching is off.
    pub fn build_loader(&self) -> Result<Loader<Source>> {
        let source = self.build_source()?;
        let cache = match (&source, self.cache.enabled) {
            (Some(s), true) => Some(Loader::cache_for(
                s,
                self.cache.ttl_secs.map(Duration::from_secs),
            )),
            _ => None,
        };
        Ok(Loader::new(source, cache))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ONE_HOUR;
    use crate::fetch::Retrieve;

    #[test]
    fn test_full_document() {
        let yaml = r#"
key_column: ID
source:
  kind: staged
  url: https://raw.example.com/app_datos/gestiones_interg.parquet
  staging_dir: /tmp/cedula
  timeout_secs: 5
cache:
  enabled: false
connection:
  user: app
  port: 6543
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.key_column, "ID");
        let sc = config.source.clone().unwrap();
        assert_eq!(sc.kind, SourceKind::Staged);
        assert_eq!(sc.staging_dir, Some(PathBuf::from("/tmp/cedula")));
        assert_eq!(sc.timeout(), Duration::from_secs(5));
        assert!(!config.cache.enabled);
        assert_eq!(config.connection.port, Some(6543));
        assert_eq!(config.connection.table, None);
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.key_column, "CEDULA");
        assert!(config.cache.enabled);
        assert!(config.build_source().unwrap().is_none());
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        assert!(Config::from_yaml("source:\n  kind: ftp\n").is_err());
    }

    #[tokio::test]
    async fn test_file_source_needs_url() {
        let config = Config {
            source: Some(SourceConfig::new(SourceKind::Remote)),
            ..Default::default()
        };
        let err = config.build_source().err().unwrap();
        assert!(err.to_string().contains("needs a `url`"));
    }

    #[tokio::test]
    async fn test_postgres_source_uses_hour_long_memo() {
        let config = Config {
            source: Some(SourceConfig::new(SourceKind::Postgres)),
            ..Default::default()
        };
        let source = config.build_source().unwrap().unwrap();
        assert_eq!(source.kind(), SourceKind::Postgres);
        assert_eq!(source.default_ttl(), Some(ONE_HOUR));
    }

    #[tokio::test]
    async fn test_remote_source_key_reflects_inputs() {
        let mut sc = SourceConfig::new(SourceKind::Remote);
        sc.url = Some("https://host/data.csv".into());
        let config = Config {
            source: Some(sc),
            ..Default::default()
        };
        let source = config.build_source().unwrap().unwrap();
        assert_eq!(source.kind(), SourceKind::Remote);
        assert!(source.cache_key().contains("https://host/data.csv"));
        assert_eq!(source.default_ttl(), None);
    }
}
