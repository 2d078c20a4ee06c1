use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use std::path::PathBuf;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

use super::{Format, Retrieve};
use crate::dataset::{self, Dataset};
use crate::error::LoadError;

/// Download to a temporary file, then parse from disk. The file is removed
/// once parsing finishes, successful or not.
pub struct StagedFile {
    client: Client,
    url: Url,
    format: Option<Format>,
    staging_dir: Option<PathBuf>,
}

impl StagedFile {
    pub fn new(
        client: Client,
        url: Url,
        format: Option<Format>,
        staging_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            client,
            url,
            format,
            staging_dir,
        }
    }

    fn temp_file(&self, format: Format) -> std::io::Result<NamedTempFile> {
        let suffix = format!(".{}", format.as_str());
        let mut builder = tempfile::Builder::new();
        builder.prefix("cedula-").suffix(&suffix);
        match &self.staging_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                builder.tempfile_in(dir)
            }
            None => builder.tempfile(),
        }
    }

    /// Stream the response body into `tmp`, returning the number of bytes written.
    async fn download(&self, tmp: &NamedTempFile) -> Result<u64, LoadError> {
        let resp = self
            .client
            .get(self.url.as_str())
            .send()
            .await?
            .error_for_status()?;

        let mut file = tokio::fs::File::from_std(tmp.reopen()?);
        let mut stream = resp.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }
}

#[async_trait]
impl Retrieve for StagedFile {
    fn cache_key(&self) -> String {
        format!("staged:{}:{:?}", self.url, self.format)
    }

    async fn retrieve(&self) -> Result<Dataset, LoadError> {
        let format = Format::resolve(self.format, &self.url)?;
        let tmp = self.temp_file(format)?;
        debug!(path = %tmp.path().display(), "staging download");

        let written = self.download(&tmp).await?;
        info!(url = %self.url, bytes = written, path = %tmp.path().display(), "downloaded");

        let dataset = tokio::task::spawn_blocking(move || -> Result<Dataset, LoadError> {
            let file = tmp.reopen()?;
            let parsed = match format {
                Format::Parquet => dataset::read_parquet(file),
                Format::Csv => dataset::read_csv(std::io::BufReader::new(file)),
            };
            drop(tmp);
            parsed
        })
        .await??;
        Ok(dataset)
    }
}
