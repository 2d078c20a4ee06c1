use async_trait::async_trait;
use std::time::Duration;
use tracing::info;
use url::Url;

use super::{Format, Retrieve};
use crate::dataset::{self, Dataset};
use crate::error::LoadError;

/// Parse straight off the HTTP response reader, on the blocking pool.
///
/// CSV is decoded as it streams in. Parquet keeps its footer at the end of
/// the file, so the body has to be buffered before decoding starts.
pub struct DirectFile {
    url: Url,
    format: Option<Format>,
    timeout: Duration,
}

impl DirectFile {
    pub fn new(url: Url, format: Option<Format>, timeout: Duration) -> Self {
        Self {
            url,
            format,
            timeout,
        }
    }
}

fn read_remote(url: &Url, format: Format, timeout: Duration) -> Result<Dataset, LoadError> {
    // The blocking client must be created and dropped off the async runtime.
    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()?;
    let resp = client.get(url.as_str()).send()?.error_for_status()?;
    match format {
        Format::Csv => dataset::read_csv(resp),
        Format::Parquet => dataset::read_parquet(resp.bytes()?),
    }
}

#[async_trait]
impl Retrieve for DirectFile {
    fn cache_key(&self) -> String {
        format!("direct:{}:{:?}", self.url, self.format)
    }

    async fn retrieve(&self) -> Result<Dataset, LoadError> {
        let format = Format::resolve(self.format, &self.url)?;
        let url = self.url.clone();
        let timeout = self.timeout;
        let dataset =
            tokio::task::spawn_blocking(move || read_remote(&url, format, timeout)).await??;
        info!(url = %self.url, rows = dataset.num_rows(), %format, "read");
        Ok(dataset)
    }
}
