use async_trait::async_trait;
use reqwest::Client;
use tracing::info;
use url::Url;

use super::{Format, Retrieve};
use crate::dataset::Dataset;
use crate::error::LoadError;

/// Fetch the whole file into memory and parse it there.
pub struct RemoteFile {
    client: Client,
    url: Url,
    format: Option<Format>,
}

impl RemoteFile {
    pub fn new(client: Client, url: Url, format: Option<Format>) -> Self {
        Self {
            client,
            url,
            format,
        }
    }
}

#[async_trait]
impl Retrieve for RemoteFile {
    fn cache_key(&self) -> String {
        format!("remote:{}:{:?}", self.url, self.format)
    }

    async fn retrieve(&self) -> Result<Dataset, LoadError> {
        let format = Format::resolve(self.format, &self.url)?;
        let resp = self
            .client
            .get(self.url.as_str())
            .send()
            .await?
            .error_for_status()?;
        let body = resp.bytes().await?;
        info!(url = %self.url, bytes = body.len(), %format, "fetched");

        // decoding is CPU-bound
        let dataset = tokio::task::spawn_blocking(move || format.decode(body)).await??;
        Ok(dataset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Value;
    use crate::fetch::{http_client, test_server, DEFAULT_HTTP_TIMEOUT};

    fn remote(url: &str, format: Option<Format>) -> RemoteFile {
        RemoteFile::new(
            http_client(DEFAULT_HTTP_TIMEOUT).unwrap(),
            Url::parse(url).unwrap(),
            format,
        )
    }

    #[tokio::test]
    async fn test_fetches_parquet() {
        let server = test_server::serve(200, test_server::parquet_fixture()).await;
        let ds = remote(&server.url("/gestiones.parquet"), None)
            .retrieve()
            .await
            .unwrap();
        assert_eq!(ds.num_rows(), 2);
        assert_eq!(ds.row(0).unwrap()[1], Value::Text("Ana".into()));
        assert_eq!(server.hits(), 1);
    }

    #[tokio::test]
    async fn test_explicit_format_wins_over_extension() {
        let server = test_server::serve(200, test_server::CSV_FIXTURE.as_bytes().to_vec()).await;
        let ds = remote(&server.url("/export"), Some(Format::Csv))
            .retrieve()
            .await
            .unwrap();
        assert_eq!(ds.column_names(), vec!["CEDULA", "NAME"]);
    }

    #[tokio::test]
    async fn test_http_error_status_fails() {
        let server = test_server::serve(404, b"missing".to_vec()).await;
        let err = remote(&server.url("/gone.csv"), None)
            .retrieve()
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::Http(_)));
    }

    #[tokio::test]
    async fn test_malformed_payload_fails() {
        let server = test_server::serve(200, b"not parquet at all".to_vec()).await;
        let err = remote(&server.url("/broken.parquet"), None)
            .retrieve()
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::Parquet(_)));
    }
}
