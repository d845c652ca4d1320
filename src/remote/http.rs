use super::ReportClient;
use crate::execution::ExecutionMetadata;
use anyhow::{Context, Result};
use reqwest::Client;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// reqwest-backed client for the remote reporting server.
///
/// Every request is bounded by the configured timeout; a timed-out request
/// surfaces as an ordinary error.
#[derive(Clone)]
pub struct HttpReportClient {
    base_url: String,
    client: Client,
}

impl HttpReportClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_ok(&self, path: &str) -> Result<reqwest::Response> {
        let url = self.url(path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?
            .error_for_status()
            .with_context(|| format!("GET {url} returned an error status"))?;
        Ok(resp)
    }
}

#[async_trait::async_trait]
impl ReportClient for HttpReportClient {
    async fn get_executions(&self, path: &str) -> Result<BTreeMap<u32, ExecutionMetadata>> {
        let executions = self
            .get_ok(path)
            .await?
            .json::<BTreeMap<u32, ExecutionMetadata>>()
            .await
            .with_context(|| format!("Invalid execution listing at {path}"))?;
        Ok(executions)
    }

    async fn get_string(&self, path: &str) -> Result<String> {
        let body = self
            .get_ok(path)
            .await?
            .text()
            .await
            .with_context(|| format!("Failed to read response body of {path}"))?;
        Ok(body)
    }

    async fn get_file(&self, path: &str, dir: &Path, file_name: &str) -> Result<PathBuf> {
        let bytes = self
            .get_ok(path)
            .await?
            .bytes()
            .await
            .with_context(|| format!("Failed to download {path}"))?;

        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create download dir {}", dir.display()))?;
        let dest = dir.join(file_name);
        if let Err(e) = tokio::fs::write(&dest, &bytes).await {
            let _ = tokio::fs::remove_file(&dest).await;
            return Err(e).with_context(|| format!("Failed to write {}", dest.display()));
        }
        debug!(file = %dest.display(), bytes = bytes.len(), "Downloaded file");
        Ok(dest)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let url = self.url(path);
        self.client
            .delete(&url)
            .send()
            .await
            .with_context(|| format!("DELETE {url} failed"))?
            .error_for_status()
            .with_context(|| format!("DELETE {url} returned an error status"))?;
        Ok(())
    }
}
