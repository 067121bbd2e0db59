//! Streaming HTTP downloads with retry and atomic placement.

use std::path::Path;
use std::time::Duration;

use clearsky_core::io::part_path;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::catalog::AssetSource;
use crate::error::{CloudError, Result};
use crate::retry::{Attempt, RetryPolicy};

const PC_SIGN_URL: &str = "https://planetarycomputer.microsoft.com/api/sas/v1/sign";

/// Downloads assets over HTTP(S).
///
/// Bytes are streamed to `<dst>.part` and the file is renamed onto `dst`
/// only after the whole body arrived, so a visible `dst` is always complete.
pub struct HttpDownloader {
    client: Client,
    policy: RetryPolicy,
    sign_hrefs: bool,
}

impl HttpDownloader {
    pub fn new(policy: RetryPolicy, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| CloudError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            policy,
            sign_hrefs: false,
        })
    }

    /// Sign every href through the Planetary Computer SAS endpoint first.
    pub fn with_signing(mut self, sign_hrefs: bool) -> Self {
        self.sign_hrefs = sign_hrefs;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn download_once(&self, url: &str, tmp: &Path) -> std::result::Result<u64, Attempt<String>> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Attempt::Retry(format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let msg = format!("HTTP {status}");
            return Err(if is_permanent(status) {
                Attempt::Abort(msg)
            } else {
                Attempt::Retry(msg)
            });
        }

        let mut file = tokio::fs::File::create(tmp)
            .await
            .map_err(|e| Attempt::Abort(format!("creating {}: {e}", tmp.display())))?;
        let mut stream = resp.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Attempt::Retry(format!("reading body: {e}")))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| Attempt::Abort(format!("writing {}: {e}", tmp.display())))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| Attempt::Abort(format!("flushing {}: {e}", tmp.display())))?;
        Ok(written)
    }
}

impl AssetSource for HttpDownloader {
    async fn fetch(&self, href: &str, dst: &Path) -> Result<()> {
        let url = if self.sign_hrefs {
            sign_planetary_computer(&self.client, href).await?
        } else {
            href.to_string()
        };
        let tmp = part_path(dst);

        match self.policy.run(href, |_| self.download_once(&url, &tmp)).await {
            Ok(bytes) => {
                tokio::fs::rename(&tmp, dst).await?;
                debug!(href, bytes, dst = %dst.display(), "downloaded");
                Ok(())
            }
            Err(exhausted) => {
                let _ = tokio::fs::remove_file(&tmp).await;
                Err(CloudError::DownloadFailed {
                    url: href.to_string(),
                    attempts: exhausted.attempts,
                    reason: exhausted.last,
                })
            }
        }
    }
}

/// Client errors other than timeouts and throttling will not go away on retry.
fn is_permanent(status: StatusCode) -> bool {
    status.is_client_error()
        && status != StatusCode::REQUEST_TIMEOUT
        && status != StatusCode::TOO_MANY_REQUESTS
}

/// Sign an href via the Planetary Computer `/api/sas/v1/sign` endpoint.
pub async fn sign_planetary_computer(client: &Client, href: &str) -> Result<String> {
    let resp = client
        .get(PC_SIGN_URL)
        .query(&[("href", href)])
        .send()
        .await
        .map_err(|e| CloudError::Auth(format!("PC sign request failed: {e}")))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(CloudError::Auth(format!(
            "PC sign returned HTTP {}: {}",
            status,
            body.chars().take(300).collect::<String>()
        )));
    }

    let body: serde_json::Value = resp
        .json()
        .await
        .map_err(|e| CloudError::Auth(format!("parsing PC sign response: {e}")))?;

    body["href"]
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| CloudError::Auth("PC sign response missing 'href' field".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_statuses() {
        assert!(is_permanent(StatusCode::NOT_FOUND));
        assert!(is_permanent(StatusCode::FORBIDDEN));
        assert!(!is_permanent(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_permanent(StatusCode::REQUEST_TIMEOUT));
        assert!(!is_permanent(StatusCode::SERVICE_UNAVAILABLE));
    }

    #[tokio::test]
    async fn unreachable_host_exhausts_budget() {
        let dir = tempfile::tempdir().unwrap();
        let dst = dir.path().join("B04.tif");
        let downloader = HttpDownloader::new(RetryPolicy::immediate(2), Duration::from_secs(2)).unwrap();

        let err = downloader
            .fetch("http://127.0.0.1:9/B04.tif", &dst)
            .await
            .unwrap_err();
        match err {
            CloudError::DownloadFailed { attempts, .. } => assert_eq!(attempts, 2),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!dst.exists());
        assert!(!part_path(&dst).exists());
    }
}
