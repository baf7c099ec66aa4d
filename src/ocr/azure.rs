//! Azure Computer Vision "Read" provider.
//!
//! Submitting an image returns an `Operation-Location` URL; the result is
//! polled at a fixed interval until it succeeds, fails, or the timeout elapses.

use std::future::Future;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::OcrProvider;
use crate::config::OcrSettings;

const READ_PATH: &str = "vision/v3.2/read/analyze";
const SUBSCRIPTION_HEADER: &str = "Ocp-Apim-Subscription-Key";

pub struct AzureReadProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    poll_interval: Duration,
    timeout: Duration,
}

// ── Read API response types ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadOperation {
    status: ReadStatus,
    #[serde(default)]
    analyze_result: Option<AnalyzeResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
enum ReadStatus {
    NotStarted,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResult {
    #[serde(default)]
    read_results: Vec<ReadResult>,
}

#[derive(Debug, Deserialize)]
struct ReadResult {
    #[serde(default)]
    lines: Vec<ReadLine>,
}

#[derive(Debug, Deserialize)]
struct ReadLine {
    text: String,
}

impl AzureReadProvider {
    pub fn new(client: reqwest::Client, settings: &OcrSettings) -> Self {
        Self {
            client,
            endpoint: settings.endpoint.clone(),
            api_key: settings.api_key.clone(),
            poll_interval: settings.poll_interval,
            timeout: settings.timeout,
        }
    }

    /// Submit the image and return the operation URL to poll.
    async fn submit(&self, image_url: &str) -> Result<String> {
        let resp = self
            .client
            .post(format!("{}/{}", self.endpoint, READ_PATH))
            .header(SUBSCRIPTION_HEADER, &self.api_key)
            .json(&json!({ "url": image_url }))
            .send()
            .await
            .context("Failed to submit image to Azure Read")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Azure Read submit error ({}): {}", status, text);
        }

        resp.headers()
            .get("Operation-Location")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Azure Read response has no Operation-Location header"))
    }

    async fn fetch(&self, operation_url: &str) -> Result<ReadOperation> {
        let resp = self
            .client
            .get(operation_url)
            .header(SUBSCRIPTION_HEADER, &self.api_key)
            .send()
            .await
            .context("Failed to poll Azure Read operation")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Azure Read poll error ({}): {}", status, text);
        }

        resp.json()
            .await
            .context("Failed to parse Azure Read operation")
    }
}

#[async_trait::async_trait]
impl OcrProvider for AzureReadProvider {
    fn name(&self) -> &str {
        "azure_read"
    }

    async fn recognize(&self, image_url: &str) -> Result<Vec<String>> {
        let operation_url = self.submit(image_url).await?;
        debug!("AzureReadProvider: operation {}", operation_url);

        let operation_url = operation_url.as_str();
        poll_operation(move || self.fetch(operation_url), self.poll_interval, self.timeout)
            .await
            .with_context(|| format!("Azure Read failed for {}", image_url))
    }
}

/// Fetch the operation until it settles. A fetch error ends polling at once.
async fn poll_operation<F, Fut>(
    mut fetch: F,
    poll_interval: Duration,
    timeout: Duration,
) -> Result<Vec<String>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<ReadOperation>>,
{
    let deadline = Instant::now() + timeout;

    loop {
        let operation = fetch().await?;
        match operation.status {
            ReadStatus::Succeeded => {
                let lines = collect_lines(operation.analyze_result);
                info!("AzureReadProvider: recognized {} lines", lines.len());
                return Ok(lines);
            }
            ReadStatus::Failed => anyhow::bail!("Azure Read reported failure"),
            ReadStatus::NotStarted | ReadStatus::Running => {
                debug!("Awaiting response from Azure Read ({:?})", operation.status);
            }
        }

        if Instant::now() >= deadline {
            warn!("AzureReadProvider: giving up after {:?}", timeout);
            anyhow::bail!(
                "Timed out after {:?} waiting for Azure Read ({:?})",
                timeout,
                operation.status
            );
        }

        tokio::time::sleep(poll_interval).await;
    }
}

/// Flatten regions into lines, keeping reading order.
fn collect_lines(result: Option<AnalyzeResult>) -> Vec<String> {
    result
        .map(|r| {
            r.read_results
                .into_iter()
                .flat_map(|page| page.lines.into_iter().map(|l| l.text))
                .collect()
        })
        .unwrap_or_default()
}
