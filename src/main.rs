//! Notion OCR - scans a Notion database for images tagged `ocr_text` and
//! writes the recognized text back into the page.
//!
//! One invocation performs one pass; scheduling is left to cron or similar.

mod config;
mod notion;
mod ocr;
mod orchestrator;
mod scanner;
mod selector;
mod splicer;

use config::Settings;
use notion::client::NotionClient;
use ocr::azure::AzureReadProvider;
use orchestrator::Orchestrator;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "notion_ocr=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env()?;
    info!(
        "Running scan of database {} ({} strategy)",
        settings.notion.database_id,
        settings.strategy.name()
    );

    let http = reqwest::Client::new();
    let notion = NotionClient::new(http.clone(), &settings.notion);
    let ocr = AzureReadProvider::new(http, &settings.ocr);

    let summary = Orchestrator::new(&notion, &ocr, &settings).run().await?;

    info!(
        "Scan finished: {} pages, {} tagged images, {} committed, {} failed, {} cleanup failures, {} flags cleared",
        summary.pages_scanned,
        summary.items_found,
        summary.committed,
        summary.failed,
        summary.cleanup_failures,
        summary.flags_cleared
    );

    Ok(())
}
