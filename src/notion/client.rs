//! reqwest-backed Notion REST client.

use anyhow::{anyhow, Context, Result};
use reqwest::{Client, Method, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{Block, DatabaseQuery, NewParagraph, NotionApi, Page, RichText};
use crate::config::NotionSettings;

const NOTION_VERSION: &str = "2022-06-28";
/// Page size for block listing, the API maximum.
const BLOCK_PAGE_SIZE: u32 = 100;
/// Max children accepted by one append request.
const APPEND_BATCH_SIZE: usize = 100;

#[derive(Clone)]
pub struct NotionClient {
    client: Client,
    base_url: String,
    token: String,
    database_id: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    results: Vec<T>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    next_cursor: Option<String>,
}

impl NotionClient {
    pub fn new(client: Client, settings: &NotionSettings) -> Self {
        Self {
            client,
            base_url: settings.api_url.clone(),
            token: settings.token.clone(),
            database_id: settings.database_id.clone(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/{}", self.base_url, path))
            .bearer_auth(&self.token)
            .header("Notion-Version", NOTION_VERSION)
            .header("Content-Type", "application/json")
    }

    /// Send a request and decode the JSON body, turning non-2xx into errors.
    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Value> {
        let resp = request
            .send()
            .await
            .with_context(|| format!("Failed to send Notion request: {}", what))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Notion API error on {} ({}): {}", what, status, text));
        }

        resp.json()
            .await
            .with_context(|| format!("Failed to parse Notion response: {}", what))
    }
}

#[async_trait::async_trait]
impl NotionApi for NotionClient {
    async fn query_database(&self, query: &DatabaseQuery) -> Result<Vec<Page>> {
        let body = query.to_json();
        debug!("Querying database {}: {}", self.database_id, body);

        let value = self
            .send(
                self.request(
                    Method::POST,
                    &format!("databases/{}/query", self.database_id),
                )
                .json(&body),
                "database query",
            )
            .await?;

        let list: ListResponse<Page> =
            serde_json::from_value(value).context("Unexpected database query response")?;

        if list.results.is_empty() {
            info!("The query didn't match any pages");
        }
        Ok(list.results)
    }

    async fn list_blocks(&self, page_id: &str) -> Result<Vec<Block>> {
        let mut blocks = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut path = format!("blocks/{}/children?page_size={}", page_id, BLOCK_PAGE_SIZE);
            if let Some(c) = &cursor {
                path.push_str(&format!("&start_cursor={}", c));
            }

            let value = self
                .send(self.request(Method::GET, &path), "block listing")
                .await?;
            let list: ListResponse<Block> = serde_json::from_value(value)
                .with_context(|| format!("Unexpected block listing for page {}", page_id))?;

            blocks.extend(list.results);

            match (list.has_more, list.next_cursor) {
                (true, Some(next)) => cursor = Some(next),
                _ => break,
            }
        }

        debug!("Page {} has {} blocks", page_id, blocks.len());
        Ok(blocks)
    }

    async fn append_paragraphs(&self, parent_id: &str, paragraphs: &[NewParagraph]) -> Result<()> {
        for batch in paragraphs.chunks(APPEND_BATCH_SIZE) {
            let children: Vec<Value> = batch.iter().map(NewParagraph::to_json).collect();
            self.send(
                self.request(Method::PATCH, &format!("blocks/{}/children", parent_id))
                    .json(&json!({ "children": children })),
                "append children",
            )
            .await?;
        }

        debug!("Appended {} paragraphs to {}", paragraphs.len(), parent_id);
        Ok(())
    }

    async fn replace_caption(&self, block_id: &str, caption: &[RichText]) -> Result<()> {
        self.send(
            self.request(Method::PATCH, &format!("blocks/{}", block_id))
                .json(&json!({ "image": { "caption": caption } })),
            "caption update",
        )
        .await?;

        debug!("Updated caption of {} ({} segments)", block_id, caption.len());
        Ok(())
    }

    async fn set_checkbox(&self, page_id: &str, property: &str, value: bool) -> Result<()> {
        self.send(
            self.request(Method::PATCH, &format!("pages/{}", page_id))
                .json(&json!({ "properties": { property: { "checkbox": value } } })),
            "page property update",
        )
        .await?;
        Ok(())
    }

    async fn delete_block(&self, block_id: &str) -> Result<()> {
        self.send(
            self.request(Method::DELETE, &format!("blocks/{}", block_id)),
            "block delete",
        )
        .await?;
        Ok(())
    }
}
