//! Notion data model and the API surface the scanner needs.
//!
//! Only the block kinds the OCR workflow touches are modelled in detail
//! (`image`, `paragraph`); everything else deserializes as [`BlockBody::Other`].

pub mod client;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A database row (Notion page) returned by a database query.
#[derive(Debug, Clone, Deserialize)]
pub struct Page {
    pub id: String,
    #[serde(default)]
    pub created_time: Option<String>,
}

/// One child block of a page.
#[derive(Debug, Clone, Deserialize)]
pub struct Block {
    pub id: String,
    #[serde(flatten)]
    pub body: BlockBody,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockBody {
    Image { image: ImageBlock },
    Paragraph { paragraph: ParagraphBlock },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageBlock {
    #[serde(default)]
    pub caption: Vec<RichText>,
    #[serde(default)]
    pub file: Option<FileRef>,
    #[serde(default)]
    pub external: Option<FileRef>,
}

impl ImageBlock {
    /// URL of the image, whether uploaded to Notion or hosted externally.
    pub fn url(&self) -> Option<&str> {
        self.file
            .as_ref()
            .or(self.external.as_ref())
            .map(|f| f.url.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileRef {
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParagraphBlock {
    #[serde(default)]
    pub rich_text: Vec<RichText>,
}

/// A rich-text segment. `plain_text` is read-only in the API and is never
/// sent back; styling and non-text payloads round-trip untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RichText {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<TextContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mention: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equation: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Value>,
    #[serde(default, skip_serializing)]
    pub plain_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextContent {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<Value>,
}

impl RichText {
    /// A plain, unstyled text segment.
    pub fn plain(content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            kind: "text".to_string(),
            text: Some(TextContent {
                content: content.clone(),
                link: None,
            }),
            mention: None,
            equation: None,
            annotations: None,
            plain_text: content,
        }
    }

    /// Raw text content, empty for mentions and equations.
    pub fn content(&self) -> &str {
        self.text.as_ref().map(|t| t.content.as_str()).unwrap_or("")
    }
}

/// A block to be created via "append children".
#[derive(Debug, Clone, PartialEq)]
pub struct NewParagraph {
    pub rich_text: Vec<RichText>,
}

impl NewParagraph {
    pub fn to_json(&self) -> Value {
        json!({
            "object": "block",
            "type": "paragraph",
            "paragraph": { "rich_text": self.rich_text },
        })
    }
}

/// Database query as the scan selector builds it.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseQuery {
    pub page_size: u32,
    pub filter: Option<Value>,
}

impl DatabaseQuery {
    pub fn to_json(&self) -> Value {
        let mut body = json!({
            "page_size": self.page_size,
            "sorts": [
                { "timestamp": "created_time", "direction": "descending" }
            ],
        });
        if let Some(filter) = &self.filter {
            body["filter"] = filter.clone();
        }
        body
    }
}

/// Operations the orchestrator performs against the document database.
///
/// Reads are fatal to the run when they fail; writes are per-item.
#[async_trait::async_trait]
pub trait NotionApi: Send + Sync {
    async fn query_database(&self, query: &DatabaseQuery) -> anyhow::Result<Vec<Page>>;

    async fn list_blocks(&self, page_id: &str) -> anyhow::Result<Vec<Block>>;

    async fn append_paragraphs(
        &self,
        parent_id: &str,
        paragraphs: &[NewParagraph],
    ) -> anyhow::Result<()>;

    async fn replace_caption(&self, block_id: &str, caption: &[RichText]) -> anyhow::Result<()>;

    async fn set_checkbox(&self, page_id: &str, property: &str, value: bool)
        -> anyhow::Result<()>;

    async fn delete_block(&self, block_id: &str) -> anyhow::Result<()>;
}
