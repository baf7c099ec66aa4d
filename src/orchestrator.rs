//! Drives one scan pass: select pages, find tagged images, OCR them, write back.
//!
//! Everything runs sequentially. Failing reads abort the run; a failing OCR
//! call or write only fails its item, and with the explicit-flag strategy the
//! page keeps its flag so the next run retries it.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::notion::{NotionApi, Page};
use crate::ocr::OcrProvider;
use crate::scanner::{scan_blocks, PendingOcrItem};
use crate::selector::ScanSelector;
use crate::splicer::{splice, WriteBack};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Committed,
    Failed,
}

/// Counters for a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub pages_scanned: usize,
    pub items_found: usize,
    pub committed: usize,
    pub failed: usize,
    /// Marker paragraphs or page flags that could not be cleaned up.
    pub cleanup_failures: usize,
    pub flags_cleared: usize,
}

pub struct Orchestrator<'a> {
    notion: &'a dyn NotionApi,
    ocr: &'a dyn OcrProvider,
    selector: ScanSelector<'a>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(notion: &'a dyn NotionApi, ocr: &'a dyn OcrProvider, settings: &'a Settings) -> Self {
        Self {
            notion,
            ocr,
            selector: ScanSelector::new(&settings.strategy),
        }
    }

    pub async fn run(&self) -> Result<RunSummary> {
        self.run_at(Utc::now()).await
    }

    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<RunSummary> {
        let query = self.selector.query(now);
        let pages = self
            .notion
            .query_database(&query)
            .await
            .context("Failed to query the database")?;

        info!("Scanning {} candidate pages", pages.len());

        let mut summary = RunSummary::default();
        for page in &pages {
            if !self.selector.admits(page, now) {
                debug!("Page {} is outside the scan window, skipping", page.id);
                continue;
            }
            self.process_page(page, &mut summary).await?;
        }

        Ok(summary)
    }

    async fn process_page(&self, page: &Page, summary: &mut RunSummary) -> Result<()> {
        summary.pages_scanned += 1;

        let blocks = self
            .notion
            .list_blocks(&page.id)
            .await
            .with_context(|| format!("Failed to list blocks of page {}", page.id))?;

        let items = scan_blocks(&blocks);
        if items.is_empty() {
            debug!("Page {} has no images tagged for OCR", page.id);
            return Ok(());
        }

        info!("Page {}: {} images tagged for OCR", page.id, items.len());
        summary.items_found += items.len();

        let mut failed = 0;
        for item in items {
            match self.process_item(&page.id, item, summary).await {
                ItemOutcome::Committed => summary.committed += 1,
                ItemOutcome::Failed => {
                    summary.failed += 1;
                    failed += 1;
                }
            }
        }

        if let Some(property) = self.selector.flag_property() {
            if failed > 0 {
                info!(
                    "Page {}: {} items failed, leaving '{}' set for the next run",
                    page.id, failed, property
                );
            } else {
                match self.notion.set_checkbox(&page.id, property, false).await {
                    Ok(()) => {
                        summary.flags_cleared += 1;
                        info!("Page {}: cleared '{}'", page.id, property);
                    }
                    Err(e) => {
                        summary.cleanup_failures += 1;
                        warn!("Page {}: failed to clear '{}': {:#}", page.id, property, e);
                    }
                }
            }
        }

        Ok(())
    }

    async fn process_item(
        &self,
        page_id: &str,
        mut item: PendingOcrItem,
        summary: &mut RunSummary,
    ) -> ItemOutcome {
        match self.ocr.recognize(&item.image_url).await {
            Ok(lines) => item.recognized_text = lines,
            Err(e) => {
                warn!(
                    "Page {}: OCR via {} failed for image {} (index {}): {:#}",
                    page_id,
                    self.ocr.name(),
                    item.image_block_id,
                    item.position,
                    e
                );
                return ItemOutcome::Failed;
            }
        }

        debug!(
            "Image {}: {} lines recognized",
            item.image_block_id,
            item.recognized_text.len()
        );

        let written = match splice(&item, page_id) {
            WriteBack::AppendParagraphs {
                parent_id,
                paragraphs,
            } => {
                if paragraphs.is_empty() {
                    Ok(())
                } else {
                    self.notion.append_paragraphs(&parent_id, &paragraphs).await
                }
            }
            WriteBack::ReplaceCaption { block_id, caption } => {
                self.notion.replace_caption(&block_id, &caption).await
            }
        };

        if let Err(e) = written {
            warn!(
                "Page {}: failed to write OCR text for image {} ({} mode, index {}): {:#}",
                page_id,
                item.image_block_id,
                item.mode(),
                item.position,
                e
            );
            return ItemOutcome::Failed;
        }

        if let Some(marker_block_id) = item.spent_marker_block() {
            if let Err(e) = self.notion.delete_block(marker_block_id).await {
                summary.cleanup_failures += 1;
                warn!(
                    "Page {}: text committed but marker block {} could not be deleted: {:#}",
                    page_id, marker_block_id, e
                );
            }
        }

        info!(
            "Page {}: committed OCR text for image {} ({} mode)",
            page_id,
            item.image_block_id,
            item.mode()
        );
        ItemOutcome::Committed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NotionSettings, OcrSettings, ScanStrategy};
    use crate::notion::{
        Block, BlockBody, DatabaseQuery, FileRef, ImageBlock, NewParagraph, ParagraphBlock,
        RichText,
    };
    use crate::scanner::{CLOSING_DELIMITER, OPENING_DELIMITER};
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Append { parent: String, texts: Vec<String> },
        Caption { block: String, texts: Vec<String> },
        Checkbox { page: String, property: String, value: bool },
        Delete { block: String },
    }

    struct FakePage {
        page: Page,
        flagged: bool,
        blocks: Vec<Block>,
    }

    #[derive(Default)]
    struct FakeNotion {
        pages: Mutex<Vec<FakePage>>,
        calls: Mutex<Vec<Call>>,
        failing_writes: HashSet<String>,
        fail_deletes: bool,
        fail_listing: bool,
    }

    impl FakeNotion {
        fn with_page(self, id: &str, flagged: bool, blocks: Vec<Block>) -> Self {
            self.pages.lock().unwrap().push(FakePage {
                page: Page {
                    id: id.to_string(),
                    created_time: Some(Utc::now().to_rfc3339()),
                },
                flagged,
                blocks,
            });
            self
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn flagged(&self, id: &str) -> bool {
            self.pages
                .lock()
                .unwrap()
                .iter()
                .any(|p| p.page.id == id && p.flagged)
        }

        fn write_result(&self, id: &str) -> anyhow::Result<()> {
            if self.failing_writes.contains(id) {
                anyhow::bail!("Notion API error (500): boom");
            }
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl NotionApi for FakeNotion {
        async fn query_database(&self, query: &DatabaseQuery) -> anyhow::Result<Vec<Page>> {
            let by_flag = query
                .filter
                .as_ref()
                .map(|f| f.get("checkbox").is_some())
                .unwrap_or(false);
            Ok(self
                .pages
                .lock()
                .unwrap()
                .iter()
                .filter(|p| !by_flag || p.flagged)
                .map(|p| p.page.clone())
                .collect())
        }

        async fn list_blocks(&self, page_id: &str) -> anyhow::Result<Vec<Block>> {
            if self.fail_listing {
                anyhow::bail!("Notion API error (502): bad gateway");
            }
            self.pages
                .lock()
                .unwrap()
                .iter()
                .find(|p| p.page.id == page_id)
                .map(|p| p.blocks.clone())
                .ok_or_else(|| anyhow::anyhow!("unknown page {}", page_id))
        }

        async fn append_paragraphs(
            &self,
            parent_id: &str,
            paragraphs: &[NewParagraph],
        ) -> anyhow::Result<()> {
            self.write_result(parent_id)?;
            self.calls.lock().unwrap().push(Call::Append {
                parent: parent_id.to_string(),
                texts: paragraphs
                    .iter()
                    .map(|p| p.rich_text.iter().map(|s| s.content()).collect())
                    .collect(),
            });
            Ok(())
        }

        async fn replace_caption(&self, block_id: &str, caption: &[RichText]) -> anyhow::Result<()> {
            self.write_result(block_id)?;
            self.calls.lock().unwrap().push(Call::Caption {
                block: block_id.to_string(),
                texts: caption.iter().map(|s| s.plain_text.clone()).collect(),
            });
            for page in self.pages.lock().unwrap().iter_mut() {
                for block in page.blocks.iter_mut().filter(|b| b.id == block_id) {
                    if let BlockBody::Image { image } = &mut block.body {
                        image.caption = caption.to_vec();
                    }
                }
            }
            Ok(())
        }

        async fn set_checkbox(
            &self,
            page_id: &str,
            property: &str,
            value: bool,
        ) -> anyhow::Result<()> {
            self.write_result(page_id)?;
            self.calls.lock().unwrap().push(Call::Checkbox {
                page: page_id.to_string(),
                property: property.to_string(),
                value,
            });
            for page in self.pages.lock().unwrap().iter_mut() {
                if page.page.id == page_id {
                    page.flagged = value;
                }
            }
            Ok(())
        }

        async fn delete_block(&self, block_id: &str) -> anyhow::Result<()> {
            if self.fail_deletes {
                anyhow::bail!("Notion API error (409): conflict");
            }
            self.calls.lock().unwrap().push(Call::Delete {
                block: block_id.to_string(),
            });
            for page in self.pages.lock().unwrap().iter_mut() {
                page.blocks.retain(|b| b.id != block_id);
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeOcr {
        results: HashMap<String, Result<Vec<String>, String>>,
    }

    impl FakeOcr {
        fn ok(mut self, image_id: &str, lines: &[&str]) -> Self {
            self.results
                .insert(url_for(image_id), Ok(lines.iter().map(|l| l.to_string()).collect()));
            self
        }

        fn err(mut self, image_id: &str, message: &str) -> Self {
            self.results
                .insert(url_for(image_id), Err(message.to_string()));
            self
        }
    }

    #[async_trait::async_trait]
    impl OcrProvider for FakeOcr {
        fn name(&self) -> &str {
            "fake"
        }

        async fn recognize(&self, image_url: &str) -> anyhow::Result<Vec<String>> {
            match self.results.get(image_url) {
                Some(Ok(lines)) => Ok(lines.clone()),
                Some(Err(e)) => Err(anyhow::anyhow!("{}", e)),
                None => Err(anyhow::anyhow!("no OCR result for {}", image_url)),
            }
        }
    }

    fn url_for(image_id: &str) -> String {
        format!("https://files.example.com/{}.png", image_id)
    }

    fn image(id: &str, caption: &[&str]) -> Block {
        Block {
            id: id.to_string(),
            body: BlockBody::Image {
                image: ImageBlock {
                    caption: caption.iter().map(|t| RichText::plain(*t)).collect(),
                    file: Some(FileRef { url: url_for(id) }),
                    external: None,
                },
            },
        }
    }

    fn paragraph(id: &str, text: &str) -> Block {
        Block {
            id: id.to_string(),
            body: BlockBody::Paragraph {
                paragraph: ParagraphBlock {
                    rich_text: vec![RichText::plain(text)],
                },
            },
        }
    }

    fn settings(strategy: ScanStrategy) -> Settings {
        Settings {
            notion: NotionSettings {
                token: "secret".to_string(),
                database_id: "db".to_string(),
                api_url: "http://localhost".to_string(),
            },
            ocr: OcrSettings {
                endpoint: "http://localhost".to_string(),
                api_key: "key".to_string(),
                poll_interval: Duration::from_secs(1),
                timeout: Duration::from_secs(5),
            },
            strategy,
        }
    }

    fn recency() -> Settings {
        settings(ScanStrategy::RecencyWindow { window_minutes: 30 })
    }

    fn flagged() -> Settings {
        settings(ScanStrategy::ExplicitFlag {
            property: "Active".to_string(),
        })
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_paragraph_marker_appends_and_deletes() {
        let notion = FakeNotion::default().with_page(
            "page1",
            false,
            vec![image("img1", &[]), paragraph("p1", "ocr_text")],
        );
        let ocr = FakeOcr::default().ok("img1", &["Hello", "World"]);
        let settings = recency();

        let summary = Orchestrator::new(&notion, &ocr, &settings).run().await.unwrap();

        assert_eq!(
            notion.calls(),
            vec![
                Call::Append {
                    parent: "page1".to_string(),
                    texts: strings(&["Hello", "World"]),
                },
                Call::Delete {
                    block: "p1".to_string()
                },
            ]
        );
        assert_eq!(summary.committed, 1);
        assert_eq!(summary.failed, 0);
    }

    #[tokio::test]
    async fn test_caption_marker_is_spliced() {
        let notion =
            FakeNotion::default().with_page("page1", false, vec![image("img1", &["photo\nocr_text"])]);
        let ocr = FakeOcr::default().ok("img1", &["Line1"]);
        let settings = recency();

        Orchestrator::new(&notion, &ocr, &settings).run().await.unwrap();

        assert_eq!(
            notion.calls(),
            vec![Call::Caption {
                block: "img1".to_string(),
                texts: strings(&["photo\n", OPENING_DELIMITER, "Line1", CLOSING_DELIMITER]),
            }]
        );
    }

    #[tokio::test]
    async fn test_caption_and_paragraph_marker_yield_one_item() {
        let notion = FakeNotion::default().with_page(
            "page1",
            false,
            vec![image("img1", &["ocr_text"]), paragraph("p1", "ocr_text")],
        );
        let ocr = FakeOcr::default().ok("img1", &["x"]);
        let settings = recency();

        let summary = Orchestrator::new(&notion, &ocr, &settings).run().await.unwrap();

        assert_eq!(summary.items_found, 1);
        let calls = notion.calls();
        assert_eq!(calls.len(), 2);
        assert!(matches!(&calls[0], Call::Caption { block, .. } if block == "img1"));
        assert_eq!(
            calls[1],
            Call::Delete {
                block: "p1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_caption_marker_with_paragraph_marker_is_written_once() {
        let notion = FakeNotion::default().with_page(
            "page1",
            false,
            vec![image("img1", &["ocr_text"]), paragraph("p1", "ocr_text")],
        );
        let ocr = FakeOcr::default().ok("img1", &["x"]);
        let settings = recency();
        let orchestrator = Orchestrator::new(&notion, &ocr, &settings);

        orchestrator.run().await.unwrap();
        let writes = notion.calls().len();

        let again = orchestrator.run().await.unwrap();
        assert_eq!(again.items_found, 0);
        assert_eq!(notion.calls().len(), writes);
    }

    #[tokio::test]
    async fn test_recognized_marker_line_is_not_rescanned() {
        let notion =
            FakeNotion::default().with_page("page1", false, vec![image("img1", &["ocr_text"])]);
        let ocr = FakeOcr::default().ok("img1", &["label", "ocr_text", "more"]);
        let settings = recency();
        let orchestrator = Orchestrator::new(&notion, &ocr, &settings);

        let first = orchestrator.run().await.unwrap();
        assert_eq!(first.committed, 1);

        let again = orchestrator.run().await.unwrap();
        assert_eq!(again.items_found, 0);
        assert_eq!(notion.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_no_markers_means_no_writes() {
        let notion = FakeNotion::default().with_page(
            "page1",
            true,
            vec![image("img1", &["a photo"]), paragraph("p1", "notes")],
        );
        let ocr = FakeOcr::default();
        let settings = flagged();

        let summary = Orchestrator::new(&notion, &ocr, &settings).run().await.unwrap();

        assert!(notion.calls().is_empty());
        assert_eq!(summary.pages_scanned, 1);
        assert_eq!(summary.items_found, 0);
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_flag() {
        let notion = FakeNotion::default().with_page(
            "page1",
            true,
            vec![
                image("img1", &[]),
                paragraph("p1", "ocr_text"),
                image("img2", &[]),
                paragraph("p2", "ocr_text"),
            ],
        );
        let ocr = FakeOcr::default()
            .err("img1", "Azure Read reported failure")
            .ok("img2", &["ok"]);
        let settings = flagged();

        let summary = Orchestrator::new(&notion, &ocr, &settings).run().await.unwrap();

        assert_eq!(
            notion.calls(),
            vec![
                Call::Append {
                    parent: "page1".to_string(),
                    texts: strings(&["ok"]),
                },
                Call::Delete {
                    block: "p2".to_string()
                },
            ]
        );
        assert!(notion.flagged("page1"));
        assert_eq!(summary.committed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.flags_cleared, 0);
    }

    #[tokio::test]
    async fn test_full_success_clears_flag_and_rerun_is_noop() {
        let notion = FakeNotion::default().with_page(
            "page1",
            true,
            vec![image("img1", &["ocr_text"]), image("img2", &[]), paragraph("p2", "ocr_text")],
        );
        let ocr = FakeOcr::default().ok("img1", &["one"]).ok("img2", &["two"]);
        let settings = flagged();
        let orchestrator = Orchestrator::new(&notion, &ocr, &settings);

        let summary = orchestrator.run().await.unwrap();
        assert_eq!(summary.committed, 2);
        assert_eq!(summary.flags_cleared, 1);
        assert!(!notion.flagged("page1"));
        assert_eq!(
            notion.calls().last(),
            Some(&Call::Checkbox {
                page: "page1".to_string(),
                property: "Active".to_string(),
                value: false,
            })
        );

        let writes = notion.calls().len();
        let again = orchestrator.run().await.unwrap();
        assert_eq!(notion.calls().len(), writes);
        assert_eq!(again.pages_scanned, 0);
    }

    #[tokio::test]
    async fn test_recency_rerun_finds_nothing_left() {
        let notion = FakeNotion::default().with_page(
            "page1",
            false,
            vec![
                image("img1", &["caption\nocr_text"]),
                image("img2", &[]),
                paragraph("p2", "ocr_text"),
            ],
        );
        let ocr = FakeOcr::default().ok("img1", &["one"]).ok("img2", &["two"]);
        let settings = recency();
        let orchestrator = Orchestrator::new(&notion, &ocr, &settings);

        orchestrator.run().await.unwrap();
        let writes = notion.calls().len();
        assert_eq!(writes, 3);

        let again = orchestrator.run().await.unwrap();
        assert_eq!(again.pages_scanned, 1);
        assert_eq!(again.items_found, 0);
        assert_eq!(notion.calls().len(), writes);
    }

    #[tokio::test]
    async fn test_write_failure_fails_item_without_delete() {
        let mut notion = FakeNotion::default().with_page(
            "page1",
            true,
            vec![image("img1", &[]), paragraph("p1", "ocr_text")],
        );
        notion.failing_writes.insert("page1".to_string());
        let ocr = FakeOcr::default().ok("img1", &["text"]);
        let settings = flagged();

        let summary = Orchestrator::new(&notion, &ocr, &settings).run().await.unwrap();

        assert!(notion.calls().is_empty());
        assert_eq!(summary.failed, 1);
        assert!(notion.flagged("page1"));
    }

    #[tokio::test]
    async fn test_delete_failure_still_commits() {
        let mut notion = FakeNotion::default().with_page(
            "page1",
            false,
            vec![image("img1", &[]), paragraph("p1", "ocr_text")],
        );
        notion.fail_deletes = true;
        let ocr = FakeOcr::default().ok("img1", &["text"]);
        let settings = recency();

        let summary = Orchestrator::new(&notion, &ocr, &settings).run().await.unwrap();

        assert_eq!(summary.committed, 1);
        assert_eq!(summary.cleanup_failures, 1);
        assert_eq!(notion.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_ocr_result_only_removes_marker() {
        let notion = FakeNotion::default().with_page(
            "page1",
            false,
            vec![image("img1", &[]), paragraph("p1", "ocr_text")],
        );
        let ocr = FakeOcr::default().ok("img1", &[]);
        let settings = recency();

        let summary = Orchestrator::new(&notion, &ocr, &settings).run().await.unwrap();

        assert_eq!(
            notion.calls(),
            vec![Call::Delete {
                block: "p1".to_string()
            }]
        );
        assert_eq!(summary.committed, 1);
    }

    #[tokio::test]
    async fn test_block_listing_failure_is_fatal() {
        let mut notion = FakeNotion::default().with_page(
            "page1",
            false,
            vec![image("img1", &[]), paragraph("p1", "ocr_text")],
        );
        notion.fail_listing = true;
        let ocr = FakeOcr::default().ok("img1", &["text"]);
        let settings = recency();

        let err = Orchestrator::new(&notion, &ocr, &settings)
            .run()
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to list blocks of page page1"));
        assert!(notion.calls().is_empty());
    }
}
