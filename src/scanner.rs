//! Marker detection.
//!
//! An image is tagged for OCR either by a caption line reading exactly
//! [`MARKER`] or by a paragraph directly after it whose first segment is the
//! marker. A caption marker wins; a marker paragraph after it is only removed.
//! Caption text between the OCR delimiters is earlier output and is skipped.

use tracing::{debug, warn};

use crate::notion::{Block, BlockBody, ImageBlock, RichText};

/// Reserved token that flags an image for OCR.
pub const MARKER: &str = "ocr_text";

/// Segments bounding spliced OCR output inside a caption. Text between them
/// is recognized output and never counts as a marker.
pub const OPENING_DELIMITER: &str = "----- OCR -----\n";
pub const CLOSING_DELIMITER: &str = "\n---------------\n";

/// Where the recognized text goes once OCR is done.
#[derive(Debug, Clone, PartialEq)]
pub enum OcrAnchor {
    /// Text is appended to the page as paragraphs; the marker paragraph is deleted.
    Paragraph { marker_block_id: String },
    /// Text is spliced into the image caption in place of the marker.
    Caption {
        caption: Vec<RichText>,
        /// Segment holding the marker line.
        segment_index: usize,
        /// Where new segments are inserted: the marker segment itself when the
        /// marker starts it, otherwise right after it.
        insert_index: usize,
        /// Marker paragraph right after the image, superseded by the caption
        /// marker. Deleted once the caption is written.
        shadowed_marker_id: Option<String>,
    },
}

/// An image awaiting OCR, valid for a single scan pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOcrItem {
    pub image_block_id: String,
    pub image_url: String,
    /// Index of the image among the page's blocks.
    pub position: usize,
    /// Block that gets written: the image for captions, the marker paragraph otherwise.
    pub target_block_id: String,
    pub anchor: OcrAnchor,
    pub recognized_text: Vec<String>,
}

impl PendingOcrItem {
    pub fn mode(&self) -> &'static str {
        match self.anchor {
            OcrAnchor::Paragraph { .. } => "paragraph",
            OcrAnchor::Caption { .. } => "caption",
        }
    }

    /// Marker paragraph to delete after a successful write, if any.
    pub fn spent_marker_block(&self) -> Option<&str> {
        match &self.anchor {
            OcrAnchor::Paragraph { marker_block_id } => Some(marker_block_id),
            OcrAnchor::Caption {
                shadowed_marker_id, ..
            } => shadowed_marker_id.as_deref(),
        }
    }
}

/// Byte offset of `marker` in `text` when it makes up a whole line
/// (surrounding spaces on that line are tolerated).
pub fn find_marker_line(text: &str, marker: &str) -> Option<usize> {
    let mut line_start = 0;
    for line in text.split('\n') {
        let trimmed = line.trim_start();
        if trimmed.trim_end() == marker {
            return Some(line_start + (line.len() - trimmed.len()));
        }
        line_start += line.len() + 1;
    }
    None
}

fn caption_anchor(image: &ImageBlock, next: Option<&Block>) -> Option<OcrAnchor> {
    let mut in_ocr_output = false;

    for (index, segment) in image.caption.iter().enumerate() {
        if in_ocr_output {
            in_ocr_output = segment.plain_text != CLOSING_DELIMITER;
            continue;
        }
        if segment.plain_text == OPENING_DELIMITER {
            in_ocr_output = true;
            continue;
        }

        if let Some(offset) = find_marker_line(&segment.plain_text, MARKER) {
            return Some(OcrAnchor::Caption {
                caption: image.caption.clone(),
                segment_index: index,
                insert_index: if offset == 0 { index } else { index + 1 },
                shadowed_marker_id: next
                    .filter(|block| is_marker_paragraph(block))
                    .map(|block| block.id.clone()),
            });
        }
    }
    None
}

fn is_marker_paragraph(block: &Block) -> bool {
    match &block.body {
        BlockBody::Paragraph { paragraph } => paragraph
            .rich_text
            .first()
            .map(|first| first.plain_text == MARKER)
            .unwrap_or(false),
        _ => false,
    }
}

/// Walk a page's blocks once and collect every tagged image, in page order.
pub fn scan_blocks(blocks: &[Block]) -> Vec<PendingOcrItem> {
    let mut items = Vec::new();

    for (position, block) in blocks.iter().enumerate() {
        let BlockBody::Image { image } = &block.body else {
            continue;
        };

        let next = blocks.get(position + 1);
        let anchor = match caption_anchor(image, next) {
            Some(anchor) => anchor,
            None => match next {
                Some(next) if is_marker_paragraph(next) => OcrAnchor::Paragraph {
                    marker_block_id: next.id.clone(),
                },
                _ => continue,
            },
        };

        let Some(url) = image.url() else {
            warn!("Image {} is tagged for OCR but has no URL", block.id);
            continue;
        };

        let target_block_id = match &anchor {
            OcrAnchor::Paragraph { marker_block_id } => marker_block_id.clone(),
            OcrAnchor::Caption { .. } => block.id.clone(),
        };

        let item = PendingOcrItem {
            image_block_id: block.id.clone(),
            image_url: url.to_string(),
            position,
            target_block_id,
            anchor,
            recognized_text: Vec::new(),
        };
        debug!(
            "Found '{}' for image {} at index {} ({} mode)",
            MARKER,
            block.id,
            position,
            item.mode()
        );
        items.push(item);
    }

    items
}
