//! Turns recognized text into the write-back payload for a pending item.
//!
//! Notion rejects rich-text segments longer than 2000 characters, so caption
//! text above that size is split into several segments at word boundaries.

use crate::notion::{NewParagraph, RichText};
use crate::scanner::{
    find_marker_line, OcrAnchor, PendingOcrItem, CLOSING_DELIMITER, MARKER, OPENING_DELIMITER,
};

/// Max characters in one rich-text segment.
pub const SEGMENT_LIMIT: usize = 2000;
/// Max characters per chunk when text has to be split.
pub const CHUNK_LIMIT: usize = SEGMENT_LIMIT - 1;

/// What to write back for one item.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteBack {
    AppendParagraphs {
        parent_id: String,
        paragraphs: Vec<NewParagraph>,
    },
    ReplaceCaption {
        block_id: String,
        caption: Vec<RichText>,
    },
}

pub fn splice(item: &PendingOcrItem, page_id: &str) -> WriteBack {
    match &item.anchor {
        OcrAnchor::Paragraph { .. } => WriteBack::AppendParagraphs {
            parent_id: page_id.to_string(),
            paragraphs: build_paragraphs(&item.recognized_text),
        },
        OcrAnchor::Caption {
            caption,
            segment_index,
            insert_index,
            ..
        } => WriteBack::ReplaceCaption {
            block_id: item.target_block_id.clone(),
            caption: splice_caption(caption, *segment_index, *insert_index, &item.recognized_text),
        },
    }
}

/// One paragraph per line. Overlong lines become several segments of the same paragraph.
pub fn build_paragraphs(lines: &[String]) -> Vec<NewParagraph> {
    lines
        .iter()
        .map(|line| {
            let rich_text = if line.chars().count() <= SEGMENT_LIMIT {
                vec![RichText::plain(line.as_str())]
            } else {
                split_chunks(line, CHUNK_LIMIT)
                    .into_iter()
                    .map(RichText::plain)
                    .collect()
            };
            NewParagraph { rich_text }
        })
        .collect()
}

/// Replace the marker in `caption[segment_index]` with the delimited text.
pub fn splice_caption(
    caption: &[RichText],
    segment_index: usize,
    insert_index: usize,
    lines: &[String],
) -> Vec<RichText> {
    let full_text = lines.join("\n");
    let mut caption = caption.to_vec();
    let mut insert_at = insert_index.min(caption.len());

    let emptied = match caption.get_mut(segment_index) {
        Some(segment) => {
            strip_marker(segment);
            segment.kind == "text" && segment.plain_text.is_empty() && segment.content().is_empty()
        }
        None => false,
    };
    // A segment that held nothing but the marker goes away entirely.
    if emptied {
        caption.remove(segment_index);
        if insert_at > segment_index {
            insert_at -= 1;
        }
    }

    let body = if full_text.chars().count() <= SEGMENT_LIMIT {
        vec![full_text]
    } else {
        split_chunks(&full_text, CHUNK_LIMIT)
    };

    let inserted = std::iter::once(OPENING_DELIMITER.to_string())
        .chain(body)
        .chain(std::iter::once(CLOSING_DELIMITER.to_string()))
        .map(RichText::plain);

    for segment in inserted {
        caption.insert(insert_at, segment);
        insert_at += 1;
    }

    caption
}

/// Remove the marker line's token from both projections of a segment.
fn strip_marker(segment: &mut RichText) {
    if let Some(offset) = find_marker_line(&segment.plain_text, MARKER) {
        segment
            .plain_text
            .replace_range(offset..offset + MARKER.len(), "");
    }
    if let Some(text) = segment.text.as_mut() {
        if let Some(offset) = find_marker_line(&text.content, MARKER) {
            text.content.replace_range(offset..offset + MARKER.len(), "");
        }
    }
}

/// Split `text` into pieces of at most `limit` characters without losing any
/// of it. Pieces end just after the last space in the window, falling back to
/// the last newline, and finally to a hard cut at `limit` characters.
pub fn split_chunks(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;

    while rest.chars().count() > limit {
        let window_end = rest
            .char_indices()
            .nth(limit)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let window = &rest[..window_end];
        let cut = window
            .rfind(' ')
            .or_else(|| window.rfind('\n'))
            .map(|i| i + 1)
            .unwrap_or(window_end);

        chunks.push(rest[..cut].to_string());
        rest = &rest[cut..];
    }

    if !rest.is_empty() || chunks.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}
