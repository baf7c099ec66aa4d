//! OCR backend abstraction.
//!
//! A provider takes an image URL and blocks until the remote job finishes,
//! returning one string per recognized line in reading order.

pub mod azure;

/// Async trait implemented by each OCR backend.
#[async_trait::async_trait]
pub trait OcrProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Recognize the text of the image at `image_url`.
    async fn recognize(&self, image_url: &str) -> anyhow::Result<Vec<String>>;
}
