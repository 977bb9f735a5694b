use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;

/// An AI service answering JSON to text or image prompts.
///
/// Every response is untrusted: callers validate its shape before reading any field.
#[async_trait]
pub trait ClassificationOracle: Send + Sync {
    async fn classify_text(&self, system_prompt: &str, user_prompt: &str) -> Result<Value>;

    async fn classify_images(&self, prompt: &str, images: &[PageImage]) -> Result<Value>;
}

/// One rendered document page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageImage {
    pub page_number: usize,
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Renders PDF pages to images for the vision path.
#[async_trait]
pub trait PageRasterizer: Send + Sync {
    /// Returns at most `max_pages` images, first page first.
    async fn rasterize(&self, pdf_bytes: &[u8], max_pages: usize) -> Result<Vec<PageImage>>;
}
