//! Text extraction capability
//!
//! The queue treats extraction as an opaque, possibly slow call. Anything
//! implementing [`Extractor`] can be plugged into the worker pool:
//! - [`HttpExtractor`] forwards documents to an external OCR service
//! - [`MockExtractor`] returns canned pages for tests and local runs

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::job::{Document, DocumentKind};

/// Text extracted from one page (pages numbered from 1)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageText {
    pub page: u32,
    pub text: String,
}

impl PageText {
    pub fn new(page: u32, text: impl Into<String>) -> Self {
        Self {
            page,
            text: text.into(),
        }
    }
}

/// Client-facing result of a finished job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub pages: usize,
    pub content: Vec<PageText>,
}

impl ExtractionResult {
    /// Order pages, trim text, and check numbering is exactly `1..=n`.
    pub fn from_pages(mut pages: Vec<PageText>) -> Result<Self, ExtractionError> {
        if pages.is_empty() {
            return Err(ExtractionError::InvalidOutput("no pages extracted".into()));
        }
        pages.sort_by_key(|p| p.page);
        for (idx, page) in pages.iter_mut().enumerate() {
            if page.page as usize != idx + 1 {
                return Err(ExtractionError::InvalidOutput(format!(
                    "expected page {}, got {}",
                    idx + 1,
                    page.page
                )));
            }
            page.text = page.text.trim().to_string();
        }

        Ok(Self {
            pages: pages.len(),
            content: pages,
        })
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ExtractionError {
    #[error("Unsupported document: {0}")]
    UnsupportedDocument(String),
    #[error("Extraction service unavailable: {0}")]
    Unavailable(String),
    #[error("Extraction failed: {0}")]
    Failed(String),
    #[error("Invalid extraction output: {0}")]
    InvalidOutput(String),
}

#[async_trait]
pub trait Extractor: Send + Sync {
    fn name(&self) -> &str;

    /// Extract page-ordered text from a document
    async fn extract(&self, document: &Document) -> Result<Vec<PageText>, ExtractionError>;
}

/// Response body of the external OCR service
#[derive(Debug, Deserialize)]
struct HttpExtractResponse {
    pages: Vec<PageText>,
}

/// Forwards documents to an external OCR service over HTTP
#[derive(Debug, Clone)]
pub struct HttpExtractor {
    base_url: String,
    client: reqwest::Client,
}

impl HttpExtractor {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/extract", self.base_url)
    }
}

#[async_trait]
impl Extractor for HttpExtractor {
    fn name(&self) -> &str {
        "http"
    }

    async fn extract(&self, document: &Document) -> Result<Vec<PageText>, ExtractionError> {
        let response = self
            .client
            .post(self.endpoint())
            .header("X-Document-Kind", document.kind.as_str())
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(document.bytes.clone())
            .send()
            .await
            .map_err(|e| ExtractionError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::UnsupportedDocument(body));
        }
        if !status.is_success() {
            return Err(ExtractionError::Failed(format!("Status: {}", status)));
        }

        let body: HttpExtractResponse = response
            .json()
            .await
            .map_err(|e| ExtractionError::InvalidOutput(e.to_string()))?;

        Ok(body.pages)
    }
}

/// Deterministic extractor for tests and development
#[derive(Debug)]
pub struct MockExtractor {
    pdf_pages: u32,
    latency: Duration,
    /// Number of leading calls that fail (u32::MAX = always)
    fail_first: u32,
    calls: AtomicU32,
}

impl Default for MockExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockExtractor {
    pub fn new() -> Self {
        Self {
            pdf_pages: 1,
            latency: Duration::ZERO,
            fail_first: 0,
            calls: AtomicU32::new(0),
        }
    }

    /// Pages produced for PDF documents
    pub fn with_pdf_pages(mut self, pages: u32) -> Self {
        self.pdf_pages = pages.max(1);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail the first `n` calls, then succeed
    pub fn failing_first(mut self, n: u32) -> Self {
        self.fail_first = n;
        self
    }

    pub fn always_failing() -> Self {
        Self::new().failing_first(u32::MAX)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Extractor for MockExtractor {
    fn name(&self) -> &str {
        "mock"
    }

    async fn extract(&self, document: &Document) -> Result<Vec<PageText>, ExtractionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if call < self.fail_first {
            return Err(ExtractionError::Failed(format!(
                "mock failure on call {}",
                call + 1
            )));
        }

        let pages = match document.kind {
            DocumentKind::Image => 1,
            DocumentKind::Pdf => self.pdf_pages,
        };

        Ok((1..=pages)
            .map(|page| {
                PageText::new(
                    page,
                    format!(" Page {} of {} bytes \n", page, document.bytes.len()),
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_orders_and_trims_pages() {
        let result = ExtractionResult::from_pages(vec![
            PageText::new(2, "  second\n"),
            PageText::new(1, "first"),
        ])
        .unwrap();

        assert_eq!(result.pages, 2);
        assert_eq!(result.content[0], PageText::new(1, "first"));
        assert_eq!(result.content[1], PageText::new(2, "second"));
    }

    #[test]
    fn test_result_rejects_gaps_and_empty_output() {
        assert!(ExtractionResult::from_pages(vec![]).is_err());
        assert!(ExtractionResult::from_pages(vec![
            PageText::new(1, "a"),
            PageText::new(3, "c"),
        ])
        .is_err());
        assert!(ExtractionResult::from_pages(vec![PageText::new(0, "zero")]).is_err());
    }

    #[test]
    fn test_result_serialization_shape() {
        let result = ExtractionResult::from_pages(vec![PageText::new(1, "hi")]).unwrap();
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["pages"], 1);
        assert_eq!(json["content"][0]["page"], 1);
        assert_eq!(json["content"][0]["text"], "hi");
    }

    #[tokio::test]
    async fn test_mock_extractor_page_counts() {
        let mock = MockExtractor::new().with_pdf_pages(3);

        let image = mock.extract(&Document::new(b"\x89PNG".to_vec())).await.unwrap();
        assert_eq!(image.len(), 1);

        let pdf = mock.extract(&Document::new(b"%PDF-1.4".to_vec())).await.unwrap();
        let numbers: Vec<u32> = pdf.iter().map(|p| p.page).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn test_mock_extractor_fails_first_calls() {
        let mock = MockExtractor::new().failing_first(2);
        let doc = Document::new(b"img".to_vec());

        assert!(mock.extract(&doc).await.is_err());
        assert!(mock.extract(&doc).await.is_err());
        assert!(mock.extract(&doc).await.is_ok());
    }

    #[test]
    fn test_http_extractor_endpoint() {
        let extractor = HttpExtractor::new("http://ocr.local:9000/");
        assert_eq!(extractor.endpoint(), "http://ocr.local:9000/extract");
    }
}
