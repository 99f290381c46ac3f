//! Subcommands

pub mod markdown;
pub mod status;
pub mod submit;

use anyhow::{bail, Result};

/// Default API location; override with `--url` or `OCR_API_URL`
pub const DEFAULT_URL: &str = "http://localhost:8080";

pub fn endpoint(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

/// Pass successful responses through; turn API errors into readable failures
pub async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body: serde_json::Value = response.json().await.unwrap_or_default();
    let message = body["error"]["message"]
        .as_str()
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed"));
    bail!("API returned {}: {}", status.as_u16(), message)
}
