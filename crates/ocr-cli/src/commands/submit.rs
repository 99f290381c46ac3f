//! Submit command - Queue a document for extraction
//!
//! Usage:
//! ```bash
//! ocr submit scan.pdf
//! ocr submit photo.png --wait
//! ```

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Deserialize;
use std::path::PathBuf;

use ocr_queue::{DocumentKind, JobId};

use super::{check, endpoint, status, DEFAULT_URL};

/// Arguments for the submit command
#[derive(Args)]
pub struct SubmitArgs {
    /// Image or PDF to process
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// Base URL of the OCR API
    #[arg(long, env = "OCR_API_URL", default_value = DEFAULT_URL)]
    url: String,

    /// Poll until the job finishes or fails
    #[arg(long)]
    wait: bool,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    job_id: JobId,
}

/// Run the submit command
pub async fn run(args: SubmitArgs) -> Result<()> {
    let bytes = tokio::fs::read(&args.file)
        .await
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let kind = DocumentKind::detect(&bytes);
    let size = bytes.len();

    let client = reqwest::Client::new();
    let url = endpoint(&args.url, "/process_file");
    tracing::debug!(url = %url, kind = kind.as_str(), size, "Submitting document");

    let response = client
        .post(&url)
        .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
        .body(bytes)
        .send()
        .await
        .with_context(|| format!("Failed to reach {}", url))?;
    let submitted: SubmitResponse = check(response)
        .await?
        .json()
        .await
        .context("Malformed submit response")?;

    crate::print_success(&format!(
        "Queued {} ({}, {} bytes)",
        args.file.display(),
        kind.as_str(),
        size
    ));
    println!("  {} {}", "Job ID:".bold(), submitted.job_id);

    if args.wait {
        let job_id = submitted.job_id.to_string();
        let body = status::wait(&client, &args.url, &job_id, status::DEFAULT_INTERVAL).await?;
        status::print_status(&body);
    }

    Ok(())
}
