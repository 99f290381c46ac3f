//! Status command - Inspect or wait on a job
//!
//! Usage:
//! ```bash
//! ocr status <job-id>
//! ocr status <job-id> --wait --output result.json
//! ```

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use std::time::Duration;

use super::{check, endpoint, DEFAULT_URL};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);

/// Arguments for the status command
#[derive(Args)]
pub struct StatusArgs {
    /// Job identifier returned by `ocr submit`
    #[arg(value_name = "JOB_ID")]
    job_id: String,

    /// Base URL of the OCR API
    #[arg(long, env = "OCR_API_URL", default_value = DEFAULT_URL)]
    url: String,

    /// Poll until the job finishes or fails
    #[arg(long)]
    wait: bool,

    /// Seconds between polls when waiting
    #[arg(long, default_value_t = 2)]
    interval: u64,

    /// Write the raw status response to a file
    #[arg(long, short = 'o', value_name = "FILE")]
    output: Option<PathBuf>,
}

/// Run the status command
pub async fn run(args: StatusArgs) -> Result<()> {
    let client = reqwest::Client::new();

    let body = if args.wait {
        wait(&client, &args.url, &args.job_id, Duration::from_secs(args.interval.max(1))).await?
    } else {
        fetch(&client, &args.url, &args.job_id).await?
    };

    print_status(&body);

    if let Some(path) = args.output {
        let json = serde_json::to_string_pretty(&body)?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        crate::print_info(&format!("Response written to: {}", path.display()));
    }

    Ok(())
}

pub async fn fetch(client: &reqwest::Client, base: &str, job_id: &str) -> Result<serde_json::Value> {
    let url = endpoint(base, &format!("/jobs/{}", job_id));
    let response = client
        .get(&url)
        .send()
        .await
        .with_context(|| format!("Failed to reach {}", url))?;

    check(response)
        .await?
        .json()
        .await
        .context("Malformed status response")
}

/// `queued` and `started` are the only states that can still change
pub fn is_settled(body: &serde_json::Value) -> bool {
    !matches!(body["status"].as_str(), Some("queued") | Some("started"))
}

/// Poll until the job leaves the queued/started states
pub async fn wait(
    client: &reqwest::Client,
    base: &str,
    job_id: &str,
    interval: Duration,
) -> Result<serde_json::Value> {
    loop {
        let body = fetch(client, base, job_id).await?;
        if is_settled(&body) {
            return Ok(body);
        }
        tracing::debug!(job_id, status = ?body["status"], "Job still pending");
        tokio::time::sleep(interval).await;
    }
}

pub fn print_status(body: &serde_json::Value) {
    let status = body["status"].as_str().unwrap_or("unknown");
    let label = match status {
        "finished" => status.green().bold(),
        "failed" => status.red().bold(),
        "not_found" => status.yellow().bold(),
        _ => status.cyan().bold(),
    };
    println!("  {} {}", "Status:".bold(), label);

    if let Some(pages) = body["result"]["pages"].as_u64() {
        println!("  {} {}", "Pages:".bold(), pages);
    }
    if let Some(error) = body["error"].as_str() {
        crate::print_error(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_is_settled() {
        assert!(!is_settled(&json!({ "status": "queued", "result": null })));
        assert!(!is_settled(&json!({ "status": "started", "result": null })));
        assert!(is_settled(&json!({ "status": "finished", "result": { "pages": 1 } })));
        assert!(is_settled(&json!({ "status": "failed", "result": null, "error": "boom" })));
        assert!(is_settled(&json!({ "status": "not_found", "result": null })));
    }
}
