//! Markdown command - Render a finished job as Markdown
//!
//! Usage:
//! ```bash
//! ocr markdown result.json
//! ocr markdown result.json -o notes/result.md
//! ```

use anyhow::{Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};

/// Arguments for the markdown command
#[derive(Args)]
pub struct MarkdownArgs {
    /// Status response JSON (as written by `ocr status --output`)
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Markdown destination; defaults to the input path with an `.md` extension
    #[arg(long, short = 'o', value_name = "FILE")]
    output: Option<PathBuf>,
}

/// Run the markdown command
pub fn run(args: MarkdownArgs) -> Result<()> {
    let output = args.output.unwrap_or_else(|| default_output(&args.input));
    convert(&args.input, &output)?;
    crate::print_success(&format!("Markdown written to: {}", output.display()));
    Ok(())
}

pub fn default_output(input: &Path) -> PathBuf {
    input.with_extension("md")
}

/// One `## Page N` section per page of `result.content`
pub fn render(data: &serde_json::Value) -> String {
    let Some(pages) = data["result"]["content"].as_array() else {
        return String::new();
    };

    let mut markdown = String::new();
    for item in pages {
        let page = match &item["page"] {
            serde_json::Value::Null => "N/A".to_string(),
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let text = match &item["text"] {
            serde_json::Value::String(s) => s.trim().to_string(),
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        };
        markdown.push_str(&format!("## Page {}\n{}\n\n", page, text));
    }
    markdown
}

pub fn convert(input: &Path, output: &Path) -> Result<()> {
    let content = std::fs::read_to_string(input)
        .with_context(|| format!("Input file not found: {}", input.display()))?;
    let data: serde_json::Value =
        serde_json::from_str(&content).with_context(|| "Failed to parse OCR JSON")?;

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(output, render(&data))
        .with_context(|| format!("Failed to write {}", output.display()))?;
    Ok(())
}
