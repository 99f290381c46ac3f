//! OCR CLI - Command-line client for the OCR job queue
//!
//! # Usage
//!
//! ```bash
//! # Queue a document
//! ocr submit scan.pdf
//!
//! # Poll until the job settles and keep the response
//! ocr status 6f1c... --wait --output scan.json
//!
//! # Turn a finished response into Markdown
//! ocr markdown scan.json
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;

mod commands;

use commands::{markdown, status, submit};

/// OCR job queue client
#[derive(Parser)]
#[command(
    name = "ocr",
    version,
    about = "OCR CLI - submit documents and fetch extracted text",
    long_about = "Client for the OCR job queue API.\n\n\
                  Documents are processed asynchronously: submit returns a job id,\n\
                  status polls it, markdown renders a finished result."
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a document for extraction
    #[command(name = "submit")]
    Submit(submit::SubmitArgs),

    /// Show the status of a job
    #[command(name = "status")]
    Status(status::StatusArgs),

    /// Convert a status response JSON file to Markdown
    #[command(name = "markdown")]
    Markdown(markdown::MarkdownArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    match cli.command {
        Commands::Submit(args) => submit::run(args).await,
        Commands::Status(args) => status::run(args).await,
        Commands::Markdown(args) => markdown::run(args),
    }
}

/// Setup logging based on verbosity level
fn setup_logging(verbosity: u8) {
    use tracing_subscriber::EnvFilter;

    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();
}

/// Print a success message with a checkmark
pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green().bold(), msg);
}

/// Print an error message with an X
pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red().bold(), msg);
}

/// Print an info message
pub fn print_info(msg: &str) {
    println!("{} {}", "ℹ".blue().bold(), msg);
}
