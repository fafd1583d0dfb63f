use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use sample_models::prelude::*;
use tracing_subscriber::EnvFilter;

/// Generate ONNX sample models and print their golden vectors.
#[derive(Parser, Debug)]
#[command(name = "sample-models", version, about)]
struct Cli {
    /// What to run over every model
    #[arg(long, value_enum)]
    action: Action,

    /// JSON configuration file (defaults apply when omitted)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Action {
    /// Export every model into the output directory
    Generate,
    /// Run every model on its sample input and print the transcript
    Test,
    /// Run the exported artifacts and compare against the transcripts
    Check,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => HarnessConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => HarnessConfig::default(),
    };
    let harness = Harness::builder().config(config).build()?;

    match cli.action {
        Action::Generate => finish(harness.generate()),
        Action::Test => finish(harness.test()),
        Action::Check => {
            let summary = harness.check();
            println!("{summary}");
            if !summary.all_passed() {
                bail!("{} of {} golden checks failed", summary.failed, summary.total);
            }
            Ok(())
        }
    }
}

/// Print what succeeded, then every failure, and fail if there were any.
fn finish<T: std::fmt::Display>(report: RunReport<T>) -> Result<()> {
    print!("{report}");
    for failure in &report.failures {
        eprintln!("error: {failure}");
    }
    if !report.is_success() {
        bail!("{} of {} models failed", report.failures.len(), ModelKind::ALL.len());
    }
    Ok(())
}
