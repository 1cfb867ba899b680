//! EWA CLI - Command-line interface
//!
//! Usage:
//!   ewa --url <url> [--ner-model <id>] [--kw-model <id>] [--top-n <n>]
//!       [--save-output [--output <path>]] [--config <path>]

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use ewa_core::{AnalysisResult, AppConfig, LoggingConfig};
use ewa_pipeline::{Analyzer, RunOptions};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ewa")]
#[command(about = "Extracts PER-LOC-ORG entities and keywords from a web page")]
#[command(version)]
struct Cli {
    /// URL to extract entities and keywords from
    #[arg(long)]
    url: String,

    /// Hub model for named-entity recognition (chosen by language if omitted)
    #[arg(long)]
    ner_model: Option<String>,

    /// Hub embedding model for keyword extraction (chosen by language if omitted)
    #[arg(long)]
    kw_model: Option<String>,

    /// Number of keywords to return [default: keyword.top_n, 10]
    #[arg(long)]
    top_n: Option<usize>,

    /// Write the result to the output file
    #[arg(long)]
    save_output: bool,

    /// Output file for --save-output
    #[arg(long, default_value = "output.json")]
    output: PathBuf,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn run_options(&self) -> RunOptions {
        RunOptions {
            entity_model: self.ner_model.clone(),
            keyword_model: self.kw_model.clone(),
            top_n: self.top_n,
        }
    }
}

fn init_tracing(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    // stdout carries the result
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    if config.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn save_output(result: &AnalysisResult, path: &Path) -> anyhow::Result<()> {
    let json = result.to_pretty_json()?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write output to {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    init_tracing(&config.logging);

    let analyzer = Analyzer::from_config(&config)?;
    let run = analyzer.run_url(&cli.url, &cli.run_options()).await?;

    tracing::info!(
        url = %cli.url,
        language = run.language.map(|l| l.as_str()).unwrap_or("-"),
        entity_model = %run.selection.entity_model,
        keyword_model = %run.selection.keyword_model,
        "Analysis finished"
    );

    println!("{}", run.result.to_pretty_json()?);

    if cli.save_output {
        save_output(&run.result, &cli.output)?;
        tracing::info!(path = %cli.output.display(), "Output saved");
    }

    Ok(())
}
