//! Archive Discovery CLI
//!
//! Runs one conversion over a project archive and writes the result as JSON.

use clap::Parser;
use jpk_bridge::{Converter, EngineConfig, Severity};
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "jpk-discover")]
#[command(about = "Discover schemas and convert transformations in a project archive")]
struct Cli {
    /// Project archive (.jpk / .zip) or an unpacked copy of one
    archive: PathBuf,

    /// Config file to load (optional)
    #[arg(short, long)]
    config: Option<String>,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Single-line JSON
    #[arg(long)]
    compact: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = EngineConfig::load_from(cli.config.as_deref())?;
    let output = Converter::new(config).convert_path(&cli.archive)?;

    let json = if cli.compact {
        serde_json::to_string(&output)?
    } else {
        serde_json::to_string_pretty(&output)?
    };
    match &cli.output {
        Some(path) => fs::write(path, json)?,
        None => println!("{}", json),
    }

    eprintln!(
        "{} transformation(s), {} schema(s)",
        output.transformations.len(),
        output.schemas.len()
    );
    if output.diagnostics.is_empty() {
        eprintln!("No items need review");
    } else {
        for item in &output.diagnostics {
            let mark = match item.severity() {
                Severity::Error => "❌",
                Severity::Warning => "⚠️ ",
                Severity::Info => "ℹ️ ",
            };
            eprintln!("  {} {}", mark, item);
        }
        eprintln!(
            "\n{} error(s), {} warning(s) need review",
            output.diagnostics.error_count(),
            output.diagnostics.warning_count()
        );
    }

    Ok(())
}
