//! Converter Config CLI
//!
//! View and manage converter configuration.

use clap::{Parser, Subcommand};
use jpk_bridge::EngineConfig;

#[derive(Parser)]
#[command(name = "jpk-config")]
#[command(about = "View and manage converter configuration")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show current configuration
    Show {
        /// Config file to load (optional)
        #[arg(short, long)]
        config: Option<String>,

        /// Output as TOML
        #[arg(long)]
        toml: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Initialize a new config file
    Init {
        /// Output path
        #[arg(short, long, default_value = "jpk-bridge.toml")]
        output: String,
    },

    /// Validate configuration
    Validate {
        /// Config file to validate
        #[arg(short, long)]
        config: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Show { config, toml, json } => {
            let cfg = EngineConfig::load_from(config.as_deref())?;

            if json {
                println!("{}", serde_json::to_string_pretty(&cfg)?);
            } else if toml {
                println!("{}", ::toml::to_string_pretty(&cfg)?);
            } else {
                println!("📋 Converter Configuration\n");
                println!("Layout:");
                println!("  Transformations: {}", cfg.layout.transformation_dir);
                println!("  Unit caches: {}", cfg.layout.unit_cache_dir);
                println!("  Connector caches: {}", cfg.layout.connector_cache_dir);

                println!("\nTranslation:");
                for alias in &cfg.translation.root_aliases {
                    println!("  Alias: {} -> {}", alias.canonical, alias.runtime);
                }
                println!("  Script root: {}", cfg.translation.script_root);
                println!("  Response marker: {}", cfg.translation.response_marker);
                println!(
                    "  Structural positions under: {}",
                    cfg.translation.structural_index_parents.join(", ")
                );

                println!("\nSchemas:");
                println!("  Flat root: {}", cfg.schemas.flat_root);
                println!("  Flat default name: {}", cfg.schemas.flat_default_name);

                println!("\nConnectors:");
                for c in &cfg.connectors {
                    println!(
                        "  {} -> {} {} ({})",
                        c.type_id, c.adapter, c.direction, c.function
                    );
                }

                println!("\nIds:");
                println!("  Namespace: {}", cfg.ids.namespace);
            }
        }

        Commands::Init { output } => {
            let cfg = EngineConfig::default();
            cfg.save(&output)?;
            println!("✅ Created config file: {}", output);
        }

        Commands::Validate { config } => match EngineConfig::load_from(config.as_deref()) {
            Ok(cfg) => match jpk_bridge::IdGenerator::from_namespace(&cfg.ids.namespace) {
                Ok(_) => {
                    println!("✅ Configuration is valid");
                    println!("   Connectors: {}", cfg.connectors.len());
                    println!("   Root aliases: {}", cfg.translation.root_aliases.len());
                }
                Err(e) => {
                    eprintln!("❌ Configuration error: {}", e);
                    std::process::exit(1);
                }
            },
            Err(e) => {
                eprintln!("❌ Configuration error: {}", e);
                std::process::exit(1);
            }
        },
    }

    Ok(())
}
