//! Agent City CLI.
//!
//! Commands:
//! - negotiate: Build a city and run a developer/resident negotiation
//! - city: Generate and display a city map

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use agent_city::chat_client::{ChatClient, DEFAULT_BASE_URL, DEFAULT_MODEL};
use agent_city::city::{CityGenConfig, LlmCityBuilder, ProceduralCityBuilder};
use agent_city::heuristic::{HeuristicConfig, HeuristicOracle};
use agent_city::llm_oracle::{LlmOracle, LlmOracleConfig};
use agent_city::render::{legend, to_emoji, ConsolePresenter};
use agent_city::results::{timestamped_path, NegotiationRecord};
use negotiation_kernel::{
    count_by_terrain, validate_grid, CityBuilder, NegotiationConfig, NegotiationOrchestrator,
    Oracle, ProposalAnchor, ValidationMode,
};

#[derive(Parser)]
#[command(name = "agent-city")]
#[command(version)]
#[command(about = "Developer vs. residents housing negotiation")]
struct Cli {
    /// Chat completions server (OpenAI-compatible)
    #[arg(long = "llm-host", env = "OPENAI_BASE_URL", default_value = DEFAULT_BASE_URL)]
    llm_host: String,

    /// API key sent as a bearer token
    #[arg(long = "api-key", env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Model name for every agent
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a negotiation
    Negotiate {
        /// Use the procedural city and heuristic agents instead of an LLM
        #[arg(long)]
        offline: bool,

        /// JSON file with negotiation settings; flags below override it
        #[arg(long)]
        config: Option<PathBuf>,

        /// Maximum rounds
        #[arg(long)]
        rounds: Option<usize>,

        /// Reject proposals covering forest, river or houses
        #[arg(long)]
        strict: bool,

        /// Grid proposals are drawn onto: base or current
        #[arg(long)]
        anchor: Option<String>,

        /// Per-call oracle timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Random seed for the procedural city
        #[arg(long)]
        seed: Option<u64>,

        /// Save a run record (a timestamp is added to the file name)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Generate and display a city map
    City {
        /// Ask the LLM for the map instead of generating one
        #[arg(long)]
        llm: bool,

        /// Random seed for the procedural city
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging; RUST_LOG overrides --verbose
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    match cli.command {
        Commands::Negotiate {
            offline,
            config,
            rounds,
            strict,
            anchor,
            timeout_ms,
            seed,
            output,
        } => {
            let mut config = match config {
                Some(path) => NegotiationConfig::from_json_file(&path)
                    .with_context(|| format!("Failed to load {}", path.display()))?,
                None => NegotiationConfig::default(),
            };
            if let Some(rounds) = rounds {
                config.max_rounds = rounds;
            }
            if strict {
                config.validation_mode = ValidationMode::Strict;
            }
            if let Some(anchor) = anchor {
                config.anchor = parse_anchor(&anchor)?;
            }
            if timeout_ms.is_some() {
                config.oracle_timeout_ms = timeout_ms;
            }

            let (oracle, city, oracle_name): (Box<dyn Oracle>, Box<dyn CityBuilder>, String) =
                if offline {
                    let city = ProceduralCityBuilder::new(CityGenConfig {
                        dims: config.dims,
                        seed,
                        ..Default::default()
                    });
                    let oracle = HeuristicOracle::new(HeuristicConfig {
                        termination_token: config.termination_token.clone(),
                        ..Default::default()
                    });
                    (Box::new(oracle), Box::new(city), "heuristic".to_string())
                } else {
                    let client = ChatClient::new(&cli.llm_host, cli.api_key);
                    client.ensure_available().await?;
                    let city = LlmCityBuilder::new(client.clone(), cli.model.clone())
                        .with_dims(config.dims);
                    let oracle = LlmOracle::new(
                        client,
                        LlmOracleConfig {
                            model: cli.model.clone(),
                            ..Default::default()
                        },
                    );
                    (Box::new(oracle), Box::new(city), cli.model)
                };

            let presenter = ConsolePresenter::new();
            presenter.heading();

            let started_at = Utc::now();
            let outcome = NegotiationOrchestrator::new(config.clone(), oracle.as_ref())
                .with_presenter(&presenter)
                .run(city.as_ref())
                .await?;

            let record =
                NegotiationRecord::from_outcome(&outcome, &config, oracle_name, seed, started_at);

            println!("\n=== Negotiation Result ===");
            println!("Negotiation: {}", record.negotiation_id);
            println!("Ended by: {}", record.cause);
            println!("Rounds played: {}", record.rounds_played);
            println!(
                "Proposals: {} applied, {} fallbacks",
                record.applied_count(),
                record.fallback_count()
            );
            println!("\nFinal map:");
            println!("{}", to_emoji(&record.final_grid));
            println!("{}", legend());

            if let Some(output) = output {
                let output_path = timestamped_path(&output);
                record.save(&output_path)?;
                println!("\nRecord saved to: {}", output_path.display());
            }
        }

        Commands::City { llm, seed } => {
            let dims = NegotiationConfig::default().dims;
            let raw = if llm {
                let client = ChatClient::new(&cli.llm_host, cli.api_key);
                client.ensure_available().await?;
                LlmCityBuilder::new(client, cli.model)
                    .with_dims(dims)
                    .build_city()
                    .await?
            } else {
                ProceduralCityBuilder::new(CityGenConfig {
                    dims,
                    seed,
                    ..Default::default()
                })
                .generate()
            };
            let grid = validate_grid(&raw, dims).context("City map is malformed")?;
            info!(dims = %dims, "City generated");

            println!("{}", to_emoji(&grid));
            println!("{}", legend());
            println!("\nTerrain counts:");
            for (terrain, count) in count_by_terrain(&grid) {
                println!("  {:<20} {:>4}", terrain.name(), count);
            }
        }
    }

    Ok(())
}

fn parse_anchor(s: &str) -> Result<ProposalAnchor> {
    match s.to_lowercase().as_str() {
        "base" | "base_grid" | "base-grid" => Ok(ProposalAnchor::BaseGrid),
        "current" | "current_grid" | "current-grid" => Ok(ProposalAnchor::CurrentGrid),
        _ => anyhow::bail!("Unknown anchor: {}. Valid: base, current", s),
    }
}
