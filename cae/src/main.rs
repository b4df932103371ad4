//! cae: command-line front end for the Constitutional Alignment Engine.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use cae::state::ChainReport;
use cae::{CaeConfig, CanonicalEvent, ConstitutionalAlignmentEngine, SignPreflight, SignRequest};

#[derive(Parser)]
#[command(name = "cae")]
#[command(about = "Constitutional Alignment Engine: judge agent events against the constitution")]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "CAE_CONFIG", default_value = "cae.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Evaluate a canonical event
    Evaluate {
        /// Event document (JSON)
        event: PathBuf,
    },

    /// Show an agent's public view, creating the default record if absent
    Agent {
        agent_id: String,
    },

    /// Run the transaction-sign preflight
    Preflight {
        /// Sign request document (JSON)
        request: PathBuf,
    },

    /// Check an agent's audit chain in the transition log
    VerifyChain {
        agent_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let config = if cli.config.exists() {
        CaeConfig::load(&cli.config)?
    } else {
        CaeConfig::default()
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .init();

    if !cli.config.exists() {
        info!(path = %cli.config.display(), "Config file not found, using defaults");
    }

    let engine = Arc::new(ConstitutionalAlignmentEngine::from_config(&config)?);

    match cli.command {
        Command::Evaluate { event } => {
            let event: CanonicalEvent = read_json(&event)?;
            print_json(&engine.evaluate(&event).await?)?;
        }
        Command::Agent { agent_id } => {
            let preflight = SignPreflight::new(engine);
            print_json(&preflight.agent_view(&agent_id).await?)?;
        }
        Command::Preflight { request } => {
            let request: SignRequest = read_json(&request)?;
            let preflight = SignPreflight::new(engine);
            print_json(&preflight.check(&request).await?)?;
        }
        Command::VerifyChain { agent_id } => {
            let report = engine.store().verify_chain(&agent_id).await?;
            print_json(&report)?;
            return Ok(ExitCode::from(chain_status(&report)));
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Process status for a chain check: 0 intact, 2 broken.
fn chain_status(report: &ChainReport) -> u8 {
    if report.is_intact() {
        0
    } else {
        2
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
