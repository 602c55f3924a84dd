use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod cli;
mod config;
mod node;
mod txgen;

use cli::{Cli, Commands};
use config::{generate_sample_config, NodeConfig};
use node::Devnet;

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG overrides the default level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => {
            run_devnet(&config).await?;
        }
        Commands::Init { output, validators } => {
            init_config(&output, validators)?;
        }
        Commands::Keygen { output } => {
            generate_keypair(output)?;
        }
    }

    Ok(())
}

/// Run a devnet
async fn run_devnet(config_path: &Path) -> Result<()> {
    info!("Loading configuration from {:?}", config_path);

    let config = if config_path.exists() {
        NodeConfig::load(config_path)?
    } else {
        error!(
            "Configuration file not found: {:?}. Run 'pure init' to create one.",
            config_path
        );
        return Err(anyhow::anyhow!("Configuration file not found"));
    };

    let devnet = Devnet::new(config)?;
    devnet.run().await?;

    Ok(())
}

/// Initialize a new configuration file
fn init_config(output: &Path, validators: usize) -> Result<()> {
    info!("Generating devnet configuration with {} validators", validators);

    let config = generate_sample_config(validators);
    config.save(output)?;

    println!("\nConfiguration file created: {}", output.display());
    println!("Edit the file to customize the devnet.");
    println!("\nTo start the devnet, run:");
    println!("  pure run --config {}", output.display());

    Ok(())
}

/// Generate a new keypair
fn generate_keypair(output: Option<PathBuf>) -> Result<()> {
    let keypair = pure_core::KeyPair::generate();

    println!("Generated new keypair:");
    println!("  Public key:  {}", keypair.public.to_hex());
    println!("  Secret key:  {}", keypair.secret.to_hex());
    println!("  Address:     {}", keypair.public.script_hash());

    if let Some(path) = output {
        std::fs::write(&path, keypair.secret.to_hex())?;
        info!("Secret key saved to {:?}", path);
    }

    println!("\nWARNING: Keep your secret key safe! Do not share it with anyone.");

    Ok(())
}
