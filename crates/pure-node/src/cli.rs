use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Pure - dBFT devnet node and utilities
#[derive(Parser)]
#[command(name = "pure")]
#[command(about = "Pure devnet node and utilities")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run an in-process devnet
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = "devnet.json")]
        config: PathBuf,
    },

    /// Initialize a new devnet configuration
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "devnet.json")]
        output: PathBuf,

        /// Number of validators to generate keys for
        #[arg(long, default_value_t = 4)]
        validators: usize,
    },

    /// Generate a new keypair
    Keygen {
        /// Output file for secret key
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_init() {
        let cli = Cli::try_parse_from(["pure", "init", "--validators", "7"]).unwrap();
        match cli.command {
            Commands::Init { output, validators } => {
                assert_eq!(validators, 7);
                assert_eq!(output, PathBuf::from("devnet.json"));
            }
            _ => panic!("expected init"),
        }
    }
}
