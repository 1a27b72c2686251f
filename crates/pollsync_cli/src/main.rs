//! pollsync CLI
//!
//! Command-line tools for exercising pollsync connections.
//!
//! # Commands
//!
//! - `simulate` - Drive a lossy client against a connection and report delivery

mod commands;

use clap::{Parser, Subcommand};
use commands::simulate::SimulateOptions;
use tracing_subscriber::EnvFilter;

/// pollsync command-line tools.
#[derive(Parser)]
#[command(name = "pollsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive a simulated lossy client against a connection
    Simulate {
        /// Number of requests to send
        #[arg(short, long, default_value = "1000")]
        requests: usize,

        /// Probability that a response is lost
        #[arg(short, long, default_value = "0.2")]
        loss_rate: f64,

        /// Change the request body every N requests (0 = never)
        #[arg(short, long, default_value = "10")]
        change_every: usize,

        /// Seed for the loss pattern
        #[arg(short, long, default_value = "0")]
        seed: u64,

        /// Maximum buffered responses (unbounded if omitted)
        #[arg(short, long)]
        max_buffered: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("trace")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Simulate {
            requests,
            loss_rate,
            change_every,
            seed,
            max_buffered,
            format,
        } => {
            let options = SimulateOptions {
                requests,
                loss_rate,
                change_every,
                seed,
                max_buffered,
            };
            commands::simulate::run(&options, &format)?;
        }
        Commands::Version => {
            println!("pollsync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("pollsync conn v{}", pollsync_conn::VERSION);
        }
    }

    Ok(())
}
