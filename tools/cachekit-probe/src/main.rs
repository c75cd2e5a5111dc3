//! Probe harness for the CacheKit offline worker.
//!
//! Installs and activates a worker against a live origin, fetches URLs
//! through it, and reports where each response came from.
//!
//! ## Usage
//!
//! ```bash
//! # Fetch two URLs, then replay them with the network switched off
//! cachekit-probe run --offline-replay /api/feed /index.html
//!
//! # Use a custom origin and cache names
//! cachekit-probe --config worker.json run --navigate /
//!
//! # Print the effective configuration
//! cachekit-probe --config worker.json config
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use cachekit_common::{init_logging, LogConfig, LogFormat};
use cachekit_net::{LoaderConfig, ResourceLoader};

mod probe;

#[derive(Parser)]
#[command(name = "cachekit-probe")]
#[command(about = "Drive the CacheKit worker against a live origin")]
struct Cli {
    /// Worker configuration (JSON). Defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log output format: pretty, compact or json
    #[arg(long, default_value = "pretty", global = true)]
    log_format: LogFormat,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install, activate, and fetch each URL through the worker
    Run {
        /// URLs, absolute or relative to the configured scope
        #[arg(required = true)]
        urls: Vec<String>,
        /// Repeat every request with the network switched off
        #[arg(long)]
        offline_replay: bool,
        /// Send requests as page navigations
        #[arg(long)]
        navigate: bool,
    },

    /// Print the effective configuration as JSON
    Config,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::debug()
    } else {
        LogConfig::default()
    };
    init_logging(log_config.with_format(cli.log_format));

    let config = probe::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            urls,
            offline_replay,
            navigate,
        } => {
            let loader = ResourceLoader::new(LoaderConfig::default())?;
            let options = probe::ProbeOptions {
                urls,
                navigate,
                offline_replay,
            };

            for line in probe::run(config, loader, &options).await? {
                println!("{}", serde_json::to_string(&line)?);
            }
        }

        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
