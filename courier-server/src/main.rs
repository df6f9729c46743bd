//! Courier server entry point.
//!
//! Configuration comes from `COURIER_*` environment variables with CLI
//! overrides layered on top:
//!
//! ```bash
//! # Run with environment configuration
//! courier-server
//!
//! # Override the API port and storage location
//! courier-server --http-port 9090 --data-dir /var/lib/courier
//!
//! # Validate configuration and exit
//! courier-server --validate
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::path::PathBuf;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use courier_core::{Config, ServiceMode, StorageKind};
use courier_server::CourierServer;

/// Courier notification delivery service
#[derive(Parser, Debug)]
#[command(name = "courier-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Service mode: combined, api-only, or pubsub-only
    #[arg(long, value_enum)]
    mode: Option<Mode>,

    /// Override the management API port
    #[arg(long)]
    http_port: Option<u16>,

    /// Override the file-store data directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Use the in-memory store instead of the file store
    #[arg(long)]
    memory: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum Mode {
    Combined,
    ApiOnly,
    PubsubOnly,
}

impl From<Mode> for ServiceMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Combined => Self::Combined,
            Mode::ApiOnly => Self::ApiOnly,
            Mode::PubsubOnly => Self::PubsubOnly,
        }
    }
}

fn load_config(args: &Args) -> Result<Config, courier_core::ConfigError> {
    let mut config = Config::from_env()?;

    if let Some(mode) = args.mode {
        config.service_mode = mode.into();
    }
    if let Some(port) = args.http_port {
        config.http_port = port;
    }
    if let Some(ref data_dir) = args.data_dir {
        config.data_dir.clone_from(data_dir);
    }
    if args.memory {
        config.storage = StorageKind::Memory;
    }
    if args.debug {
        config.log_level = "debug".to_string();
    }

    Ok(config)
}

fn setup_logging(config: &Config) -> Result<(), String> {
    let filter = EnvFilter::try_new(&config.log_level)
        .map_err(|e| format!("invalid log level '{}': {e}", config.log_level))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = setup_logging(&config) {
        eprintln!("{e}");
        std::process::exit(1);
    }

    if args.validate {
        println!("configuration is valid");
        return;
    }

    if let Err(e) = CourierServer::new(config).run().await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }
}
