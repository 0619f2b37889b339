//! Stackless CLI
//!
//! Command-line tools for poking at a namespace.
//!
//! # Commands
//!
//! - `get` - Fetch an entity and print it as JSON
//! - `call` - Call a service method and print its return value
//! - `watch` - Print every pushed update of an entity until interrupted

mod commands;
mod json;
mod profile;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Stackless command-line tools.
#[derive(Parser)]
#[command(name = "stackless")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the namespace profile (JSON)
    #[arg(global = true, short, long)]
    profile: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    /// Abandon requests after this many seconds
    #[arg(global = true, short, long)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch an entity and print it as JSON
    Get {
        /// Entity class id
        class_id: u32,

        /// Primary key
        primary_key: String,
    },

    /// Call a service method and print its return value as JSON
    Call {
        /// Service class id
        class_id: u32,

        /// Primary key of the service
        primary_key: String,

        /// Method id
        method_id: u32,

        /// Arguments, one JSON document each
        args: Vec<String>,
    },

    /// Subscribe to updates of an entity and print each change
    Watch {
        /// Entity class id
        class_id: u32,

        /// Primary key
        primary_key: String,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let timeout = cli.timeout.map(Duration::from_secs);

    match cli.command {
        Commands::Get {
            class_id,
            primary_key,
        } => {
            let path = cli.profile.ok_or("Profile required for get")?;
            let session = profile::Profile::load(&path)?.open(timeout)?;
            commands::get::run(&session, class_id, &primary_key).await?;
        }
        Commands::Call {
            class_id,
            primary_key,
            method_id,
            args,
        } => {
            let path = cli.profile.ok_or("Profile required for call")?;
            let session = profile::Profile::load(&path)?.open(timeout)?;
            commands::call::run(&session, class_id, &primary_key, method_id, &args).await?;
        }
        Commands::Watch {
            class_id,
            primary_key,
        } => {
            let path = cli.profile.ok_or("Profile required for watch")?;
            let session = profile::Profile::load(&path)?.open(timeout)?;
            commands::watch::run(&session, class_id, &primary_key).await?;
        }
        Commands::Version => {
            println!("Stackless CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Stackless client v{}", stackless_client::VERSION);
        }
    }

    Ok(())
}
