//! Credential Pool Demo CLI
//!
//! Command-line interface for registering API keys and exercising the
//! rotation engine against a JSON state file.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use credpool_lib::rotation::RotationStrategy;
use credpool_lib::{CredentialId, Service};

mod commands;
mod ui;

#[derive(Parser)]
#[command(name = "credpool-demo")]
#[command(about = "Credential Pool Demo CLI - rotate rate-limited API keys", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Custom storage directory (can also be set via CREDPOOL_DEMO_DIR env var)
    #[arg(long, global = true, env = "CREDPOOL_DEMO_DIR")]
    storage_dir: Option<String>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Preset {
    Default,
    Strict,
    Relaxed,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a pool configuration file
    InitConfig {
        /// Configuration preset
        #[arg(short, long, value_enum, default_value = "default")]
        preset: Preset,

        /// Overwrite an existing file without asking
        #[arg(long)]
        force: bool,
    },

    /// Register an API key
    Register {
        /// Service the key belongs to (openrouter, serpapi, jina, firecrawl, tavily, exa)
        service: Service,

        /// Display name
        #[arg(short, long)]
        name: String,

        /// Reference to the secret in your secret manager
        #[arg(short, long)]
        secret_ref: String,

        /// Requests allowed per window (defaults to the service's free tier)
        #[arg(short, long)]
        limit: Option<u32>,

        /// Window length: hourly, daily, weekly, monthly or a number of seconds
        #[arg(short, long)]
        period: Option<String>,
    },

    /// List registered keys
    List {
        /// Only keys of this service
        #[arg(short, long)]
        service: Option<Service>,
    },

    /// Exclude a key from rotation
    Disable {
        /// Credential id
        id: CredentialId,
    },

    /// Return a disabled key to rotation
    Enable {
        /// Credential id
        id: CredentialId,
    },

    /// Drive synthetic traffic through the pool
    Simulate {
        /// Service to request keys for
        service: Service,

        /// Number of requests
        #[arg(short, long, default_value = "100")]
        requests: u32,

        /// Fraction of calls that fail with a server error
        #[arg(long, default_value = "0.05")]
        failure_rate: f64,

        /// Fraction of calls the provider throttles (HTTP 429)
        #[arg(long, default_value = "0.02")]
        throttle_rate: f64,

        /// Seed for reproducible runs
        #[arg(long)]
        seed: Option<u64>,

        /// Key ordering for this run (priority-based, round-robin, least-recently-used, health-aware)
        #[arg(long)]
        strategy: Option<RotationStrategy>,
    },

    /// Print the rotation report
    Report {
        /// Write the report to a file instead of stdout
        #[arg(short, long)]
        output: Option<String>,

        /// Print the usage and forecast report instead
        #[arg(long)]
        usage: bool,
    },

    /// Show quota and health status
    Status {
        /// Only this credential
        id: Option<CredentialId>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("credpool_demo_cli=debug,credpool_lib=debug")
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("credpool_demo_cli=info,credpool_lib=warn")
            .with_writer(std::io::stderr)
            .init();
    }

    // Setup storage directory
    let storage_dir = if let Some(dir) = cli.storage_dir {
        std::path::PathBuf::from(dir)
    } else {
        dirs::data_local_dir()
            .unwrap_or_else(|| std::path::PathBuf::from("."))
            .join("credpool-demo")
    };

    // Dispatch commands
    match cli.command {
        Commands::InitConfig { preset, force } => {
            let config = match preset {
                Preset::Default => credpool_lib::config::PoolConfig::default(),
                Preset::Strict => credpool_lib::config::PoolConfig::strict(),
                Preset::Relaxed => credpool_lib::config::PoolConfig::relaxed(),
            };
            commands::config::init(&storage_dir, config, force, cli.verbose).await?;
        }
        Commands::Register {
            service,
            name,
            secret_ref,
            limit,
            period,
        } => {
            commands::keys::register(
                &storage_dir,
                service,
                &name,
                &secret_ref,
                limit,
                period.as_deref(),
                cli.verbose,
            )
            .await?;
        }
        Commands::List { service } => {
            commands::keys::list(&storage_dir, service, cli.verbose).await?;
        }
        Commands::Disable { id } => {
            commands::keys::set_enabled(&storage_dir, &id, false, cli.verbose).await?;
        }
        Commands::Enable { id } => {
            commands::keys::set_enabled(&storage_dir, &id, true, cli.verbose).await?;
        }
        Commands::Simulate {
            service,
            requests,
            failure_rate,
            throttle_rate,
            seed,
            strategy,
        } => {
            let traffic = commands::simulate::Traffic {
                requests,
                failure_rate,
                throttle_rate,
                seed,
                strategy,
            };
            commands::simulate::run(&storage_dir, service, traffic, cli.verbose).await?;
        }
        Commands::Report { output, usage } => {
            commands::report::run(&storage_dir, output.as_deref(), usage, cli.verbose).await?;
        }
        Commands::Status { id, json } => {
            commands::status::run(&storage_dir, id, json, cli.verbose).await?;
        }
    }

    Ok(())
}
