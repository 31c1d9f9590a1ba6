mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use testsql::config::{self, ConfigBuilder, ConfigInput, DockerArgs, PostgresArgs};
use testsql::constants::CONFIG_FILENAME;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(long, default_value = CONFIG_FILENAME, global = true)]
    config_file: String,

    /// Enable verbose output (info level)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Suppress all non-essential output (error level only)
    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    /// Enable debug output (debug level)
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Parser, Debug, Default)]
struct ServiceArgs {
    #[command(flatten)]
    postgres_args: PostgresArgs,

    #[command(flatten)]
    docker_args: DockerArgs,
}

impl From<&ServiceArgs> for ConfigInput {
    fn from(args: &ServiceArgs) -> Self {
        ConfigInput {
            postgres: Some(args.postgres_args.clone().into()),
            retry: None,
            docker: Some(args.docker_args.clone().into()),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start the database, print its connection string and keep it running
    /// until interrupted
    Up(ServiceArgs),

    /// Show the effective configuration
    Config(ServiceArgs),

    /// Check that the Docker daemon can be reached
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    initialize_logging(&cli);
    run_main(cli).await
}

async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn initialize_logging(cli: &Cli) {
    let level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else if cli.quiet {
        "error"
    } else {
        "warn" // default level
    };

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(level)
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_config(config_file: &str, args: &ServiceArgs) -> Result<config::Config> {
    let file_config = config::load_config(config_file)?;

    ConfigBuilder::new()
        .with_file(file_config)
        .with_cli_args(args.into())
        .resolve()
}

async fn run_main(cli: Cli) -> Result<()> {
    match &cli.command {
        Commands::Up(args) => {
            let config = resolve_config(&cli.config_file, args)?;
            commands::cmd_up(&config, wait_for_shutdown_signal()).await
        }
        Commands::Config(args) => {
            let config = resolve_config(&cli.config_file, args)?;
            commands::cmd_config(&config).await
        }
        Commands::Doctor => commands::cmd_doctor().await,
    }
}
