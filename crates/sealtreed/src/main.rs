//! sealtreed: sealtree watch daemon
//!
//! Usage:
//!   sealtreed [--config sealtree.toml]
//!
//! Runs one encryption pass at startup, then re-encrypts the source tree
//! after every burst of filesystem changes until SIGINT/SIGTERM.

mod daemon;

use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};

use sealtree_core::config::SealtreeConfig;
use sealtree_core::SealError;

#[derive(Parser, Debug)]
#[command(name = "sealtreed", version, about = "sealtree watch daemon")]
struct Cli {
    /// Path to sealtree.toml configuration file
    #[arg(long, short = 'c', env = "SEALTREE_CONFIG", default_value = "sealtree.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides [log].level
    #[arg(long, env = "SEALTREE_LOG")]
    log: Option<String>,

    /// Log format; overrides [log].format
    #[arg(long, env = "SEALTREE_LOG_FORMAT")]
    log_format: Option<LogFormat>,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("sealtreed: {e}");
            return ExitCode::from(2);
        }
    };

    let level = cli.log.as_deref().unwrap_or(&config.log.level);
    let format = cli.log_format.clone().unwrap_or(match config.log.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(level, &format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "sealtreed starting"
    );

    match daemon::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            match e.downcast_ref::<SealError>() {
                Some(SealError::Config(_)) => ExitCode::from(2),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

/// Config file, then `SEALTREE_ITERATIONS` / `SEALTREE_PRUNE` from the environment.
fn load_config(path: &Path) -> Result<SealtreeConfig, SealError> {
    let mut config = SealtreeConfig::load(path)?;
    config.apply_env()?;
    Ok(config)
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }
}
