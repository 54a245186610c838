//! Signal execution bot entry point.
//!
//! Reads one JSON signal per line from a file or stdin and runs each through
//! the risk gate and bracket executor until Ctrl-C.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::AsyncRead;
use tracing::info;

use sigex_bot::config::DEFAULT_CONFIG_PATH;
use sigex_bot::{AppConfig, Application};

/// Risk-gated bracket order execution bot
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via SIGEX_CONFIG env var)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Newline-delimited JSON signals. Reads stdin when omitted or "-".
    #[arg(short, long)]
    signals: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // CLI arg > SIGEX_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var_os("SIGEX_CONFIG").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    let config = AppConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    if args.print_config {
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    sigex_telemetry::init_logging(&config.runtime.log_filter)?;
    info!(
        config_path = %config_path.display(),
        mode = ?config.execution.mode,
        "Starting sigex bot v{}",
        env!("CARGO_PKG_VERSION")
    );

    let input: Box<dyn AsyncRead + Unpin + Send> = match args.signals {
        Some(path) if path.as_os_str() != "-" => {
            info!(path = %path.display(), "Reading signals from file");
            Box::new(
                tokio::fs::File::open(&path)
                    .await
                    .with_context(|| format!("opening {}", path.display()))?,
            )
        }
        _ => {
            info!("Reading signals from stdin");
            Box::new(tokio::io::stdin())
        }
    };

    let app = Application::new(config)?;
    app.run(input).await?;

    info!("Shutdown complete");
    Ok(())
}
