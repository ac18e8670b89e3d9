//! script-runnerd — entry point.
//!
//! Loads configuration, wires up the job store / log sink / runner, and
//! serves the HTTP adapter. All structured logs go to stderr.

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use script_runner::config::Config;
use script_runner::jobstore::JobStore;
use script_runner::logsink::LogSink;
use script_runner::runner::Runner;

#[derive(Debug, Parser)]
#[command(name = "script-runnerd")]
#[command(about = "Local HTTP control plane for running managed scripts as jobs", long_about = None)]
struct Cli {
    /// Path to the TOML config file (overrides RUNNER_CONFIG / XDG lookup).
    #[arg(long)]
    config: Option<String>,

    /// Address to bind the HTTP server to.
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: String,

    /// Increase log verbosity (-v, -vv); logs go to stderr.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    let store = JobStore::load(config.runner.job_store_file.clone())
        .context("loading job store")?;
    let log_sink = LogSink::new(config.runner.logs_dir.clone());
    let runner = Runner::new(&config, store, log_sink);

    let app = script_runner::http::build_router(runner);

    let listener = tokio::net::TcpListener::bind(&cli.listen)
        .await
        .with_context(|| format!("binding {}", cli.listen))?;
    tracing::info!(addr = %cli.listen, "script-runnerd listening");

    axum::serve(listener, app)
        .await
        .context("serving http")?;
    Ok(())
}
