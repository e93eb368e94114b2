//! yunovisor agent daemon.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use yunovisor::{Agent, AgentConfig, Subscribe};

/// yunovisor - per-host agent supervising yuno processes
#[derive(Parser, Debug)]
#[command(name = "yunovisor")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the agent configuration (JSON); defaults apply when absent
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(args: &Args) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if args.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args);

    let cfg = match &args.config {
        Some(path) => AgentConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => AgentConfig::default(),
    };
    info!(
        work_dir = %cfg.work_dir.display(),
        agent_url = %cfg.agent_url,
        signal2kill = %cfg.signal2kill,
        "starting agent"
    );

    let mut subscribers: Vec<Arc<dyn Subscribe>> = Vec::new();
    #[cfg(feature = "logging")]
    subscribers.push(Arc::new(yunovisor::LogWriter::new()));

    let agent = Agent::builder(cfg)
        .with_subscribers(subscribers)
        .build()
        .context("building agent")?;
    agent.serve().await.context("agent stopped with an error")?;
    Ok(())
}
