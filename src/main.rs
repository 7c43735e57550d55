//! fulldump CLI - main entry point
//!
//! Discovers the account's channels, then dumps every selected channel's
//! full history while drawing a live dashboard on stdout.

use anyhow::{bail, Context};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fulldump::discovery::{discover, AcceptAll, GuildSelector, PromptSelector};
use fulldump::{
    metrics, Config, DumpSettings, Dumper, HttpChatApi, OutputFormat, OutputLayout, StatusBoard,
};

#[derive(Parser)]
#[command(name = "fulldump")]
#[command(about = "Dump the full message history of every channel you can read", long_about = None)]
#[command(version)]
struct Cli {
    /// Account token sent in the authorization header
    #[arg(short, long, env = "DISCORD_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Maximum number of channels dumped at once
    #[arg(short, long)]
    concurrent: Option<usize>,

    /// Output format: text, json or log
    #[arg(short, long)]
    format: Option<OutputFormat>,

    /// Folder name for this dump (defaults to your username)
    #[arg(short, long)]
    name: Option<String>,

    /// Output directory, relative paths resolve against the working directory
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Dump every guild without asking
    #[arg(short, long, default_value_t = false)]
    yes: bool,

    /// Path to a YAML config file (default: fulldump.yml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to expose Prometheus metrics (e.g., 0.0.0.0:9898)
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env for local development
    let _ = dotenvy::dotenv();

    // Logs go to stderr; stdout belongs to the dashboard
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("fulldump=warn")),
        )
        .init();

    let cli = Cli::parse();

    if let Some(addr) = cli.metrics_addr.as_deref() {
        match addr.parse::<SocketAddr>() {
            Ok(socket) => metrics::spawn_metrics_server(socket),
            Err(err) => warn!(%addr, "Invalid metrics address: {}", err),
        }
    }

    metrics::record_command_start("dump");
    let start = Instant::now();

    let result = run(cli).await;

    metrics::record_command_result("dump", start.elapsed(), result.is_ok());

    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => Config::new(),
    };

    let token = match cli.token.filter(|t| !t.trim().is_empty()) {
        Some(token) => token,
        None if !config.token.is_empty() => config.token.clone(),
        None => bail!("No token given: pass --token or set DISCORD_TOKEN"),
    };
    let api = Arc::new(HttpChatApi::with_base_url(token, config.api_base_url.clone())?);

    let mut selector: Box<dyn GuildSelector> = if cli.yes {
        Box::new(AcceptAll)
    } else {
        Box::new(PromptSelector::stdio())
    };
    let targets = discover(api.as_ref(), selector.as_mut())
        .await
        .context("Failed to discover channels")?;
    drop(selector);

    let name = cli
        .name
        .or_else(|| config.name.clone())
        .unwrap_or_else(|| targets.me.username.clone());
    let dir = cli.dir.unwrap_or_else(|| config.dir.clone());

    let mut settings = DumpSettings::new(OutputLayout::new(&dir, &name)?);
    settings.concurrency = cli.concurrent.unwrap_or(config.concurrency).max(1);
    settings.format = cli.format.unwrap_or(config.format);
    settings.retry = config.retry_policy();
    settings.throttle = config.throttle;

    info!(
        channels = targets.channels.len(),
        dir = %settings.layout.dump_dir().display(),
        "Channels resolved"
    );

    let board = Arc::new(StatusBoard::new(name, settings.concurrency, settings.throttle));
    let dumper = Dumper::new(api, settings, Arc::clone(&board));

    let summary = tokio::select! {
        summary = dumper.run(targets.channels) => summary,
        _ = tokio::signal::ctrl_c() => {
            board.finish()?;
            bail!("Interrupted");
        }
    };
    board.finish()?;

    for (channel, err) in summary.failures() {
        warn!(channel = %channel.name, "Channel not fully dumped: {}", err);
    }
    println!(
        "Dumped {} channels ({} messages, {} empty, {} failed) to {}",
        summary.written(),
        summary.messages(),
        summary.empty(),
        summary.failed(),
        dumper.settings().layout.dump_dir().display()
    );

    Ok(())
}
