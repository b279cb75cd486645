mod config;
mod output;
mod targets;

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use engine_logging::{engine_error, engine_info, engine_warn, LogDestination};
use futures_util::StreamExt;
use harvest_engine::{
    load_checkpoint, save_checkpoint, HarvestEngine, PageSummaryNormalizer, RenderBackend,
};
use log::LevelFilter;
use tokio_util::sync::CancellationToken;

use crate::config::RunConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogTarget {
    Terminal,
    File,
    Both,
}

impl From<LogTarget> for LogDestination {
    fn from(target: LogTarget) -> Self {
        match target {
            LogTarget::Terminal => LogDestination::Terminal,
            LogTarget::File => LogDestination::File,
            LogTarget::Both => LogDestination::Both,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "harvest_cli")]
#[command(about = "Politely harvest a batch of web pages and print one JSON line per target")]
struct Cli {
    /// File with one target per line.
    #[arg(long)]
    targets: PathBuf,
    /// RON run configuration.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Host state restored before and saved after the run.
    #[arg(long)]
    checkpoint: Option<PathBuf>,
    #[arg(long)]
    concurrency: Option<usize>,
    /// Attempts per target, the first one included.
    #[arg(long)]
    max_retries: Option<u32>,
    #[arg(long, value_enum, default_value_t = LogTarget::Terminal)]
    log: LogTarget,
    #[arg(long, default_value_t = LevelFilter::Info)]
    log_level: LevelFilter,
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    engine_logging::initialize(cli.log.into(), cli.log_level, cli.log_file.as_deref());

    let run_config = match cli.config.as_deref() {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };
    let mut settings = run_config.into_settings();
    if let Some(concurrency) = cli.concurrency {
        settings.concurrency_limit = concurrency;
    }
    if let Some(max_retries) = cli.max_retries {
        settings.max_retries = max_retries;
    }

    let targets = targets::read_targets(&cli.targets)?;
    let engine = HarvestEngine::new(settings, PageSummaryNormalizer, render_backend().await)
        .context("failed to start harvest engine")?;

    if let Some(path) = cli.checkpoint.as_deref() {
        match load_checkpoint(path) {
            Ok(Some(checkpoint)) => engine.restore(&checkpoint),
            Ok(None) => engine_info!("no checkpoint at {:?}; starting fresh", path),
            Err(err) => engine_warn!("ignoring unreadable checkpoint {:?}: {}", path, err),
        }
    }

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            engine_warn!("interrupt received; finishing in-flight targets");
            on_ctrl_c.cancel();
        }
    });

    let total = targets.len();
    let mut harvested = 0usize;
    let mut stdout = io::stdout().lock();
    let mut results = Box::pin(engine.harvest(targets, cancel));
    while let Some(result) = results.next().await {
        if result.is_harvested() {
            harvested += 1;
        }
        match output::to_json_line(&result) {
            Ok(line) => writeln!(stdout, "{line}")?,
            Err(err) => engine_error!("failed to encode result for {}: {}", result.target(), err),
        }
    }
    stdout.flush()?;
    engine_info!("harvested {} of {} target(s)", harvested, total);

    if let Some(path) = cli.checkpoint.as_deref() {
        let checkpoint = engine.checkpoint().await;
        save_checkpoint(path, &checkpoint)
            .with_context(|| format!("failed to save checkpoint {}", path.display()))?;
    }
    Ok(())
}

#[cfg(feature = "chromium")]
async fn render_backend() -> Option<Arc<dyn RenderBackend>> {
    match harvest_engine::ChromiumBackend::launch().await {
        Ok(backend) => Some(Arc::new(backend)),
        Err(err) => {
            engine_warn!("chromium unavailable, rendered fetches will fail: {}", err);
            None
        }
    }
}

#[cfg(not(feature = "chromium"))]
async fn render_backend() -> Option<Arc<dyn RenderBackend>> {
    None
}
