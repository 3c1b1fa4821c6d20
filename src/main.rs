use std::path::PathBuf;
use std::sync::Arc;
use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod shared;
mod domain;
mod ports;
mod infrastructure;
mod services;

use shared::config::Config;
use infrastructure::git::GitCliClient;
use services::scheduler::SyncScheduler;
use services::setup;
use services::startup::StartupHooks;


#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Parser, Debug)]
#[clap(name = "gitsync")]
#[clap(version = "0.1.0")]
#[clap(about = "Keep local directories in sync with remote git repositories")]
pub struct Args {
    /// Configuration file (TOML)
    #[clap(short, long, value_parser, default_value = "gitsync.toml")]
    config: PathBuf,

    /// Base directory for relative repository paths, overrides `root` in the config file
    #[clap(short, long, value_parser, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Log output format
    #[clap(long, value_enum, default_value = "pretty")]
    log_format: LogFormat,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Pretty => subscriber.pretty().init(),
        LogFormat::Json => subscriber.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    // 加载配置
    let config = Config::from_args_and_file(&args.config, args.root.clone())
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    let root = config.root_dir()?;

    info!("Starting gitsync...");
    info!("Repository root: {}", root.display());

    // 解析并准备所有仓库，任何错误都阻止启动
    let repos = setup::parse(&config, &root).context("invalid repository configuration")?;
    setup::prepare(&repos).context("failed to prepare repository directories")?;

    let git_client = Arc::new(GitCliClient::from_config(&config.git));
    let scheduler = Arc::new(SyncScheduler::new(git_client));

    let mut startup_hooks = StartupHooks::new();
    let count = setup::register(repos, &scheduler, &mut startup_hooks)?;
    if startup_hooks.is_empty() {
        warn!("Nothing to sync, waiting for shutdown");
    }

    // 每个仓库先同步一次，失败则退出
    startup_hooks.run_all().await.context("initial sync failed")?;
    info!("gitsync ready, {} repositories scheduled", count);

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    scheduler.shutdown();

    for (path, state) in scheduler.status() {
        if state.is_healthy() {
            info!("{}: {} attempts, last success {:?}", path.display(), state.attempts, state.last_success);
        } else {
            warn!("{}: {} attempts, last outcome {:?}", path.display(), state.attempts, state.last_outcome);
        }
    }

    Ok(())
}
