//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了CLI命令行接口。

use crate::client::CacheCoordinator;
use crate::config::Config;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "tiercache")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[arg(short, long, help = "Path to the TOML configuration file")]
    pub config: PathBuf,

    #[arg(long, help = "Print metrics after the command finishes")]
    pub metrics: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(name = "get", about = "Read a key through both tiers")]
    Get(GetArgs),

    #[command(name = "set", about = "Write a JSON value to both tiers")]
    Set(SetArgs),

    #[command(name = "delete", about = "Delete a key from both tiers and broadcast")]
    Delete(KeyArgs),

    #[command(name = "clear", about = "Clear the cache namespace")]
    Clear(ClearArgs),

    #[command(name = "listen", about = "Run background listeners until Ctrl-C")]
    Listen,

    #[command(name = "metrics", about = "Print cache metrics")]
    Metrics(MetricsArgs),
}

#[derive(Parser, Debug)]
pub struct KeyArgs {
    pub key: String,
}

#[derive(Parser, Debug)]
pub struct GetArgs {
    pub key: String,

    #[arg(short, long, help = "Show tier and remaining TTL")]
    pub verbose: bool,
}

#[derive(Parser, Debug)]
pub struct SetArgs {
    pub key: String,

    #[arg(help = "Value as JSON")]
    pub value: String,

    #[arg(long, help = "TTL in seconds, non-positive means unlimited")]
    pub ttl: Option<i64>,

    #[arg(long, conflicts_with = "ttl", help = "Sliding window in seconds")]
    pub sliding: Option<u64>,
}

#[derive(Parser, Debug)]
pub struct ClearArgs {
    #[arg(long, help = "Only clear the local tier of this process")]
    pub local_only: bool,

    #[arg(short = 'y', long, help = "Skip confirmation")]
    pub yes: bool,
}

#[derive(Parser, Debug)]
pub struct MetricsArgs {
    #[arg(short, long, help = "Output in Prometheus format")]
    pub prometheus: bool,
}

mod clean;
mod listen;
mod metrics;
mod ops;

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    crate::telemetry::init_tracing("tiercache", None);

    let config = Config::from_file(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    let coordinator = CacheCoordinator::from_config(&config)
        .await
        .context("Failed to start cache coordinator")?;

    let outcome = match &cli.command {
        Commands::Get(args) => ops::get(&coordinator, args).await,
        Commands::Set(args) => ops::set(&coordinator, args).await,
        Commands::Delete(args) => ops::delete(&coordinator, args).await,
        Commands::Clear(args) => clean::execute(&coordinator, args).await,
        Commands::Listen => listen::execute(&coordinator, &config).await,
        Commands::Metrics(args) => metrics::execute(&coordinator, args),
    };

    if cli.metrics && !matches!(cli.command, Commands::Metrics(_)) {
        metrics::execute(&coordinator, &MetricsArgs { prometheus: false })?;
    }

    crate::telemetry::shutdown_tracing();
    outcome
}
