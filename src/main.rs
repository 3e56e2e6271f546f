// Copyright 2026 Assetwatch Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use assetwatch::config::WatchConfig;
use assetwatch::renderer::chromium::ChromiumFactory;
use assetwatch::rest::{self, AppState};
use assetwatch::scheduler::{LoopScheduler, SystemClock};
use assetwatch::summary::Summarizer;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(
    name = "assetwatch",
    about = "Assetwatch — authenticated dashboard watcher",
    version
)]
struct Cli {
    /// Enable verbose/debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the watch loop and the HTTP surface (default)
    Serve {
        /// Override the HTTP port from the environment
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run exactly one cycle and exit
    RunOnce,
    /// Rebuild the chart digest from the existing history and exit
    Summary,
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional; real deployments set the environment directly.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command.unwrap_or(Commands::Serve { port: None }) {
        Commands::Serve { port } => serve(port).await,
        Commands::RunOnce => run_once().await,
        Commands::Summary => rebuild_summary(),
    }
}

fn init_tracing(verbose: bool) {
    let directive = if verbose {
        "assetwatch=debug"
    } else {
        "assetwatch=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(directive.parse().unwrap()),
        )
        .init();
}

fn build_scheduler(cfg: &WatchConfig) -> Arc<LoopScheduler> {
    Arc::new(LoopScheduler::new(
        cfg,
        Arc::new(ChromiumFactory),
        Arc::new(SystemClock),
    ))
}

async fn serve(port_override: Option<u16>) -> Result<()> {
    let cfg = WatchConfig::from_env()?;
    let port = port_override.unwrap_or(cfg.http_port);

    info!(
        "assetwatch v{} starting: client={} targets={} interval={:?}",
        env!("CARGO_PKG_VERSION"),
        cfg.client,
        cfg.targets.len(),
        cfg.poll_interval
    );

    let scheduler = build_scheduler(&cfg);
    let state = Arc::new(AppState {
        scheduler: Arc::clone(&scheduler),
        store_path: cfg.store_path(),
    });

    let http = tokio::spawn(rest::serve(port, state));
    let loop_handle = Arc::clone(&scheduler).start();

    wait_for_shutdown().await;
    info!("shutdown signal received");
    scheduler.stop();
    loop_handle.await?;
    http.abort();

    info!("assetwatch stopped");
    Ok(())
}

async fn run_once() -> Result<()> {
    let cfg = WatchConfig::from_env()?;
    let scheduler = build_scheduler(&cfg);

    match scheduler.run_cycle_once().await {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Err(e) => {
            error!("cycle failed: {e}");
            std::process::exit(1);
        }
    }
}

fn rebuild_summary() -> Result<()> {
    let cfg = WatchConfig::from_env()?;
    let stats = Summarizer::new(cfg.data_dir.clone(), &cfg.client).regenerate()?;
    println!(
        "digest rebuilt: {} asset(s) from {} record(s)",
        stats.assets, stats.records
    );
    Ok(())
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
