// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod events;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod search;
pub mod types;
pub mod watch;

mod sync;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::{ActionConfig, ConfigFile, load_and_validate};
use crate::engine::Controller;
use crate::events::NotificationHub;
use crate::exec::RealActionBackend;
use crate::fs::{FileSystem, RealFileSystem};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - notification hub / action backend / controller
/// - Ctrl-C handling and the drain on exit
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let mut cfg = load_and_validate(&config_path)
        .with_context(|| format!("loading config {:?}", config_path))?;

    if args.discard_queue_on_exit {
        cfg.controller.run_queued_on_stop = false;
    }

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let hub = NotificationHub::new();
    // No remote sink transport ships with the binary; sink daemons report
    // a service error per change.
    let backend = Arc::new(RealActionBackend::new(hub.notifier(), Arc::clone(&fs), None));
    let controller = Controller::from_config(cfg, hub, fs, backend)?;

    let configured = controller.list().len();
    let started = controller.start_all().await?;
    if started == 0 {
        anyhow::bail!("none of the {configured} configured daemons could be started");
    }
    if started < configured {
        warn!(started, configured, "some daemons could not be started");
    }
    info!(started, "dirwatch running; press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("listening for Ctrl-C")?;
    info!("shutdown requested");

    if let Err(err) = controller.stop_all().await {
        warn!(error = %err, "stop_all refused; disposing instead");
    }
    controller.dispose().await;
    controller.flush().await;
    Ok(())
}

/// Simple dry-run output: print daemons, filters and actions.
fn print_dry_run(cfg: &ConfigFile) {
    println!("dirwatch dry-run");
    println!(
        "  controller.synchronized_execution = {}",
        cfg.controller.synchronized_execution
    );
    println!(
        "  controller.run_queued_on_stop = {}",
        cfg.controller.run_queued_on_stop
    );
    println!("  controller.queue_limit = {}", cfg.controller.queue_limit);
    println!();

    println!("daemons ({}):", cfg.daemons.len());
    for daemon in &cfg.daemons {
        println!("  - {}", daemon.name);
        println!("      path: {:?}", daemon.path);
        println!("      filter: {}", daemon.name_filter.pattern());
        if daemon.recursive {
            println!("      recursive: true");
        }
        println!("      events: {:?}", daemon.subscriptions);
        if let Some(window) = daemon.dedup_window {
            println!("      dedup_window: {window:?}");
        }
        if daemon.recovery.is_active() {
            println!("      recovery: {:?}", daemon.recovery);
        }
        match &daemon.action {
            ActionConfig::Process(p) => {
                println!("      process: {} {}", p.program, p.arguments);
                if p.wait_for_exit {
                    println!("      wait_for_exit: {:?}", p.max_wait);
                }
            }
            ActionConfig::Sink(s) => {
                println!("      sink: {} (stream_content = {})", s.endpoint, s.stream_content);
            }
        }
        println!("      policy: {:?}", daemon.policy);
    }

    debug!("dry-run complete (no watching)");
}
