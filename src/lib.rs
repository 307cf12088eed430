// src/lib.rs

pub mod cli;
pub mod config;
pub mod cron;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod rules;
pub mod watch;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::cli::CliArgs;
use crate::config::{ConfigFile, load_and_validate};
use crate::engine::{Runtime, RuntimeEvent, RuntimeOptions};
use crate::exec::{ExecutorSettings, RealExecutorBackend};
use crate::rules::{RuleSet, RuleTrigger};

/// Everything between argument parsing and the runtime's last breath:
/// load + compile the config, start the executor, the watcher and the cron
/// ticker as needed, install Ctrl-C handling, then run the event loop.
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;
    let rules = Arc::new(RuleSet::compile(&cfg)?);

    if args.dry_run {
        print_dry_run(&cfg, &rules);
        return Ok(());
    }

    let watch_root = resolve_watch_root(args.watch.as_deref(), &cfg);
    info!(root = %watch_root.display(), rules = rules.len(), "watchrun starting");

    ensure_backup_dirs(&rules, &watch_root).await?;

    // Runtime event channel.
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(64);

    let settings = ExecutorSettings {
        watch_root: watch_root.clone(),
        max_parallel: cfg.general.max_parallel,
        max_output_bytes: cfg.general.max_output_bytes,
        kill_grace: cfg.general.kill_grace(),
        delete_after_run: cfg.general.delete_after_run,
    };
    let executor = RealExecutorBackend::new(Arc::clone(&rules), settings, rt_tx.clone());

    if !cfg.general.recursive {
        for rule in rules.needs_recursive() {
            warn!(
                rule = %rule.name,
                "event pattern has no literal directory prefix; without recursive = true it only sees files directly under the watch root"
            );
        }
    }

    // File watcher, unless every rule is schedule-driven.
    let _watcher_handle = if rules.has_event_rules() {
        Some(watch::spawn_watcher(
            watch_root.clone(),
            rules.watch_prefixes(),
            cfg.general.recursive,
            rt_tx.clone(),
        )?)
    } else {
        None
    };

    // Cron ticker, if any rule has a schedule.
    let _cron_handle = cron::spawn_cron(Arc::clone(&rules), rt_tx.clone());

    // First Ctrl-C asks the runtime to drain and stop.
    {
        let tx = rt_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "cannot listen for Ctrl-C");
                return;
            }
            let _ = tx.send(RuntimeEvent::ShutdownRequested).await;
        });
    }

    let options = RuntimeOptions {
        coalesce_window: cfg.general.coalesce_window(),
        drain_timeout: cfg.general.drain_timeout(),
    };

    let runtime = Runtime::new(Arc::clone(&rules), watch_root, options, rt_rx, executor);
    let stats = runtime.run().await?;

    info!(
        succeeded = stats.succeeded,
        failed = stats.failed,
        timed_out = stats.timed_out,
        "watchrun finished"
    );
    Ok(())
}

/// Figure out the directory to watch.
///
/// The `--watch` flag wins over `general.watch`; either way env vars and a
/// leading `~` are expanded, and the result is canonicalised when possible
/// so watcher paths and trigger paths agree.
fn resolve_watch_root(override_dir: Option<&str>, cfg: &ConfigFile) -> PathBuf {
    let raw = override_dir.unwrap_or(&cfg.general.watch);
    let path = config::expand_path(raw);
    path.canonicalize().unwrap_or(path)
}

/// Create the literal directory prefixes of backup destinations up front, so
/// the first backup cannot fail on a missing directory at trigger time.
async fn ensure_backup_dirs(rules: &RuleSet, watch_root: &Path) -> Result<()> {
    for rule in rules.iter() {
        let Some(template) = &rule.backup else {
            continue;
        };
        let Some(prefix) = template.literal_dir_prefix() else {
            continue;
        };
        let dir = if prefix.is_relative() {
            watch_root.join(&prefix)
        } else {
            prefix
        };
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating backup directory {}", dir.display()))?;
        debug!(rule = %rule.name, dir = %dir.display(), "backup directory ready");
    }
    Ok(())
}

/// Simple dry-run output: print the effective settings and compiled rules.
fn print_dry_run(cfg: &ConfigFile, rules: &RuleSet) {
    println!("watchrun dry-run");
    println!("  general.watch = {}", cfg.general.watch);
    println!("  general.recursive = {}", cfg.general.recursive);
    println!("  general.max_parallel = {}", cfg.general.max_parallel);
    println!(
        "  general.coalesce_window_ms = {}",
        cfg.general.coalesce_window_ms
    );
    println!();

    println!("rules ({}):", rules.len());
    for rule in rules.iter() {
        println!("  - {}", rule.name);
        match &rule.trigger {
            RuleTrigger::Pattern(pattern) => println!("      event: {}", pattern.raw()),
            RuleTrigger::Cron(schedule) => println!("      schedule: {}", schedule.raw()),
        }
        println!("      process: {}", rule.process.raw());
        if let Some(timeout) = rule.timeout {
            println!("      timeout: {}s", timeout.as_secs());
        }
        if let Some(ref template) = rule.success {
            println!("      success: {}", template.raw());
        }
        if let Some(ref template) = rule.fail {
            println!("      fail: {}", template.raw());
        }
        if let Some(ref template) = rule.backup {
            println!("      backup: {}", template.raw());
        }
        if rule.concurrent {
            println!("      concurrent: true");
        }
    }

    debug!("dry-run printed, nothing executed");
}
