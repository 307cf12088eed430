// src/cli.rs

//! Command line surface, built with `clap` derive.

use clap::{Parser, ValueEnum};

use crate::config::DEFAULT_CONFIG_FILE;

/// Run shell commands when watched files change or schedules fire.
#[derive(Debug, Clone, Parser)]
#[command(name = "watchrun", version, about)]
pub struct CliArgs {
    /// TOML config file to load.
    #[arg(short = 'c', long, value_name = "PATH", default_value = DEFAULT_CONFIG_FILE)]
    pub config: String,

    /// Watch this directory instead of `general.watch` from the config.
    #[arg(short = 'w', long, value_name = "DIR")]
    pub watch: Option<String>,

    /// Log level; overrides the `WATCHRUN_LOG` environment variable.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Load and compile the config, print the effective rules, then exit
    /// without running anything.
    #[arg(long)]
    pub dry_run: bool,
}

/// Accepted values for `--log-level`.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

pub fn parse() -> CliArgs {
    CliArgs::parse()
}
