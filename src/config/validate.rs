// src/config/validate.rs

use crate::config::model::ConfigFile;
use crate::errors::{Result, WatchrunError};

/// Shape checks on a freshly loaded config:
/// - there is at least one `[[rule]]`
/// - every rule has a non-empty `process`
/// - every rule has exactly one of `event` / `schedule`
/// - `backup` is only used on `event` rules
/// - `timeout`, when given, is at least 1 second
/// - `[general]` values are sane
///
/// It does **not** compile patterns, templates or schedules; that (and the
/// cross-checks between templates and capture groups) happens in
/// `rules::RuleSet::compile`.
pub fn validate_config(cfg: &ConfigFile) -> Result<()> {
    ensure_has_rules(cfg)?;
    validate_general(cfg)?;
    validate_rule_shapes(cfg)?;
    Ok(())
}

fn ensure_has_rules(cfg: &ConfigFile) -> Result<()> {
    if cfg.rules.is_empty() {
        return Err(WatchrunError::ConfigError(
            "config must contain at least one [[rule]] table".to_string(),
        ));
    }
    Ok(())
}

fn validate_general(cfg: &ConfigFile) -> Result<()> {
    if cfg.general.max_parallel == 0 {
        return Err(WatchrunError::ConfigError(
            "[general].max_parallel must be >= 1 (got 0)".to_string(),
        ));
    }

    if cfg.general.max_output_bytes == 0 {
        return Err(WatchrunError::ConfigError(
            "[general].max_output_bytes must be >= 1 (got 0)".to_string(),
        ));
    }

    Ok(())
}

fn validate_rule_shapes(cfg: &ConfigFile) -> Result<()> {
    for (index, rule) in cfg.rules.iter().enumerate() {
        let name = rule.display_name(index);

        if rule.process.trim().is_empty() {
            return Err(WatchrunError::ConfigError(format!(
                "rule '{name}' has an empty `process`"
            )));
        }

        match (&rule.event, &rule.schedule) {
            (Some(_), Some(_)) => {
                return Err(WatchrunError::ConfigError(format!(
                    "rule '{name}' sets both `event` and `schedule`; pick one"
                )));
            }
            (None, None) => {
                return Err(WatchrunError::ConfigError(format!(
                    "rule '{name}' needs either `event` or `schedule`"
                )));
            }
            _ => {}
        }

        if rule.backup.is_some() && rule.event.is_none() {
            return Err(WatchrunError::ConfigError(format!(
                "rule '{name}' sets `backup` but has no `event`; there is no file to back up"
            )));
        }

        if rule.timeout == Some(0) {
            return Err(WatchrunError::ConfigError(format!(
                "rule '{name}' has `timeout = 0`; use at least 1 second or omit it"
            )));
        }
    }

    Ok(())
}
