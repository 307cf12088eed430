// src/rules/mod.rs

//! Rule compilation and matching.
//!
//! This module turns validated `[[rule]]` config tables into compiled
//! [`Rule`]s:
//! - `event` regexes are compiled once ([`pattern`]),
//! - `process` / `success` / `fail` / `backup` templates are parsed and
//!   cross-checked against the rule's capture groups ([`template`]),
//! - `schedule` strings are parsed into cron schedules.
//!
//! It also owns the matching step: an incoming root-relative path is tested
//! against every event rule, producing `(rule, captures)` pairs in config
//! order. It does **not** know about debouncing or execution; it only turns
//! paths into rule-level triggers.

pub mod pattern;
pub mod template;

use std::path::PathBuf;
use std::time::Duration;

use crate::config::loader::expand_str;
use crate::config::model::ConfigFile;
use crate::cron::Schedule;
use crate::errors::{Result, WatchrunError};

pub use pattern::{CaptureSet, EventPattern};
pub use template::{CommandTemplate, TemplateScope, SCHEDULE_CAPTURES};

/// Index of a rule in its [`RuleSet`], stable for the lifetime of the config.
pub type RuleId = usize;

/// What causes a rule to fire.
#[derive(Debug, Clone)]
pub enum RuleTrigger {
    /// Filesystem events whose path matches this pattern.
    Pattern(EventPattern),
    /// A cron schedule.
    Cron(Schedule),
}

/// A fully compiled rule.
#[derive(Debug, Clone)]
pub struct Rule {
    pub id: RuleId,
    pub name: String,
    pub trigger: RuleTrigger,
    pub process: CommandTemplate,
    pub timeout: Option<Duration>,
    pub success: Option<CommandTemplate>,
    pub fail: Option<CommandTemplate>,
    pub backup: Option<CommandTemplate>,
    pub concurrent: bool,
}

impl Rule {
    pub fn pattern(&self) -> Option<&EventPattern> {
        match &self.trigger {
            RuleTrigger::Pattern(pattern) => Some(pattern),
            RuleTrigger::Cron(_) => None,
        }
    }

    pub fn schedule(&self) -> Option<&Schedule> {
        match &self.trigger {
            RuleTrigger::Pattern(_) => None,
            RuleTrigger::Cron(schedule) => Some(schedule),
        }
    }
}

/// All compiled rules of a configuration, in file order.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Compile every rule of a (shape-validated) config.
    ///
    /// This is where invalid regexes, malformed templates, placeholders that
    /// don't resolve, and bad cron expressions are rejected, so a config that
    /// survives startup cannot produce template errors at trigger time.
    pub fn compile(cfg: &ConfigFile) -> Result<Self> {
        let mut rules = Vec::with_capacity(cfg.rules.len());

        for (index, rule_cfg) in cfg.rules.iter().enumerate() {
            let name = rule_cfg.display_name(index);

            let trigger = match (&rule_cfg.event, &rule_cfg.schedule) {
                (Some(raw), None) => {
                    let expanded = expand_str(raw);
                    let pattern = EventPattern::compile(&expanded).map_err(|source| {
                        WatchrunError::PatternError {
                            rule: name.clone(),
                            source,
                        }
                    })?;
                    RuleTrigger::Pattern(pattern)
                }
                (None, Some(raw)) => {
                    let schedule =
                        Schedule::parse(raw).map_err(|detail| WatchrunError::ScheduleError {
                            rule: name.clone(),
                            detail,
                        })?;
                    RuleTrigger::Cron(schedule)
                }
                // validate_config rejects these shapes; keep compile usable on
                // its own anyway.
                _ => {
                    return Err(WatchrunError::ConfigError(format!(
                        "rule '{name}' needs exactly one of `event` and `schedule`"
                    )));
                }
            };

            let scope = match &trigger {
                RuleTrigger::Pattern(pattern) => TemplateScope::Event(pattern),
                RuleTrigger::Cron(_) => TemplateScope::Schedule,
            };

            let process = compile_template(&rule_cfg.process, &scope, &name, "process")?;
            let success = rule_cfg
                .success
                .as_deref()
                .map(|raw| compile_template(raw, &scope, &name, "success"))
                .transpose()?;
            let fail = rule_cfg
                .fail
                .as_deref()
                .map(|raw| compile_template(raw, &scope, &name, "fail"))
                .transpose()?;
            let backup = rule_cfg
                .backup
                .as_deref()
                .map(|raw| compile_template(&expand_str(raw), &scope, &name, "backup"))
                .transpose()?;

            rules.push(Rule {
                id: index,
                name,
                trigger,
                process,
                timeout: rule_cfg.timeout_duration(),
                success,
                fail,
                backup,
                concurrent: rule_cfg.concurrent,
            });
        }

        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn get(&self, id: RuleId) -> Option<&Rule> {
        self.rules.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    pub fn has_event_rules(&self) -> bool {
        self.rules.iter().any(|r| r.pattern().is_some())
    }

    /// Scheduled rules with their parsed cron schedules.
    pub fn scheduled(&self) -> impl Iterator<Item = (&Rule, &Schedule)> {
        self.rules
            .iter()
            .filter_map(|r| r.schedule().map(|s| (r, s)))
    }

    /// Test a root-relative path against every event rule.
    ///
    /// Returns one `(rule, captures)` pair per matching rule, in config
    /// order. A path matching several rules fires each of them.
    pub fn match_event(&self, rel_path: &str) -> Vec<(RuleId, CaptureSet)> {
        self.rules
            .iter()
            .filter_map(|rule| {
                rule.pattern()
                    .and_then(|p| p.match_path(rel_path))
                    .map(|captures| (rule.id, captures))
            })
            .collect()
    }

    /// Unique literal directory prefixes of all event patterns.
    ///
    /// These are the directories to watch (relative to the watch root) when
    /// recursive watching is off. An empty prefix stands for the root itself.
    pub fn watch_prefixes(&self) -> Vec<PathBuf> {
        let mut prefixes: Vec<PathBuf> = Vec::new();
        for rule in &self.rules {
            if let Some(pattern) = rule.pattern() {
                let prefix = pattern.literal_prefix();
                if !prefixes.contains(&prefix) {
                    prefixes.push(prefix);
                }
            }
        }
        prefixes
    }

    /// Event rules that only work everywhere they match with
    /// `recursive = true`: the pattern reaches into subdirectories (it
    /// contains a `/`) but yields no literal prefix to watch, so without
    /// recursion the watcher falls back to the root and never sees those
    /// subdirectory paths.
    pub fn needs_recursive(&self) -> Vec<&Rule> {
        self.rules
            .iter()
            .filter(|rule| {
                rule.pattern().is_some_and(|p| {
                    p.raw().contains('/') && p.literal_prefix().as_os_str().is_empty()
                })
            })
            .collect()
    }
}

fn compile_template(
    raw: &str,
    scope: &TemplateScope<'_>,
    rule: &str,
    what: &str,
) -> Result<CommandTemplate> {
    let template = CommandTemplate::parse(raw)
        .and_then(|t| t.validate_against(scope).map(|_| t))
        .map_err(|detail| WatchrunError::TemplateError {
            rule: rule.to_string(),
            detail: format!("{what}: {detail}"),
        })?;
    Ok(template)
}
