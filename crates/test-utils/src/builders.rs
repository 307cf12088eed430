#![allow(dead_code)]

use watchrun::config::{ConfigFile, GeneralSection, RuleConfig};

/// Fluent construction of a `ConfigFile` for tests.
pub struct ConfigFileBuilder {
    config: ConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: ConfigFile {
                general: GeneralSection::default(),
                rules: Vec::new(),
            },
        }
    }

    pub fn with_rule(mut self, rule: RuleConfig) -> Self {
        self.config.rules.push(rule);
        self
    }

    pub fn with_watch(mut self, dir: &str) -> Self {
        self.config.general.watch = dir.to_string();
        self
    }

    pub fn with_recursive(mut self, val: bool) -> Self {
        self.config.general.recursive = val;
        self
    }

    pub fn with_max_parallel(mut self, n: usize) -> Self {
        self.config.general.max_parallel = n;
        self
    }

    pub fn with_coalesce_window_ms(mut self, ms: u64) -> Self {
        self.config.general.coalesce_window_ms = ms;
        self
    }

    pub fn with_max_output_bytes(mut self, n: usize) -> Self {
        self.config.general.max_output_bytes = n;
        self
    }

    pub fn with_delete_after_run(mut self, val: bool) -> Self {
        self.config.general.delete_after_run = val;
        self
    }

    pub fn build(self) -> ConfigFile {
        self.config
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Fluent construction of a single `[[rule]]` entry.
pub struct RuleConfigBuilder {
    rule: RuleConfig,
}

impl RuleConfigBuilder {
    pub fn new(process: &str) -> Self {
        Self {
            rule: RuleConfig {
                name: None,
                event: None,
                schedule: None,
                process: process.to_string(),
                timeout: None,
                success: None,
                fail: None,
                backup: None,
                concurrent: false,
            },
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.rule.name = Some(name.to_string());
        self
    }

    pub fn event(mut self, pattern: &str) -> Self {
        self.rule.event = Some(pattern.to_string());
        self
    }

    pub fn schedule(mut self, expr: &str) -> Self {
        self.rule.schedule = Some(expr.to_string());
        self
    }

    pub fn timeout(mut self, secs: u64) -> Self {
        self.rule.timeout = Some(secs);
        self
    }

    pub fn success(mut self, cmd: &str) -> Self {
        self.rule.success = Some(cmd.to_string());
        self
    }

    pub fn fail(mut self, cmd: &str) -> Self {
        self.rule.fail = Some(cmd.to_string());
        self
    }

    pub fn backup(mut self, dest: &str) -> Self {
        self.rule.backup = Some(dest.to_string());
        self
    }

    pub fn concurrent(mut self, val: bool) -> Self {
        self.rule.concurrent = val;
        self
    }

    pub fn build(self) -> RuleConfig {
        self.rule
    }
}
