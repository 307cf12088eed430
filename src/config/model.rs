// src/config/model.rs

use std::time::Duration;

use serde::Deserialize;

/// Everything a `Watchrun.toml` can say.
///
/// ```toml
/// [general]
/// watch = "~/incoming"
/// max_parallel = 4
/// coalesce_window_ms = 200
///
/// [[rule]]
/// name = "load-csv"
/// event = 'data/(\d+)\.csv'
/// process = "load.sh {0}"
/// timeout = 5
/// success = "echo ok {0}"
/// fail = "echo fail {0}"
/// ```
///
/// All `[general]` keys are optional and have reasonable defaults; rules are
/// declared as an ordered array of `[[rule]]` tables.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    /// Global behaviour config from `[general]`.
    #[serde(default)]
    pub general: GeneralSection,

    /// All rules from `[[rule]]`, in file order.
    ///
    /// File order matters: when a path matches several rules, triggers are
    /// produced in this order.
    #[serde(default, rename = "rule")]
    pub rules: Vec<RuleConfig>,
}

/// `[general]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneralSection {
    /// Directory to watch. Environment variables and a leading `~` are
    /// expanded. Defaults to the current working directory.
    #[serde(default = "default_watch")]
    pub watch: String,

    /// Watch the whole tree under `watch` instead of only the directories
    /// named by the rule patterns.
    #[serde(default)]
    pub recursive: bool,

    /// Maximum number of rule processes running at the same time.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Debounce window in milliseconds: repeated events for the same
    /// (rule, path) within this window are coalesced into a single run.
    #[serde(default = "default_coalesce_window_ms")]
    pub coalesce_window_ms: u64,

    /// Grace period in milliseconds between SIGTERM and SIGKILL when a
    /// process tree is torn down after a timeout or on shutdown.
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,

    /// How long shutdown waits for in-flight runs before force-killing them,
    /// in milliseconds.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,

    /// Upper bound on captured stdout/stderr per run, in bytes. Output beyond
    /// this is dropped and the run record is marked truncated.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    /// Delete the triggering file after a successful run.
    #[serde(default)]
    pub delete_after_run: bool,
}

fn default_watch() -> String {
    ".".to_string()
}

fn default_max_parallel() -> usize {
    10
}

fn default_coalesce_window_ms() -> u64 {
    200
}

fn default_kill_grace_ms() -> u64 {
    5_000
}

fn default_drain_timeout_ms() -> u64 {
    10_000
}

fn default_max_output_bytes() -> usize {
    65_536
}

impl Default for GeneralSection {
    fn default() -> Self {
        Self {
            watch: default_watch(),
            recursive: false,
            max_parallel: default_max_parallel(),
            coalesce_window_ms: default_coalesce_window_ms(),
            kill_grace_ms: default_kill_grace_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
            max_output_bytes: default_max_output_bytes(),
            delete_after_run: false,
        }
    }
}

impl GeneralSection {
    pub fn coalesce_window(&self) -> Duration {
        Duration::from_millis(self.coalesce_window_ms)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// `[[rule]]` table.
///
/// Exactly one of `event` and `schedule` must be set:
///
/// - `event` is a regular expression matched against paths relative to the
///   watch root (forward slashes, anchored at the start).
/// - `schedule` is a five-field cron expression
///   (`minute hour day month weekday`, weekday 0 = Monday).
#[derive(Debug, Clone, Deserialize)]
pub struct RuleConfig {
    /// Optional rule name used in logs. Unnamed rules get `rule<index>`.
    #[serde(default)]
    pub name: Option<String>,

    /// Event pattern (regex) for file-triggered rules.
    ///
    /// Capture groups are exposed to the templates as `{0}`, `{1}`, ... and
    /// named groups as `{name}`. `{file}` is always the full triggering path.
    #[serde(default)]
    pub event: Option<String>,

    /// Cron expression for time-triggered rules.
    ///
    /// Templates of scheduled rules may use `{year}`, `{month}`, `{day}`,
    /// `{hour}` and `{minute}` instead of capture groups.
    #[serde(default)]
    pub schedule: Option<String>,

    /// The command template to execute.
    pub process: String,

    /// Optional timeout in seconds. When exceeded, the whole process tree of
    /// the run is killed and the run is recorded as timed out.
    #[serde(default)]
    pub timeout: Option<u64>,

    /// Optional command template run after a successful run.
    #[serde(default)]
    pub success: Option<String>,

    /// Optional command template run after a failed or timed-out run.
    #[serde(default)]
    pub fail: Option<String>,

    /// Optional destination path template: the triggering file is copied
    /// there (atomically) before the process starts.
    ///
    /// Only valid for `event` rules. Relative destinations are resolved
    /// against the watch root.
    #[serde(default)]
    pub backup: Option<String>,

    /// Allow several runs of this rule at the same time.
    ///
    /// By default a rule is exclusive: while one run is active, further
    /// triggers for the rule are held and dispatched afterwards.
    #[serde(default)]
    pub concurrent: bool,
}

impl RuleConfig {
    /// Convenience: the name used in logs, falling back to the rule's
    /// position in the file.
    pub fn display_name(&self, index: usize) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("rule{index}"),
        }
    }

    /// Convenience: the timeout as a `Duration`, if configured.
    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }
}
