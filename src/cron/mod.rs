// src/cron/mod.rs

//! Cron-style schedules for time-triggered rules.
//!
//! A schedule is five whitespace-separated fields:
//!
//! ```text
//! minute hour day month weekday
//! ```
//!
//! with `weekday` counting from 0 = Monday. Each field is `*`, a value, a
//! range `a-b`, or a comma-separated list of those; all five fields must
//! match for the schedule to fire. Resolution is one minute.
//!
//! [`spawn_cron`] runs a single background task that sleeps until the next
//! fire time across all scheduled rules and sends `RuntimeEvent::CronFired`
//! into the runtime, where the trigger joins the same queue as file events.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Local, Timelike};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::RuntimeEvent;
use crate::rules::{CaptureSet, RuleId, RuleSet, SCHEDULE_CAPTURES};

/// Scan limit for [`Schedule::next_after`]: one leap year of minutes. A
/// schedule that doesn't fire within this horizon never fires (e.g. Feb 30).
const MAX_SCAN_MINUTES: u32 = 366 * 24 * 60;

/// One field of a cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Field {
    Any,
    Values(Vec<u32>),
}

impl Field {
    fn parse(text: &str, min: u32, max: u32, what: &str) -> Result<Self, String> {
        if text == "*" {
            return Ok(Field::Any);
        }

        let mut values = Vec::new();
        for part in text.split(',') {
            match part.split_once('-') {
                Some((lo, hi)) => {
                    let lo = parse_bounded(lo, min, max, what)?;
                    let hi = parse_bounded(hi, min, max, what)?;
                    if lo > hi {
                        return Err(format!("{what} range '{part}' is reversed"));
                    }
                    values.extend(lo..=hi);
                }
                None => values.push(parse_bounded(part, min, max, what)?),
            }
        }

        values.sort_unstable();
        values.dedup();
        Ok(Field::Values(values))
    }

    fn matches(&self, value: u32) -> bool {
        match self {
            Field::Any => true,
            Field::Values(values) => values.binary_search(&value).is_ok(),
        }
    }
}

fn parse_bounded(text: &str, min: u32, max: u32, what: &str) -> Result<u32, String> {
    let value: u32 = text
        .trim()
        .parse()
        .map_err(|_| format!("{what} value '{text}' is not a number"))?;
    if value < min || value > max {
        return Err(format!("{what} value {value} out of range {min}-{max}"));
    }
    Ok(value)
}

/// A parsed five-field cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    raw: String,
    minute: Field,
    hour: Field,
    day: Field,
    month: Field,
    weekday: Field,
}

impl Schedule {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let fields: Vec<&str> = raw.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(format!(
                "expected 5 fields (minute hour day month weekday), got {}",
                fields.len()
            ));
        }

        Ok(Self {
            raw: raw.to_string(),
            minute: Field::parse(fields[0], 0, 59, "minute")?,
            hour: Field::parse(fields[1], 0, 23, "hour")?,
            day: Field::parse(fields[2], 1, 31, "day")?,
            month: Field::parse(fields[3], 1, 12, "month")?,
            weekday: Field::parse(fields[4], 0, 6, "weekday")?,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Does this schedule fire at the given minute?
    pub fn matches(&self, t: &DateTime<Local>) -> bool {
        self.minute.matches(t.minute())
            && self.hour.matches(t.hour())
            && self.day.matches(t.day())
            && self.month.matches(t.month())
            && self.weekday.matches(t.weekday().num_days_from_monday())
    }

    /// The first matching minute strictly after `after`, or `None` when the
    /// schedule does not fire within a year.
    pub fn next_after(&self, after: DateTime<Local>) -> Option<DateTime<Local>> {
        let mut candidate = after
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))?
            .checked_add_signed(ChronoDuration::minutes(1))?;

        for _ in 0..MAX_SCAN_MINUTES {
            if self.matches(&candidate) {
                return Some(candidate);
            }
            candidate = candidate.checked_add_signed(ChronoDuration::minutes(1))?;
        }

        None
    }
}

/// Capture set exposed to the templates of a scheduled rule: the components
/// of the firing time, unpadded, under the names in [`SCHEDULE_CAPTURES`].
pub fn time_captures(at: &DateTime<Local>) -> CaptureSet {
    let values = [
        at.year().to_string(),
        at.month().to_string(),
        at.day().to_string(),
        at.hour().to_string(),
        at.minute().to_string(),
    ];

    let named = SCHEDULE_CAPTURES
        .iter()
        .map(|name| name.to_string())
        .zip(values)
        .collect();

    CaptureSet {
        positional: Vec::new(),
        named,
    }
}

struct CronEntry {
    rule: RuleId,
    name: String,
    schedule: Schedule,
}

/// Spawn the background cron task, if the rule set has any scheduled rules.
///
/// The task sends `RuntimeEvent::CronFired` into the runtime and exits when
/// the runtime channel closes.
pub fn spawn_cron(
    rules: Arc<RuleSet>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
) -> Option<JoinHandle<()>> {
    let entries: Vec<CronEntry> = rules
        .scheduled()
        .map(|(rule, schedule)| CronEntry {
            rule: rule.id,
            name: rule.name.clone(),
            schedule: schedule.clone(),
        })
        .collect();

    if entries.is_empty() {
        return None;
    }

    Some(tokio::spawn(cron_loop(entries, runtime_tx)))
}

async fn cron_loop(mut entries: Vec<CronEntry>, runtime_tx: mpsc::Sender<RuntimeEvent>) {
    info!(rules = entries.len(), "cron scheduler started");

    loop {
        let now = Local::now();

        entries.retain(|entry| match entry.schedule.next_after(now) {
            Some(_) => true,
            None => {
                warn!(
                    rule = %entry.name,
                    schedule = %entry.schedule.raw(),
                    "schedule never fires, disabling rule"
                );
                false
            }
        });

        let next = entries
            .iter()
            .filter_map(|entry| entry.schedule.next_after(now))
            .min();

        let Some(at) = next else {
            info!("no schedulable rules left, cron scheduler exiting");
            return;
        };

        let wait = (at - Local::now()).to_std().unwrap_or(Duration::ZERO);
        debug!(at = %at, "cron sleeping until next fire");
        tokio::time::sleep(wait).await;

        for entry in &entries {
            if !entry.schedule.matches(&at) {
                continue;
            }
            debug!(rule = %entry.name, at = %at, "cron schedule fired");
            let event = RuntimeEvent::CronFired {
                rule: entry.rule,
                captures: time_captures(&at),
            };
            if runtime_tx.send(event).await.is_err() {
                debug!("runtime channel closed, cron scheduler exiting");
                return;
            }
        }
    }
}
