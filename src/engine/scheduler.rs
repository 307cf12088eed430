// src/engine/scheduler.rs

//! Debouncing and per-rule exclusivity.
//!
//! The [`PendingSet`] sits between rule matching and execution. Every
//! matched trigger is inserted here first; a trigger only becomes
//! dispatchable once its debounce window has passed with no newer event for
//! the same `(rule, path)`. Re-inserting an existing key *restarts* the
//! window and keeps the newest captures, so an event storm on one file
//! collapses into a single run that starts one quiet window after the storm
//! ends.
//!
//! Exclusivity is enforced at the same point: a due trigger whose rule is
//! exclusive and currently running is simply held; [`PendingSet::release`]
//! lets it go on the next poll. Triggers for the same rule but different
//! paths debounce independently and only queue behind each other at
//! dispatch time.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::engine::record::Trigger;
use crate::rules::RuleId;

/// Debounce bucket identity: one pending run per rule and path. Scheduled
/// rules have no path and therefore one bucket per rule.
pub type TriggerKey = (RuleId, Option<PathBuf>);

struct PendingEntry {
    slot: (Instant, u64),
    trigger: Trigger,
}

/// The set of triggers waiting to run.
pub struct PendingSet {
    window: Duration,

    /// Whether the rule at each index is exclusive (the default).
    exclusive: Vec<bool>,

    /// Ready-time ordered view of `pending`. The `u64` is an insertion stamp
    /// that keeps equal ready times in FIFO order and makes keys unique.
    queue: BTreeMap<(Instant, u64), TriggerKey>,

    pending: HashMap<TriggerKey, PendingEntry>,

    /// Exclusive rules with a run currently in flight.
    running: HashSet<RuleId>,

    next_slot: u64,
}

impl PendingSet {
    /// `exclusive` is indexed by `RuleId`; rules not covered by it are
    /// treated as exclusive.
    pub fn new(window: Duration, exclusive: Vec<bool>) -> Self {
        Self {
            window,
            exclusive,
            queue: BTreeMap::new(),
            pending: HashMap::new(),
            running: HashSet::new(),
            next_slot: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Is this rule currently holding its exclusivity slot?
    pub fn is_running(&self, rule: RuleId) -> bool {
        self.running.contains(&rule)
    }

    /// Insert a trigger, coalescing with an already-pending one for the same
    /// `(rule, path)`. The merged trigger keeps the *newest* captures and
    /// timestamp, and its debounce window restarts from the newest event.
    pub fn insert(&mut self, trigger: Trigger) {
        let key: TriggerKey = (trigger.rule, trigger.path.clone());
        let ready_at = trigger.at + self.window;
        let slot = (ready_at, self.next_slot);
        self.next_slot += 1;

        if let Some(previous) = self.pending.remove(&key) {
            self.queue.remove(&previous.slot);
            debug!(rule = trigger.rule, seq = trigger.seq, "coalesced trigger, window restarted");
        }

        self.queue.insert(slot, key.clone());
        self.pending.insert(key, PendingEntry { slot, trigger });
    }

    /// Earliest instant at which a *dispatchable* trigger becomes due, for
    /// the runtime's timer. Triggers held behind a running exclusive rule
    /// have no deadline; they are released by run completion, not by time.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue
            .iter()
            .find(|(_, key)| !self.is_blocked(key.0))
            .map(|((ready_at, _), _)| *ready_at)
    }

    /// Remove and return every trigger that is due at `now` and not blocked
    /// by exclusivity, oldest first. Taken exclusive rules are marked
    /// running until [`PendingSet::release`].
    pub fn take_ready(&mut self, now: Instant) -> Vec<Trigger> {
        let due: Vec<((Instant, u64), TriggerKey)> = self
            .queue
            .range(..=(now, u64::MAX))
            .map(|(slot, key)| (*slot, key.clone()))
            .collect();

        let mut taken = Vec::new();
        for (slot, key) in due {
            if self.is_blocked(key.0) {
                continue;
            }

            self.queue.remove(&slot);
            if let Some(entry) = self.pending.remove(&key) {
                if self.is_exclusive(key.0) {
                    self.running.insert(key.0);
                }
                taken.push(entry.trigger);
            }
        }

        taken
    }

    /// A run of `rule` finished; release its exclusivity slot.
    pub fn release(&mut self, rule: RuleId) {
        if self.running.remove(&rule) {
            debug!(rule, "exclusivity slot released");
        }
    }

    /// Discard all pending triggers (shutdown). Returns how many were
    /// dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        self.queue.clear();
        dropped
    }

    fn is_exclusive(&self, rule: RuleId) -> bool {
        self.exclusive.get(rule).copied().unwrap_or(true)
    }

    fn is_blocked(&self, rule: RuleId) -> bool {
        self.is_exclusive(rule) && self.running.contains(&rule)
    }
}
