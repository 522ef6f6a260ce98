//! Review metrics and observability.
//!
//! Counters for suggestion, vote and lock activity. One instance is owned
//! by each engine and reported through the admin endpoint.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct ReviewMetrics {
    /// Suggestions accepted into a store
    suggestions_added: AtomicUsize,

    /// Suggestions withdrawn by their author or a reviewer
    suggestions_withdrawn: AtomicUsize,

    /// Votes cast, including overwrites and implicit author votes
    votes_cast: AtomicUsize,

    /// Suggestions promoted by the acceptance policy
    auto_accepted: AtomicUsize,

    /// Suggestions promoted by a reviewer
    manually_accepted: AtomicUsize,

    /// Translations saved without going through a suggestion
    direct_saves: AtomicUsize,

    /// Lock acquisitions attempted (explicit and implicit)
    lock_attempts: AtomicUsize,

    /// Lock acquisitions refused because another user held the lock
    lock_conflicts: AtomicUsize,

    /// Locks reclaimed after expiry
    locks_expired: AtomicUsize,
}

impl ReviewMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_suggestion_added(&self) {
        self.suggestions_added.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_suggestion_withdrawn(&self) {
        self.suggestions_withdrawn.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_vote(&self) {
        self.votes_cast.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_auto_accept(&self) {
        self.auto_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_manual_accept(&self) {
        self.manually_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_direct_save(&self) {
        self.direct_saves.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lock_attempt(&self) {
        self.lock_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lock_conflict(&self) {
        self.lock_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lock_expired(&self) {
        self.locks_expired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn suggestions_added(&self) -> usize {
        self.suggestions_added.load(Ordering::Relaxed)
    }

    pub fn votes_cast(&self) -> usize {
        self.votes_cast.load(Ordering::Relaxed)
    }

    pub fn auto_accepted(&self) -> usize {
        self.auto_accepted.load(Ordering::Relaxed)
    }

    pub fn lock_conflicts(&self) -> usize {
        self.lock_conflicts.load(Ordering::Relaxed)
    }

    pub fn locks_expired(&self) -> usize {
        self.locks_expired.load(Ordering::Relaxed)
    }

    /// Generate a metrics report.
    pub fn report(&self) -> MetricsReport {
        let added = self.suggestions_added();
        let auto = self.auto_accepted();
        let manual = self.manually_accepted.load(Ordering::Relaxed);
        let auto_accept_rate = percentage(auto, added);

        let attempts = self.lock_attempts.load(Ordering::Relaxed);
        let conflicts = self.lock_conflicts();

        MetricsReport {
            suggestions_added: added,
            suggestions_withdrawn: self.suggestions_withdrawn.load(Ordering::Relaxed),
            votes_cast: self.votes_cast(),
            auto_accepted: auto,
            manually_accepted: manual,
            auto_accept_rate,
            direct_saves: self.direct_saves.load(Ordering::Relaxed),
            lock_attempts: attempts,
            lock_conflicts: conflicts,
            lock_conflict_rate: percentage(conflicts, attempts),
            locks_expired: self.locks_expired(),
        }
    }
}

fn percentage(part: usize, total: usize) -> f64 {
    if total > 0 {
        (part as f64 / total as f64) * 100.0
    } else {
        0.0
    }
}

/// Metrics report containing current review statistics.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub suggestions_added: usize,
    pub suggestions_withdrawn: usize,
    pub votes_cast: usize,
    pub auto_accepted: usize,
    pub manually_accepted: usize,

    /// Share of suggestions promoted automatically, as a percentage (0-100)
    pub auto_accept_rate: f64,

    pub direct_saves: usize,
    pub lock_attempts: usize,
    pub lock_conflicts: usize,

    /// Share of lock attempts refused, as a percentage (0-100)
    pub lock_conflict_rate: f64,

    pub locks_expired: usize,
}
