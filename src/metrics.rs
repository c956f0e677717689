//! # Observable Metrics (§6)
//!
//! A small in-process counter/histogram registry, not wired to any specific
//! metrics backend. An embedding application reads a [`Snapshot`] and
//! forwards it to whatever it already uses (StatsD, Prometheus, …) — the
//! engine core itself has no opinion on that wire format.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;

/// Running totals for one named rule.
#[derive(Default)]
struct RuleStats {
    executions: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    total_duration_micros: AtomicU64,
}

/// Running totals for one named field.
#[derive(Default)]
struct FieldStats {
    fetches: AtomicU64,
    cache_hits: AtomicU64,
    total_duration_micros: AtomicU64,
}

/// Thread-safe metrics sink, cheap to clone and share across concurrent
/// executions (§5).
#[derive(Default, Clone)]
pub struct Metrics {
    rules: std::sync::Arc<DashMap<String, RuleStats>>,
    fields: std::sync::Arc<DashMap<String, FieldStats>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_rule_execution(&self, rule_id: &str, duration: Duration, succeeded: bool) {
        let entry = self.rules.entry(rule_id.to_string()).or_default();
        entry.executions.fetch_add(1, Ordering::Relaxed);
        entry.total_duration_micros.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        if succeeded {
            entry.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            entry.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_field_fetch(&self, field_name: &str, duration: Duration, cache_hit: bool) {
        let entry = self.fields.entry(field_name.to_string()).or_default();
        entry.fetches.fetch_add(1, Ordering::Relaxed);
        entry.total_duration_micros.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        if cache_hit {
            entry.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn rule_snapshot(&self, rule_id: &str) -> Option<RuleSnapshot> {
        self.rules.get(rule_id).map(|stats| RuleSnapshot {
            rule_id: rule_id.to_string(),
            executions: stats.executions.load(Ordering::Relaxed),
            successes: stats.successes.load(Ordering::Relaxed),
            failures: stats.failures.load(Ordering::Relaxed),
            total_duration_micros: stats.total_duration_micros.load(Ordering::Relaxed),
        })
    }

    pub fn field_snapshot(&self, field_name: &str) -> Option<FieldSnapshot> {
        self.fields.get(field_name).map(|stats| {
            let fetches = stats.fetches.load(Ordering::Relaxed);
            let cache_hits = stats.cache_hits.load(Ordering::Relaxed);
            FieldSnapshot {
                field_name: field_name.to_string(),
                fetches,
                cache_hits,
                cache_hit_ratio: if fetches == 0 { 0.0 } else { cache_hits as f64 / fetches as f64 },
                total_duration_micros: stats.total_duration_micros.load(Ordering::Relaxed),
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleSnapshot {
    pub rule_id: String,
    pub executions: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_duration_micros: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSnapshot {
    pub field_name: String,
    pub fetches: u64,
    pub cache_hits: u64,
    pub cache_hit_ratio: f64,
    pub total_duration_micros: u64,
}
