//! Shared health state for the /health endpoint.
//! Updated by the orchestrator and DbWriter, read by the API.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::api::latency::LatencySummary;
use crate::types::{CycleOutcome, Sport};

#[derive(Default)]
pub struct HealthState {
    /// Millisecond timestamp of the last finished cycle (0 = none yet).
    pub last_collect_at_ms: AtomicI64,
    pub cycles_total: AtomicU64,
    pub cycles_failed: AtomicU64,
    /// Persistence messages dropped because the writer channel was full or closed.
    pub persist_dropped: AtomicU64,
    pub persist_errors: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cycle(&self, finished_at: DateTime<Utc>, outcome: CycleOutcome) {
        self.last_collect_at_ms.store(finished_at.timestamp_millis(), Ordering::Relaxed);
        self.cycles_total.fetch_add(1, Ordering::Relaxed);
        if outcome == CycleOutcome::Failed {
            self.cycles_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn inc_persist_dropped(&self) {
        self.persist_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_persist_errors(&self) {
        self.persist_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn last_collect_at(&self) -> Option<DateTime<Utc>> {
        match self.last_collect_at_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }

    pub fn cycles_total(&self) -> u64 {
        self.cycles_total.load(Ordering::Relaxed)
    }

    pub fn cycles_failed(&self) -> u64 {
        self.cycles_failed.load(Ordering::Relaxed)
    }

    pub fn persist_dropped(&self) -> u64 {
        self.persist_dropped.load(Ordering::Relaxed)
    }

    pub fn persist_errors(&self) -> u64 {
        self.persist_errors.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SportStatus {
    pub running: bool,
    pub last_outcome: Option<CycleOutcome>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub schedule_stale: Option<bool>,
    pub props_stale: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub last_collect_timestamp: Option<DateTime<Utc>>,
    /// Stale entries over all held schedule and props entries; None before any fetch.
    pub stale_ratio: Option<f64>,
    pub schedule_stale_ratio: Option<f64>,
    pub props_stale_ratio: Option<f64>,
    pub per_sport_status: BTreeMap<Sport, SportStatus>,
    pub games_held: usize,
    pub cycles_total: u64,
    pub cycles_failed: u64,
    pub persist_dropped: u64,
    pub persist_errors: u64,
    pub provider_latency: BTreeMap<String, LatencySummary>,
}

/// Combine `(stale, total)` counts from several caches.
pub fn combined_stale_ratio(counts: &[(usize, usize)]) -> Option<f64> {
    let (stale, total) = counts.iter().fold((0, 0), |(s, t), (cs, ct)| (s + cs, t + ct));
    (total > 0).then(|| stale as f64 / total as f64)
}
