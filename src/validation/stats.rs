// src/validation/stats.rs
//! Validation statistics sink
//!
//! Running totals plus rejection histograms by error code and by intent
//! kind. Safe under concurrent recording from rooms processed in parallel;
//! `reset()` starts a fresh metric window.

use crate::validation::payload::RejectionCode;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Concurrent statistics sink for the validation pipeline
#[derive(Default)]
pub struct ValidationStats {
    validated: AtomicU64,
    valid: AtomicU64,
    rejected: AtomicU64,

    by_code: DashMap<&'static str, u64>,
    by_kind: DashMap<String, u64>,
}

/// Point-in-time copy of the sink's counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsSnapshot {
    pub validated: u64,
    pub valid: u64,
    pub rejected: u64,
    pub rejections_by_code: HashMap<&'static str, u64>,
    pub rejections_by_kind: HashMap<String, u64>,
}

impl ValidationStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an intent that passed every stage
    pub fn record_pass(&self, kind: &str) {
        self.validated.fetch_add(1, Ordering::Relaxed);
        self.valid.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("intents_valid_total", "kind" => kind.to_string()).increment(1);
    }

    /// Record a rejection with its stage-reported code
    pub fn record_rejection(&self, kind: &str, code: RejectionCode) {
        self.validated.fetch_add(1, Ordering::Relaxed);
        self.rejected.fetch_add(1, Ordering::Relaxed);
        *self.by_code.entry(code.as_str()).or_insert(0) += 1;
        *self.by_kind.entry(kind.to_string()).or_insert(0) += 1;
        metrics::counter!(
            "intents_rejected_total",
            "kind" => kind.to_string(),
            "code" => code.as_str()
        )
        .increment(1);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            validated: self.validated.load(Ordering::Relaxed),
            valid: self.valid.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            rejections_by_code: self
                .by_code
                .iter()
                .map(|e| (*e.key(), *e.value()))
                .collect(),
            rejections_by_kind: self
                .by_kind
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
        }
    }

    /// Start a fresh metric window
    pub fn reset(&self) {
        self.validated.store(0, Ordering::Relaxed);
        self.valid.store(0, Ordering::Relaxed);
        self.rejected.store(0, Ordering::Relaxed);
        self.by_code.clear();
        self.by_kind.clear();
    }
}
