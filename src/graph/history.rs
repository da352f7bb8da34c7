//! Per-region execution history
//!
//! Feeds schedule gating. Lives only as long as one engine run.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Execution record of a single region
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionRecord {
    /// Clock time of the last run (ms)
    pub last_run_time: u64,
    /// Number of runs so far
    pub run_count: u32,
}

/// Execution history keyed by region id
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionHistory {
    records: HashMap<String, RegionRecord>,
}

impl ExecutionHistory {
    /// Create an empty history
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a run of `region_id` at `now_ms`
    pub fn record(&mut self, region_id: &str, now_ms: u64) -> RegionRecord {
        let record = self.records.entry(region_id.to_string()).or_default();
        record.last_run_time = now_ms;
        record.run_count = record.run_count.saturating_add(1);
        *record
    }

    /// Record of a region, if it ever ran
    pub fn get(&self, region_id: &str) -> Option<&RegionRecord> {
        self.records.get(region_id)
    }

    /// Number of runs of a region
    pub fn run_count(&self, region_id: &str) -> u32 {
        self.get(region_id).map_or(0, |r| r.run_count)
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Whether no region has run yet
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of regions that ran at least once
    pub fn len(&self) -> usize {
        self.records.len()
    }
}
