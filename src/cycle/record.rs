//! Append-only log of cycle invocations.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Default number of records kept in memory.
pub const DEFAULT_CYCLE_LOG_CAPACITY: usize = 1_000;

/// One cycle invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleRecord {
    pub id: String,
    /// Cycle name, e.g. `"micro_evolution"`.
    pub cycle: String,
    pub recorded_at: DateTime<Utc>,
    /// Free-form summary of what the cycle changed.
    pub changes: Value,
}

impl CycleRecord {
    pub fn new(cycle: impl Into<String>, changes: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            cycle: cycle.into(),
            recorded_at: Utc::now(),
            changes,
        }
    }
}

/// In-memory cycle log, newest last. Only the most recent `capacity`
/// records are retained.
#[derive(Debug)]
pub struct CycleLog {
    records: RwLock<VecDeque<CycleRecord>>,
    capacity: usize,
}

impl Default for CycleLog {
    fn default() -> Self {
        Self::new(DEFAULT_CYCLE_LOG_CAPACITY)
    }
}

impl CycleLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: RwLock::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
        }
    }

    pub fn append(&self, record: CycleRecord) {
        let mut records = self.records.write();
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Most recent record for `cycle`.
    pub fn last(&self, cycle: &str) -> Option<CycleRecord> {
        self.records
            .read()
            .iter()
            .rev()
            .find(|r| r.cycle == cycle)
            .cloned()
    }

    /// Elapsed time since `cycle` last ran, if it ever did.
    pub fn time_since_last(&self, cycle: &str, now: DateTime<Utc>) -> Option<Duration> {
        self.last(cycle).map(|r| now - r.recorded_at)
    }

    /// Up to `limit` most recent records, newest first.
    pub fn recent(&self, limit: usize) -> Vec<CycleRecord> {
        self.records.read().iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_per_cycle() {
        let log = CycleLog::default();
        log.append(CycleRecord::new("micro", serde_json::json!({"n": 1})));
        log.append(CycleRecord::new("major", serde_json::json!({"n": 2})));
        log.append(CycleRecord::new("micro", serde_json::json!({"n": 3})));

        assert_eq!(log.last("micro").unwrap().changes["n"], 3);
        assert_eq!(log.last("major").unwrap().changes["n"], 2);
        assert!(log.last("other").is_none());
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let log = CycleLog::new(2);
        for n in 0..5 {
            log.append(CycleRecord::new("micro", serde_json::json!({ "n": n })));
        }
        assert_eq!(log.len(), 2);
        let recent = log.recent(10);
        assert_eq!(recent[0].changes["n"], 4);
        assert_eq!(recent[1].changes["n"], 3);
    }

    #[test]
    fn test_time_since_last() {
        let log = CycleLog::default();
        let now = Utc::now();
        assert!(log.time_since_last("micro", now).is_none());

        let mut record = CycleRecord::new("micro", Value::Null);
        record.recorded_at = now - Duration::minutes(5);
        log.append(record);
        assert_eq!(
            log.time_since_last("micro", now),
            Some(Duration::minutes(5))
        );
    }
}
