//! Failure policies and failure bookkeeping for a run.
//!
//! Each stage declares what its failed instances mean for the run:
//! fail-fast (stop dispatching, let running instances finish) or ignore
//! (record and carry on).

use crate::errors::ExecutionError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How to handle a failed instance of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop the run on the first failure (default).
    #[default]
    FailFast,
    /// Record the failure; siblings and the run continue.
    Ignore,
}

/// Record of a failed stage instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Stage name.
    pub stage: String,
    /// Instance key.
    pub key: String,
    /// What went wrong.
    pub error: ExecutionError,
    /// The stage's policy at the time.
    pub policy: FailurePolicy,
    /// Working directory, kept for inspection.
    pub work_dir: Option<String>,
    /// When the failure was observed.
    pub timestamp: DateTime<Utc>,
}

impl FailureRecord {
    /// Creates a new failure record.
    #[must_use]
    pub fn new(
        stage: impl Into<String>,
        key: impl Into<String>,
        error: ExecutionError,
        policy: FailurePolicy,
    ) -> Self {
        Self {
            stage: stage.into(),
            key: key.into(),
            error,
            policy,
            work_dir: None,
            timestamp: Utc::now(),
        }
    }

    /// Sets the working directory.
    #[must_use]
    pub fn with_work_dir(mut self, dir: impl Into<String>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    /// Returns true if this failure aborts the run.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.policy == FailurePolicy::FailFast
            && !matches!(self.error, ExecutionError::Cancelled { .. })
    }
}

/// Collects failures during a run.
#[derive(Debug, Default)]
pub struct FailureCollector {
    failures: Vec<FailureRecord>,
    failed_stages: BTreeSet<String>,
    fatal: bool,
}

impl FailureCollector {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failure; returns true if it is the first fatal one.
    pub fn record(&mut self, record: FailureRecord) -> bool {
        let first_fatal = record.is_fatal() && !self.fatal;
        self.fatal |= record.is_fatal();
        self.failed_stages.insert(record.stage.clone());
        self.failures.push(record);
        first_fatal
    }

    /// Returns true if dispatching must stop.
    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.fatal
    }

    /// Returns true if any instance of `stage` failed.
    #[must_use]
    pub fn has_failed(&self, stage: &str) -> bool {
        self.failed_stages.contains(stage)
    }

    /// All failures in observation order.
    #[must_use]
    pub fn failures(&self) -> &[FailureRecord] {
        &self.failures
    }

    /// Consumes the collector.
    #[must_use]
    pub fn into_failures(self) -> Vec<FailureRecord> {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exit_error() -> ExecutionError {
        ExecutionError::NonZeroExit {
            code: 1,
            stderr_tail: "boom".to_string(),
        }
    }

    #[test]
    fn test_fail_fast_stops() {
        let mut collector = FailureCollector::new();
        assert!(!collector.should_stop());

        let first = collector.record(FailureRecord::new("align", "S1", exit_error(), FailurePolicy::FailFast));
        assert!(first);
        assert!(collector.should_stop());
        assert!(collector.has_failed("align"));

        let second = collector.record(FailureRecord::new("align", "S2", exit_error(), FailurePolicy::FailFast));
        assert!(!second);
        assert_eq!(collector.failures().len(), 2);
    }

    #[test]
    fn test_ignore_does_not_stop() {
        let mut collector = FailureCollector::new();
        collector.record(FailureRecord::new("qc", "S1", exit_error(), FailurePolicy::Ignore));

        assert!(!collector.should_stop());
        assert!(collector.has_failed("qc"));
    }

    #[test]
    fn test_cancellation_is_not_fatal() {
        let record = FailureRecord::new(
            "align",
            "S1",
            ExecutionError::Cancelled {
                reason: "ctrl-c".to_string(),
            },
            FailurePolicy::FailFast,
        );
        assert!(!record.is_fatal());
    }

    #[test]
    fn test_record_serializes() {
        let record = FailureRecord::new("align", "S1", exit_error(), FailurePolicy::FailFast)
            .with_work_dir("/work/run/align/S1");
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["error"]["kind"], "non_zero_exit");
        assert_eq!(json["policy"], "fail_fast");
        assert_eq!(json["work_dir"], "/work/run/align/S1");
    }
}
