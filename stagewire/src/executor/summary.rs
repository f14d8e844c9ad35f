//! The serializable report of a finished run.

use crate::core::{Item, RunStatus};
use crate::pipeline::FailureRecord;
use crate::sandbox::PublishFailure;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Terminal instance counts of one stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCounts {
    /// Instances that succeeded.
    pub succeeded: usize,
    /// Instances that failed, under any policy.
    pub failed: usize,
    /// Instances that never ran or were killed by the abort.
    pub cancelled: usize,
}

impl StageCounts {
    /// Total instances created.
    #[must_use]
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.cancelled
    }
}

/// Items left in a key join with no partner on another input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnmatchedItem {
    /// Stage name.
    pub stage: String,
    /// Input port holding the item.
    pub port: String,
    /// The item's key.
    pub key: String,
}

/// Outcome of [`Executor::run`](super::Executor::run).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique, time-ordered run id.
    pub run_id: Uuid,
    /// Pipeline name.
    pub pipeline: String,
    /// Final status.
    pub status: RunStatus,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// End time.
    pub finished_at: DateTime<Utc>,
    /// Wall-clock duration.
    pub duration_ms: u64,
    /// Counts per live stage.
    pub stages: BTreeMap<String, StageCounts>,
    /// Every failed instance, in observation order.
    pub failures: Vec<FailureRecord>,
    /// Outputs that could not be copied to the publish root.
    pub publish_failures: Vec<PublishFailure>,
    /// Join leftovers.
    pub unmatched: Vec<UnmatchedItem>,
    /// Stages that never ran because a broadcast input closed without a value.
    pub starved: Vec<String>,
    /// Nodes removed by gating.
    pub pruned: Vec<String>,
    /// Items emitted per stream id; broadcast lists are flattened.
    pub outputs: BTreeMap<String, Vec<Item>>,
    /// Reason given to the cancellation token, if any.
    pub cancel_reason: Option<String>,
}

impl RunSummary {
    /// Returns true if the run succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    /// Items emitted on a stream; empty if none.
    #[must_use]
    pub fn outputs(&self, stream: &str) -> &[Item] {
        self.outputs.get(stream).map_or(&[], Vec::as_slice)
    }

    /// Counts of one stage; zero if it never had instances.
    #[must_use]
    pub fn counts(&self, stage: &str) -> StageCounts {
        self.stages.get(stage).copied().unwrap_or_default()
    }

    /// Pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Serialization errors.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_accessors_and_json() {
        let now = Utc::now();
        let summary = RunSummary {
            run_id: Uuid::now_v7(),
            pipeline: "chipseq".to_string(),
            status: RunStatus::Succeeded,
            started_at: now,
            finished_at: now,
            duration_ms: 12,
            stages: BTreeMap::from([(
                "align".to_string(),
                StageCounts {
                    succeeded: 3,
                    ..StageCounts::default()
                },
            )]),
            failures: Vec::new(),
            publish_failures: Vec::new(),
            unmatched: Vec::new(),
            starved: Vec::new(),
            pruned: vec!["peaks".to_string()],
            outputs: BTreeMap::from([("align.bam".to_string(), vec![Item::new("S1")])]),
            cancel_reason: None,
        };

        assert!(summary.is_success());
        assert_eq!(summary.counts("align").total(), 3);
        assert_eq!(summary.counts("missing"), StageCounts::default());
        assert_eq!(summary.outputs("align.bam").len(), 1);
        assert!(summary.outputs("nope").is_empty());

        let json: serde_json::Value = serde_json::from_str(&summary.to_json().unwrap()).unwrap();
        assert_eq!(json["status"], "succeeded");
        assert_eq!(json["pruned"][0], "peaks");
    }
}
