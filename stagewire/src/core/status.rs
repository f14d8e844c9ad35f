//! Instance and run status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a single stage instance.
///
/// `Pending → Ready → Running → {Succeeded, Failed}`. `Cancelled` is reached
/// from `Pending`/`Ready` when the run aborts before dispatch, or from
/// `Running` when an external cancellation kills the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    /// Created; some inputs are still missing.
    #[default]
    Pending,
    /// All inputs available; waiting for a worker.
    Ready,
    /// The external command is executing.
    Running,
    /// Finished with all required outputs present.
    Succeeded,
    /// The command failed or produced no required output.
    Failed,
    /// Never ran, or was terminated, because the run was aborted.
    Cancelled,
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Ready => write!(f, "ready"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl InstanceState {
    /// Returns true if the state is final.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Returns true if the transition `self → next` is allowed.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Ready | Self::Cancelled)
                | (Self::Ready, Self::Running | Self::Cancelled)
                | (Self::Running, Self::Succeeded | Self::Failed | Self::Cancelled)
        )
    }

    /// The event name emitted on entering this state.
    #[must_use]
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Pending => "instance.pending",
            Self::Ready => "instance.ready",
            Self::Running => "instance.running",
            Self::Succeeded => "instance.succeeded",
            Self::Failed => "instance.failed",
            Self::Cancelled => "instance.cancelled",
        }
    }
}

/// Final outcome of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every reachable instance succeeded (ignored failures aside).
    Succeeded,
    /// A fail-fast instance failed.
    Failed,
    /// The run was cancelled externally.
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}
