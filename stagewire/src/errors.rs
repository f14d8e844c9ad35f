//! Error types for the stagewire engine.
//!
//! Errors fall into two groups. Startup and build-time errors
//! ([`ValidationError`], [`UnknownParameterError`], [`EmptySeedError`],
//! [`WiringError`]) abort before any stage runs. [`ExecutionError`] is raised
//! by a single stage instance at run time and is routed through the
//! scheduler's failure policy instead of being returned directly.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for stagewire operations.
#[derive(Debug, Error)]
pub enum StagewireError {
    /// Bad or inconsistent configuration.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// A parameter was read that has neither a default nor an override.
    #[error("{0}")]
    UnknownParameter(#[from] UnknownParameterError),

    /// A required seed stream turned out empty.
    #[error("{0}")]
    EmptySeed(#[from] EmptySeedError),

    /// The graph is inconsistent.
    #[error("{0}")]
    Wiring(#[from] WiringError),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for StagewireError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Metadata about a build-time error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "WIRING-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Raised when configuration or seed input is invalid.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ValidationError {
    /// The error message.
    pub message: String,
    /// Parameters or seeds involved in the error.
    pub subjects: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl ValidationError {
    /// Creates a new validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            subjects: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the parameters or seeds involved.
    #[must_use]
    pub fn with_subjects(mut self, subjects: Vec<String>) -> Self {
        self.subjects = subjects;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }
}

/// Raised when a parameter has no default and no override.
#[derive(Debug, Clone, Error)]
#[error("Unknown parameter '{name}': no default and no override")]
pub struct UnknownParameterError {
    /// The parameter name.
    pub name: String,
}

impl UnknownParameterError {
    /// Creates a new unknown parameter error.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Raised when a required seed stream produced no items.
#[derive(Debug, Clone, Error)]
#[error("Seed '{seed}' is required but produced no items")]
pub struct EmptySeedError {
    /// The seed name.
    pub seed: String,
}

impl EmptySeedError {
    /// Creates a new empty seed error.
    #[must_use]
    pub fn new(seed: impl Into<String>) -> Self {
        Self { seed: seed.into() }
    }
}

/// Raised when the graph cannot be wired.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct WiringError {
    /// The error message.
    pub message: String,
    /// The nodes involved in the error.
    pub nodes: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl WiringError {
    /// Creates a new wiring error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            nodes: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the nodes involved.
    #[must_use]
    pub fn with_nodes(mut self, nodes: Vec<String>) -> Self {
        self.nodes = nodes;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }
}

/// Raised when a cycle is detected in the graph.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected in graph: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of nodes forming the cycle.
    pub cycle_path: Vec<String>,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        let info = ContractErrorInfo::new(
            "WIRING-CYCLE",
            format!("Graph contains a stream cycle: {}", cycle_path.join(" -> ")),
        )
        .with_fix_hint("Streams must flow forward; break the loop by removing one input.");

        Self {
            cycle_path,
            error_info: info,
        }
    }
}

impl From<CycleDetectedError> for WiringError {
    fn from(err: CycleDetectedError) -> Self {
        Self {
            message: err.to_string(),
            nodes: err.cycle_path.clone(),
            error_info: Some(err.error_info),
        }
    }
}

/// Failure of a single stage instance inside its sandbox.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionError {
    /// The command template could not be rendered.
    #[error("Template error: {message}")]
    Template {
        /// Renderer message.
        message: String,
    },

    /// Inputs could not be placed into the working directory.
    #[error("Failed to materialize input '{file}': {message}")]
    Materialize {
        /// The offending file.
        file: String,
        /// The reason.
        message: String,
    },

    /// The process could not be started.
    #[error("Failed to spawn process: {message}")]
    Spawn {
        /// The reason.
        message: String,
    },

    /// The process exited with a nonzero status.
    #[error("Process exited with status {code}: {stderr_tail}")]
    NonZeroExit {
        /// Exit code (-1 when terminated by a signal).
        code: i32,
        /// The last lines of standard error.
        stderr_tail: String,
    },

    /// The process ran past its deadline and was killed.
    #[error("Process timed out after {millis}ms")]
    Timeout {
        /// The configured timeout in milliseconds.
        millis: u64,
    },

    /// A required output pattern matched nothing.
    #[error("Required output '{port}' matched no files for pattern '{pattern}'")]
    MissingOutput {
        /// The output port.
        port: String,
        /// The glob pattern.
        pattern: String,
    },

    /// The instance was terminated by run cancellation.
    #[error("Cancelled: {reason}")]
    Cancelled {
        /// The cancellation reason.
        reason: String,
    },

    /// Filesystem failure in the sandbox itself.
    #[error("Sandbox IO error: {message}")]
    Io {
        /// The reason.
        message: String,
    },
}

impl ExecutionError {
    /// Short machine-readable name of the variant.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Template { .. } => "template",
            Self::Materialize { .. } => "materialize",
            Self::Spawn { .. } => "spawn",
            Self::NonZeroExit { .. } => "non_zero_exit",
            Self::Timeout { .. } => "timeout",
            Self::MissingOutput { .. } => "missing_output",
            Self::Cancelled { .. } => "cancelled",
            Self::Io { .. } => "io",
        }
    }
}

impl From<std::io::Error> for ExecutionError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

/// Provides default suggestions for common contract error codes.
pub struct ContractSuggestions;

impl ContractSuggestions {
    /// Gets a suggestion for a given error code.
    #[must_use]
    pub fn get(code: &str) -> Option<&'static str> {
        match code {
            "WIRING-CYCLE" => Some(
                "Check stage inputs for circular references. \
                 Every stream must be produced upstream of its consumer.",
            ),
            "WIRING-MISSING-PRODUCER" => Some(
                "Ensure every input references a seed, stage output, or combinator \
                 that exists. Check for typos in stream names.",
            ),
            "WIRING-SHARED-MULTI" => Some(
                "A multi stream feeds exactly one consumer. \
                 Insert a fan_out combinator to duplicate it.",
            ),
            "WIRING-TYPE-MISMATCH" => Some(
                "Producer and consumer must agree on item kind and shape. \
                 Use collect to turn an item stream into a list.",
            ),
            "WIRING-PRUNED-DEPENDENCY" => Some(
                "A gated-off stage feeds a consumer with other live inputs. \
                 Declare a default on the input port or gate the consumer too.",
            ),
            "WIRING-AMBIGUOUS-REFERENCE" => Some(
                "The producer has several outputs. Name the port explicitly as 'node.port'.",
            ),
            "WIRING-DUPLICATE-NODE" => Some("Node names must be unique within a pipeline."),
            "WIRING-DUPLICATE-PORT" => Some("Port names must be unique within a stage."),
            "WIRING-INVALID-NAME" => {
                Some("Names must be non-empty and may not contain '.' or '/'.")
            }
            "WIRING-INVALID-COMBINATOR" => Some(
                "fan_out needs n >= 1, cross_product needs values and mix needs sources.",
            ),
            "WIRING-INVALID-TIMEOUT" => {
                Some("Timeouts are given in milliseconds and must be positive.")
            }
            "WIRING-VARIANT-INPUT" => {
                Some("Size variants may only inspect list-shaped inputs (fed by collect).")
            }
            "WIRING-EMPTY" => Some("Add at least one stage to the graph before building."),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_error_info_creation() {
        let info = ContractErrorInfo::new("TEST-001", "Test error")
            .with_fix_hint("Fix this by doing that")
            .with_context_entry("stage", "align");

        assert_eq!(info.code, "TEST-001");
        assert_eq!(info.summary, "Test error");
        assert_eq!(info.fix_hint, Some("Fix this by doing that".to_string()));
        assert_eq!(info.context.get("stage"), Some(&"align".to_string()));
    }

    #[test]
    fn test_cycle_detected_error() {
        let err = CycleDetectedError::new(vec![
            "a".to_string(),
            "b".to_string(),
            "c".to_string(),
            "a".to_string(),
        ]);

        assert!(err.to_string().contains("a -> b -> c -> a"));
        assert_eq!(err.error_info.code, "WIRING-CYCLE");

        let wiring: WiringError = err.into();
        assert_eq!(wiring.code(), Some("WIRING-CYCLE"));
    }

    #[test]
    fn test_execution_error_kind() {
        let err = ExecutionError::MissingOutput {
            port: "bam".to_string(),
            pattern: "*.bam".to_string(),
        };
        assert_eq!(err.kind(), "missing_output");
        assert!(err.to_string().contains("*.bam"));
    }

    #[test]
    fn test_execution_error_serializes_with_kind_tag() {
        let err = ExecutionError::NonZeroExit {
            code: 2,
            stderr_tail: "boom".to_string(),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "non_zero_exit");
        assert_eq!(json["code"], 2);
    }

    #[test]
    fn test_contract_suggestions() {
        assert!(ContractSuggestions::get("WIRING-CYCLE").is_some());
        assert!(ContractSuggestions::get("UNKNOWN").is_none());
    }
}
