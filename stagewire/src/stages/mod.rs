//! Stage definitions.
//!
//! A [`StageDef`] is a stateless template: typed input and output ports, a
//! gate over the parameter store, and a command body. The scheduler creates
//! one instance per input item (or per key across several multi inputs).

mod gate;
mod ports;

pub use gate::Gate;
pub use ports::{InputPort, OutputPort};

use crate::core::{PortType, Shape};
use crate::pipeline::FailurePolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A named processing step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDef {
    /// Stage name; unique within the graph.
    pub name: String,
    /// Input ports in declaration order.
    #[serde(default)]
    pub inputs: Vec<InputPort>,
    /// Output ports in declaration order.
    #[serde(default)]
    pub outputs: Vec<OutputPort>,
    /// Inclusion predicate.
    #[serde(default)]
    pub gate: Gate,
    /// The command template and its size variants.
    pub body: Body,
    /// What a failed instance does to the run.
    #[serde(default)]
    pub policy: FailurePolicy,
    /// Kill the process after this many milliseconds; zero is rejected.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Exposed to templates as `task.cpus`.
    #[serde(default = "default_cpus")]
    pub cpus: u32,
}

fn default_cpus() -> u32 {
    1
}

impl StageDef {
    /// Creates a stage with a single command and no ports.
    #[must_use]
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            gate: Gate::Always,
            body: Body::new(command),
            policy: FailurePolicy::FailFast,
            timeout_ms: None,
            cpus: default_cpus(),
        }
    }

    /// Adds an input port.
    #[must_use]
    pub fn with_input(
        mut self,
        name: impl Into<String>,
        source: impl Into<String>,
        ty: PortType,
    ) -> Self {
        self.inputs.push(InputPort::new(name, source, ty));
        self
    }

    /// Adds a fully specified input port.
    #[must_use]
    pub fn with_input_port(mut self, port: InputPort) -> Self {
        self.inputs.push(port);
        self
    }

    /// Adds a required output.
    #[must_use]
    pub fn with_output(
        mut self,
        name: impl Into<String>,
        pattern: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        self.outputs.push(OutputPort::new(name, pattern, kind));
        self
    }

    /// Adds a fully specified output port.
    #[must_use]
    pub fn with_output_port(mut self, port: OutputPort) -> Self {
        self.outputs.push(port);
        self
    }

    /// Sets the gate.
    #[must_use]
    pub fn with_gate(mut self, gate: Gate) -> Self {
        self.gate = gate;
        self
    }

    /// Sets the failure policy.
    #[must_use]
    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the process timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Sets the CPU hint.
    #[must_use]
    pub fn with_cpus(mut self, cpus: u32) -> Self {
        self.cpus = cpus;
        self
    }

    /// Adds a size variant.
    #[must_use]
    pub fn with_variant(mut self, when: SizeRule, command: impl Into<String>) -> Self {
        self.body.variants.push(Variant {
            when,
            command: command.into(),
        });
        self
    }

    /// Looks up an input port.
    #[must_use]
    pub fn input(&self, name: &str) -> Option<&InputPort> {
        self.inputs.iter().find(|p| p.name == name)
    }

    /// Looks up an output port.
    #[must_use]
    pub fn output(&self, name: &str) -> Option<&OutputPort> {
        self.outputs.iter().find(|p| p.name == name)
    }

    /// The process timeout.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Command template plus alternatives chosen by input size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Body {
    /// The default command template.
    pub command: String,
    /// Size variants, first match wins.
    #[serde(default)]
    pub variants: Vec<Variant>,
}

impl Body {
    /// A body without variants.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            variants: Vec::new(),
        }
    }

    /// Picks the command for the given list-input sizes.
    ///
    /// `size_of` returns the item count of a list port, `None` if unbound.
    #[must_use]
    pub fn select<F>(&self, size_of: F) -> &str
    where
        F: Fn(&str) -> Option<usize>,
    {
        self.variants
            .iter()
            .find(|v| size_of(v.when.input()).is_some_and(|n| v.when.matches(n)))
            .map_or(self.command.as_str(), |v| v.command.as_str())
    }
}

/// An alternative command selected by the size of a list input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    /// Selection rule.
    pub when: SizeRule,
    /// Command template.
    pub command: String,
}

/// Condition on the number of items in a list input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum SizeRule {
    /// Exactly `n` items.
    Exactly {
        /// List input port.
        input: String,
        /// Item count.
        n: usize,
    },
    /// At least `n` items.
    AtLeast {
        /// List input port.
        input: String,
        /// Minimum item count.
        n: usize,
    },
}

impl SizeRule {
    /// `input` holds exactly `n` items.
    #[must_use]
    pub fn exactly(input: impl Into<String>, n: usize) -> Self {
        Self::Exactly {
            input: input.into(),
            n,
        }
    }

    /// `input` holds at least `n` items.
    #[must_use]
    pub fn at_least(input: impl Into<String>, n: usize) -> Self {
        Self::AtLeast {
            input: input.into(),
            n,
        }
    }

    /// The list input the rule inspects.
    #[must_use]
    pub fn input(&self) -> &str {
        match self {
            Self::Exactly { input, .. } | Self::AtLeast { input, .. } => input,
        }
    }

    /// Returns true if `size` satisfies the rule.
    #[must_use]
    pub fn matches(&self, size: usize) -> bool {
        match self {
            Self::Exactly { n, .. } => size == *n,
            Self::AtLeast { n, .. } => size >= *n,
        }
    }
}

/// Returns true if `port` is list-shaped; size variants may only inspect those.
pub(crate) fn is_list_port(stage: &StageDef, port: &str) -> bool {
    stage.input(port).is_some_and(|p| p.ty.shape == Shape::List)
}
