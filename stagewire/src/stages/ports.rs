//! Typed input and output ports of a stage.

use crate::core::{PortType, StreamValue};
use serde::{Deserialize, Serialize};

/// A typed input slot wired to one upstream stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputPort {
    /// Port name, used in templates as `inputs.<name>`.
    pub name: String,
    /// Stream reference, `"node"` or `"node.port"`.
    pub source: String,
    /// Expected type.
    #[serde(flatten)]
    pub ty: PortType,
    /// Value used when the producer is gated off.
    #[serde(default)]
    pub default: Option<StreamValue>,
}

impl InputPort {
    /// Creates a port.
    #[must_use]
    pub fn new(name: impl Into<String>, source: impl Into<String>, ty: PortType) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            ty,
            default: None,
        }
    }

    /// Sets the fallback value used when the producer is pruned.
    #[must_use]
    pub fn with_default(mut self, value: StreamValue) -> Self {
        self.default = Some(value);
        self
    }
}

/// A declared output: files matching `pattern` become one item per instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputPort {
    /// Port name; the stream is `"<stage>.<name>"`.
    pub name: String,
    /// Glob pattern, rendered as a template first (`"{{ prefix }}.bam"`).
    pub pattern: String,
    /// Item kind.
    pub kind: String,
    /// Zero matches is `MissingOutput` when true.
    #[serde(default = "default_required")]
    pub required: bool,
    /// Copy matches to the publish root.
    #[serde(default)]
    pub publish: bool,
}

fn default_required() -> bool {
    true
}

impl OutputPort {
    /// Creates a required, unpublished output.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        pattern: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
            kind: kind.into(),
            required: true,
            publish: false,
        }
    }

    /// Allows zero matches.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Publishes matched files.
    #[must_use]
    pub fn published(mut self) -> Self {
        self.publish = true;
        self
    }

    /// Outputs always carry single items.
    #[must_use]
    pub fn port_type(&self) -> PortType {
        PortType::item(self.kind.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Item, Shape};

    #[test]
    fn test_input_port_json() {
        let json = r#"{"name":"bams","source":"all","kind":"bam","shape":"list","default":{"list":[]}}"#;
        let port: InputPort = serde_json::from_str(json).unwrap();

        assert_eq!(port.ty.shape, Shape::List);
        assert_eq!(port.default, Some(StreamValue::List(Vec::new())));
    }

    #[test]
    fn test_output_port_defaults() {
        let port: OutputPort =
            serde_json::from_str(r#"{"name":"bam","pattern":"*.bam","kind":"bam"}"#).unwrap();
        assert!(port.required);
        assert!(!port.publish);
        assert_eq!(port.port_type(), PortType::item("bam"));

        let optional = OutputPort::new("log", "*.log", "log").optional().published();
        assert!(!optional.required && optional.publish);
    }

    #[test]
    fn test_input_default_item() {
        let port = InputPort::new("control", "ctl", PortType::item("bam"))
            .with_default(StreamValue::Item(Item::new("none")));
        assert!(port.default.is_some());
    }
}
