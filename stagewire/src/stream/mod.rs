//! Streams, seeds and combinators.
//!
//! A stream is addressed as `"node.port"`; a bare `"node"` names the node's
//! only output. Multi streams carry one item per upstream emission and feed
//! exactly one consumer. Broadcast streams hold a single value that any
//! number of consumers may read.

mod combinator;
mod seed;

pub(crate) use combinator::cross;
pub use combinator::{Combinator, CombinatorOp, SortKey};
pub use seed::{discover, from_seed, parse_records, read_records, RecordLayout, Seed};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Port name used by seeds and single-output combinators.
pub const DEFAULT_PORT: &str = "out";

/// How a stream delivers its items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Flavor {
    /// A sequence of items, each delivered once to the single consumer.
    #[default]
    Multi,
    /// One stable value replayed to every consumer.
    Broadcast,
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Multi => write!(f, "multi"),
            Self::Broadcast => write!(f, "broadcast"),
        }
    }
}

/// A parsed stream reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamRef {
    /// Producing node.
    pub node: String,
    /// Output port, `None` for the node's only output.
    pub port: Option<String>,
}

impl StreamRef {
    /// Parses `"node"` or `"node.port"`.
    #[must_use]
    pub fn parse(reference: &str) -> Self {
        match reference.split_once('.') {
            Some((node, port)) => Self {
                node: node.to_string(),
                port: Some(port.to_string()),
            },
            None => Self {
                node: reference.to_string(),
                port: None,
            },
        }
    }
}

/// Canonical stream id for a node output.
#[must_use]
pub fn stream_id(node: &str, port: &str) -> String {
    format!("{node}.{port}")
}
