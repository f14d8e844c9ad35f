//! Stream combinators: fan-out, collect, cross product and mix.

use super::DEFAULT_PORT;
use crate::core::Item;
use serde::{Deserialize, Deserializer, Serialize};

/// A named combinator node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Combinator {
    /// Node name.
    pub name: String,
    /// The operation.
    #[serde(flatten)]
    pub op: CombinatorOp,
}

/// Combinator operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CombinatorOp {
    /// Replicates every item onto `n` outputs named `0..n`.
    FanOut {
        /// Source stream.
        source: String,
        /// Number of replicas.
        n: usize,
    },
    /// Waits for the source to drain and emits one list as a broadcast value.
    Collect {
        /// Source stream.
        source: String,
        /// Stable ordering; completion order when absent.
        #[serde(default)]
        sort: Option<SortKey>,
    },
    /// Emits one derived item per (item, literal) pair.
    CrossProduct {
        /// Source stream.
        source: String,
        /// Literal values; numbers are kept in their textual form.
        #[serde(deserialize_with = "literal_strings")]
        values: Vec<String>,
        /// Tag receiving the literal.
        tag: String,
    },
    /// Interleaves several same-typed streams.
    Mix {
        /// Source streams.
        sources: Vec<String>,
    },
}

impl Combinator {
    /// `fan_out(source, n)`.
    #[must_use]
    pub fn fan_out(name: impl Into<String>, source: impl Into<String>, n: usize) -> Self {
        Self {
            name: name.into(),
            op: CombinatorOp::FanOut {
                source: source.into(),
                n,
            },
        }
    }

    /// `collect(source)`, optionally sorted.
    #[must_use]
    pub fn collect(
        name: impl Into<String>,
        source: impl Into<String>,
        sort: Option<SortKey>,
    ) -> Self {
        Self {
            name: name.into(),
            op: CombinatorOp::Collect {
                source: source.into(),
                sort,
            },
        }
    }

    /// `cross_product(source, values)` tagging each derived item with `tag`.
    #[must_use]
    pub fn cross_product<I, S>(
        name: impl Into<String>,
        source: impl Into<String>,
        values: I,
        tag: impl Into<String>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            op: CombinatorOp::CrossProduct {
                source: source.into(),
                values: values.into_iter().map(Into::into).collect(),
                tag: tag.into(),
            },
        }
    }

    /// `mix(sources...)`.
    #[must_use]
    pub fn mix<I, S>(name: impl Into<String>, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            op: CombinatorOp::Mix {
                sources: sources.into_iter().map(Into::into).collect(),
            },
        }
    }

    /// Referenced source streams, in declaration order.
    #[must_use]
    pub fn sources(&self) -> Vec<&str> {
        match &self.op {
            CombinatorOp::FanOut { source, .. }
            | CombinatorOp::Collect { source, .. }
            | CombinatorOp::CrossProduct { source, .. } => vec![source.as_str()],
            CombinatorOp::Mix { sources } => sources.iter().map(String::as_str).collect(),
        }
    }

    /// Output port names.
    #[must_use]
    pub fn output_ports(&self) -> Vec<String> {
        match &self.op {
            CombinatorOp::FanOut { n, .. } => (0..*n).map(|i| i.to_string()).collect(),
            _ => vec![DEFAULT_PORT.to_string()],
        }
    }

    /// Short operation name for logs and events.
    #[must_use]
    pub fn op_name(&self) -> &'static str {
        match self.op {
            CombinatorOp::FanOut { .. } => "fan_out",
            CombinatorOp::Collect { .. } => "collect",
            CombinatorOp::CrossProduct { .. } => "cross_product",
            CombinatorOp::Mix { .. } => "mix",
        }
    }
}

/// Derives the cross-product items for one upstream item.
///
/// Each derived item keeps the files, gets key `"{key}_{value}"` and the
/// literal under `tag`.
#[must_use]
pub(crate) fn cross(item: &Item, values: &[String], tag: &str) -> Vec<Item> {
    values
        .iter()
        .map(|value| {
            let mut derived = item.clone();
            derived.key = format!("{}_{value}", item.key);
            derived.tags.insert(tag.to_string(), value.clone());
            derived
        })
        .collect()
}

/// Stable ordering applied by `collect`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum SortKey {
    /// Order by item key.
    Key,
    /// Order by a tag value; items without the tag sort first.
    Tag {
        /// Tag name.
        name: String,
    },
    /// Order by the first file's base name.
    FileName,
}

impl SortKey {
    /// Sorts items in place; ties keep completion order.
    pub fn sort(&self, items: &mut [Item]) {
        match self {
            Self::Key => items.sort_by(|a, b| a.key.cmp(&b.key)),
            Self::Tag { name } => {
                items.sort_by(|a, b| a.tag(name).unwrap_or("").cmp(b.tag(name).unwrap_or("")));
            }
            Self::FileName => items.sort_by_cached_key(|i| i.file_names().into_iter().next()),
        }
    }
}

fn literal_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|value| match value {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        })
        .collect())
}
