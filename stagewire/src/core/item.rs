//! Stream items and port types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// One element flowing through a stream.
///
/// The `key` is declared at ingestion (sample id, analysis id, ...) and
/// carried unchanged through every stage, so per-sample prefixes never have
/// to be reconstructed from file names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Identifier used for pairing and for naming derived files.
    pub key: String,
    /// File handles in declaration order.
    #[serde(default)]
    pub files: Vec<PathBuf>,
    /// Small string annotations (record fields, cross-product values).
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl Item {
    /// Creates an item with no files.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            files: Vec::new(),
            tags: BTreeMap::new(),
        }
    }

    /// Adds a file.
    #[must_use]
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.push(path.into());
        self
    }

    /// Replaces the files.
    #[must_use]
    pub fn with_files<I, P>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.files = files.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a tag.
    #[must_use]
    pub fn with_tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(name.into(), value.into());
        self
    }

    /// Returns a tag value.
    #[must_use]
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags.get(name).map(String::as_str)
    }

    /// Base names of the files, as they appear inside a sandbox.
    #[must_use]
    pub fn file_names(&self) -> Vec<String> {
        self.files.iter().map(|p| file_name(p)).collect()
    }
}

pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}

/// Whether a port carries single items or aggregated lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    /// One item per value.
    #[default]
    Item,
    /// A list of items produced by `collect`.
    List,
}

/// The declared type of a stream or port: an item kind plus a shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortType {
    /// Item kind, e.g. `"bam"`. `"any"` is compatible with every kind.
    pub kind: String,
    /// Item or list.
    #[serde(default)]
    pub shape: Shape,
}

impl PortType {
    /// The wildcard kind.
    pub const ANY: &'static str = "any";

    /// An item-shaped type.
    #[must_use]
    pub fn item(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            shape: Shape::Item,
        }
    }

    /// A list-shaped type.
    #[must_use]
    pub fn list(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            shape: Shape::List,
        }
    }

    /// The list type produced by collecting this type.
    #[must_use]
    pub fn collected(&self) -> Self {
        Self::list(self.kind.clone())
    }

    /// Returns true if a producer of `self` may feed a consumer expecting `expected`.
    #[must_use]
    pub fn feeds(&self, expected: &Self) -> bool {
        self.shape == expected.shape
            && (self.kind == expected.kind || self.kind == Self::ANY || expected.kind == Self::ANY)
    }
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.shape {
            Shape::Item => write!(f, "{}", self.kind),
            Shape::List => write!(f, "list<{}>", self.kind),
        }
    }
}

/// A value held by a broadcast stream, or bound to an instance's input port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamValue {
    /// A single item.
    Item(Item),
    /// An aggregated list.
    List(Vec<Item>),
}

impl StreamValue {
    /// The items held, one for `Item`.
    #[must_use]
    pub fn items(&self) -> &[Item] {
        match self {
            Self::Item(item) => std::slice::from_ref(item),
            Self::List(items) => items,
        }
    }

    /// The shape of the value.
    #[must_use]
    pub fn shape(&self) -> Shape {
        match self {
            Self::Item(_) => Shape::Item,
            Self::List(_) => Shape::List,
        }
    }

    /// Number of items held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items().len()
    }

    /// Returns true for an empty list.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }
}
