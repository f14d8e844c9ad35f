//! Parameter value and kind types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// The declared kind of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    /// A boolean flag.
    Bool,
    /// A floating point or integral number.
    Number,
    /// Free text.
    #[default]
    String,
    /// A filesystem path.
    Path,
    /// A small structured record (e.g. a reference bundle).
    Record,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "bool"),
            Self::Number => write!(f, "number"),
            Self::String => write!(f, "string"),
            Self::Path => write!(f, "path"),
            Self::Record => write!(f, "record"),
        }
    }
}

/// A resolved parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// A boolean.
    Bool(bool),
    /// A number.
    Number(f64),
    /// A string.
    String(String),
    /// A path. Deserialized input always arrives as `String` and is
    /// converted by [`ParamValue::into_kind`].
    Path(PathBuf),
    /// A nested record.
    Record(BTreeMap<String, ParamValue>),
}

impl ParamValue {
    /// Parses a raw command-line string into a value of `kind`.
    pub fn parse(kind: ParamKind, raw: &str) -> Result<Self, String> {
        match kind {
            ParamKind::Bool => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" | "on" => Ok(Self::Bool(true)),
                "false" | "no" | "0" | "off" => Ok(Self::Bool(false)),
                other => Err(format!("expected a boolean, got '{other}'")),
            },
            ParamKind::Number => raw
                .trim()
                .parse::<f64>()
                .map(Self::Number)
                .map_err(|_| format!("expected a number, got '{raw}'")),
            ParamKind::String => Ok(Self::String(raw.to_string())),
            ParamKind::Path => Ok(Self::Path(PathBuf::from(raw))),
            ParamKind::Record => serde_json::from_str::<BTreeMap<String, Self>>(raw)
                .map(Self::Record)
                .map_err(|e| format!("expected a JSON object: {e}")),
        }
    }

    /// Converts a loosely-typed value into `kind`, or explains why it can't.
    pub fn into_kind(self, kind: ParamKind) -> Result<Self, String> {
        match (kind, self) {
            (ParamKind::Bool, v @ Self::Bool(_))
            | (ParamKind::Number, v @ Self::Number(_))
            | (ParamKind::String, v @ Self::String(_))
            | (ParamKind::Path, v @ Self::Path(_))
            | (ParamKind::Record, v @ Self::Record(_)) => Ok(v),
            (ParamKind::Path, Self::String(s)) => Ok(Self::Path(PathBuf::from(s))),
            (ParamKind::String, Self::Path(p)) => Ok(Self::String(p.display().to_string())),
            (ParamKind::Bool | ParamKind::Number | ParamKind::Record, Self::String(s)) => {
                Self::parse(kind, &s)
            }
            (kind, other) => Err(format!("expected {kind}, got {}", other.kind())),
        }
    }

    /// Returns the kind this value currently holds.
    #[must_use]
    pub fn kind(&self) -> ParamKind {
        match self {
            Self::Bool(_) => ParamKind::Bool,
            Self::Number(_) => ParamKind::Number,
            Self::String(_) => ParamKind::String,
            Self::Path(_) => ParamKind::Path,
            Self::Record(_) => ParamKind::Record,
        }
    }

    /// Truthiness used by gating predicates.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0,
            Self::String(s) => !s.is_empty() && s != "false",
            Self::Path(p) => !p.as_os_str().is_empty(),
            Self::Record(r) => !r.is_empty(),
        }
    }

    /// Returns true if the value carries no information (empty string/path).
    #[must_use]
    pub fn is_blank(&self) -> bool {
        match self {
            Self::String(s) => s.trim().is_empty(),
            Self::Path(p) => p.as_os_str().is_empty(),
            _ => false,
        }
    }

    /// Returns the boolean, if this is one.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the number, if this is one.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the text of a string value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the path of a path value.
    #[must_use]
    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Self::Path(p) => Some(p),
            _ => None,
        }
    }

    /// Looks up a field of a record value.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Self> {
        match self {
            Self::Record(r) => r.get(name),
            _ => None,
        }
    }

    /// JSON view for the template context.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => {
                // Integral numbers render without a trailing ".0" in commands.
                if n.fract() == 0.0 && n.abs() < 9.0e15 {
                    #[allow(clippy::cast_possible_truncation)]
                    let i = *n as i64;
                    serde_json::json!(i)
                } else {
                    serde_json::json!(n)
                }
            }
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Path(p) => serde_json::Value::String(p.display().to_string()),
            Self::Record(r) => serde_json::Value::Object(
                r.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Path(p) => write!(f, "{}", p.display()),
            Self::Record(_) => write!(f, "{}", self.to_json()),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for ParamValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<PathBuf> for ParamValue {
    fn from(p: PathBuf) -> Self {
        Self::Path(p)
    }
}
