//! Parameter schema and the resolved, immutable parameter store.

use super::{ParamKind, ParamValue};
use crate::errors::{ContractErrorInfo, StagewireError, UnknownParameterError, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Declaration of a single named option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    /// Option name, used as `--name` on the command line.
    pub name: String,
    /// Declared kind; overrides are coerced to it.
    #[serde(default)]
    pub kind: ParamKind,
    /// Default value. `None` leaves the option unset unless overridden.
    #[serde(default)]
    pub default: Option<ParamValue>,
    /// Help text for the command line.
    #[serde(default)]
    pub help: Option<String>,
}

impl ParamSpec {
    /// Creates a spec with no default.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            default: None,
            help: None,
        }
    }

    /// Sets the default value.
    #[must_use]
    pub fn with_default(mut self, value: impl Into<ParamValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Sets the help text.
    #[must_use]
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }
}

/// A cross-parameter invariant checked at resolution time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "rule")]
pub enum Constraint {
    /// When `when` is truthy, `requires` must be set and non-blank.
    Requires {
        /// The enabling option.
        when: String,
        /// The companion option.
        requires: String,
    },
}

/// The declared option surface of a pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamSchema {
    /// Declared options in declaration order.
    #[serde(default)]
    pub params: Vec<ParamSpec>,
    /// Cross-parameter invariants.
    #[serde(default)]
    pub constraints: Vec<Constraint>,
}

impl ParamSchema {
    /// Creates an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares an option.
    #[must_use]
    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    /// Declares a boolean flag with a default.
    #[must_use]
    pub fn flag(self, name: impl Into<String>, default: bool) -> Self {
        self.param(ParamSpec::new(name, ParamKind::Bool).with_default(default))
    }

    /// Declares a path option with no default.
    #[must_use]
    pub fn path(self, name: impl Into<String>) -> Self {
        self.param(ParamSpec::new(name, ParamKind::Path))
    }

    /// Adds a "`when` implies `requires`" invariant.
    #[must_use]
    pub fn requires(mut self, when: impl Into<String>, requires: impl Into<String>) -> Self {
        self.constraints.push(Constraint::Requires {
            when: when.into(),
            requires: requires.into(),
        });
        self
    }

    /// Looks up a declared option.
    #[must_use]
    pub fn spec(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Resolves defaults overridden by raw command-line strings.
    ///
    /// # Errors
    ///
    /// `ValidationError` for undeclared options, values that don't parse as
    /// their declared kind, or violated constraints.
    pub fn resolve_raw<I, K, V>(&self, overrides: I) -> Result<ParameterStore, StagewireError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let mut typed = BTreeMap::new();
        for (name, raw) in overrides {
            let name = name.into();
            let spec = self.spec(&name).ok_or_else(|| unknown_option(&name))?;
            let value = ParamValue::parse(spec.kind, raw.as_ref())
                .map_err(|reason| type_error(&name, &reason))?;
            typed.insert(name, value);
        }
        self.resolve(typed)
    }

    /// Resolves defaults overridden by typed values.
    ///
    /// # Errors
    ///
    /// See [`ParamSchema::resolve_raw`].
    pub fn resolve(
        &self,
        overrides: BTreeMap<String, ParamValue>,
    ) -> Result<ParameterStore, StagewireError> {
        if let Some(name) = overrides.keys().find(|name| self.spec(name).is_none()) {
            return Err(unknown_option(name).into());
        }

        let mut values = BTreeMap::new();
        for spec in &self.params {
            let chosen = overrides
                .get(&spec.name)
                .cloned()
                .or_else(|| spec.default.clone());
            if let Some(value) = chosen {
                let value = value
                    .into_kind(spec.kind)
                    .map_err(|reason| type_error(&spec.name, &reason))?;
                values.insert(spec.name.clone(), value);
            }
        }

        let store = ParameterStore { values };
        self.check_constraints(&store)?;
        Ok(store)
    }

    fn check_constraints(&self, store: &ParameterStore) -> Result<(), ValidationError> {
        for constraint in &self.constraints {
            match constraint {
                Constraint::Requires { when, requires } => {
                    let enabled = store.get(when).is_some_and(ParamValue::is_truthy);
                    let satisfied = store.get(requires).is_some_and(|v| !v.is_blank());
                    if enabled && !satisfied {
                        return Err(ValidationError::new(format!(
                            "Option '{when}' is enabled but '{requires}' is not set"
                        ))
                        .with_subjects(vec![when.clone(), requires.clone()])
                        .with_error_info(
                            ContractErrorInfo::new(
                                "PARAM-REQUIRES",
                                format!("'{when}' requires '{requires}'"),
                            )
                            .with_fix_hint(format!("Pass --{requires} or disable --{when}.")),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

fn unknown_option(name: &str) -> ValidationError {
    ValidationError::new(format!("Unknown option '{name}'"))
        .with_subjects(vec![name.to_string()])
        .with_error_info(ContractErrorInfo::new(
            "PARAM-UNKNOWN-OPTION",
            format!("'{name}' is not a declared option"),
        ))
}

fn type_error(name: &str, reason: &str) -> ValidationError {
    ValidationError::new(format!("Invalid value for '{name}': {reason}"))
        .with_subjects(vec![name.to_string()])
        .with_error_info(ContractErrorInfo::new("PARAM-TYPE", reason.to_string()))
}

/// Resolved option values. Immutable once built; share it behind an `Arc`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParameterStore {
    values: BTreeMap<String, ParamValue>,
}

impl ParameterStore {
    /// Builds a store directly from values, bypassing any schema.
    #[must_use]
    pub fn from_values<I, K>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, ParamValue)>,
        K: Into<String>,
    {
        Self {
            values: values.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Returns the value of `name`.
    ///
    /// # Errors
    ///
    /// `UnknownParameterError` if the option has no default and no override.
    pub fn resolve(&self, name: &str) -> Result<&ParamValue, UnknownParameterError> {
        self.values
            .get(name)
            .ok_or_else(|| UnknownParameterError::new(name))
    }

    /// Returns the value of `name`, if set.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    /// Truthiness of `name`; unset options are false.
    #[must_use]
    pub fn flag(&self, name: &str) -> bool {
        self.get(name).is_some_and(ParamValue::is_truthy)
    }

    /// Iterates over all set options in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of set options.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if no option is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// JSON object view for the template context.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}
