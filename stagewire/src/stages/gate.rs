//! Gating predicates over the parameter store.

use crate::errors::UnknownParameterError;
use crate::params::{ParamValue, ParameterStore};
use serde::{Deserialize, Serialize};

/// Decides whether a stage is part of the graph at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Gate {
    /// Always included.
    #[default]
    Always,
    /// Included when the option is truthy.
    Param(String),
    /// Included when the option equals the value.
    Equals {
        /// Option name.
        param: String,
        /// Expected value.
        value: ParamValue,
    },
    /// Negation.
    Not(Box<Gate>),
    /// Conjunction.
    All(Vec<Gate>),
    /// Disjunction.
    Any(Vec<Gate>),
}

impl Gate {
    /// Gate on a truthy option.
    #[must_use]
    pub fn param(name: impl Into<String>) -> Self {
        Self::Param(name.into())
    }

    /// Negated gate.
    #[must_use]
    pub fn not(gate: Self) -> Self {
        Self::Not(Box::new(gate))
    }

    /// Evaluates the gate.
    ///
    /// # Errors
    ///
    /// `UnknownParameterError` if a referenced option has no value.
    pub fn evaluate(&self, params: &ParameterStore) -> Result<bool, UnknownParameterError> {
        match self {
            Self::Always => Ok(true),
            Self::Param(name) => Ok(params.resolve(name)?.is_truthy()),
            Self::Equals { param, value } => {
                let actual = params.resolve(param)?;
                Ok(actual.to_json() == value.to_json())
            }
            Self::Not(inner) => Ok(!inner.evaluate(params)?),
            Self::All(gates) => {
                for gate in gates {
                    if !gate.evaluate(params)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Any(gates) => {
                for gate in gates {
                    if gate.evaluate(params)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ParameterStore {
        ParameterStore::from_values([
            ("call_peaks", ParamValue::Bool(true)),
            ("skip_qc", ParamValue::Bool(false)),
            ("aligner", ParamValue::String("bwa".to_string())),
        ])
    }

    #[test]
    fn test_param_gate() {
        assert!(Gate::param("call_peaks").evaluate(&params()).unwrap());
        assert!(!Gate::param("skip_qc").evaluate(&params()).unwrap());
        assert!(Gate::not(Gate::param("skip_qc")).evaluate(&params()).unwrap());
    }

    #[test]
    fn test_composite_gates() {
        let gate = Gate::All(vec![
            Gate::param("call_peaks"),
            Gate::Equals {
                param: "aligner".to_string(),
                value: ParamValue::String("bwa".to_string()),
            },
        ]);
        assert!(gate.evaluate(&params()).unwrap());

        let any = Gate::Any(vec![Gate::param("skip_qc"), Gate::Always]);
        assert!(any.evaluate(&params()).unwrap());
    }

    #[test]
    fn test_unknown_parameter() {
        let err = Gate::param("missing").evaluate(&params()).unwrap_err();
        assert_eq!(err.name, "missing");
    }

    #[test]
    fn test_gate_json() {
        let gate: Gate = serde_json::from_str(r#"{"not":{"param":"skip_qc"}}"#).unwrap();
        assert_eq!(gate, Gate::not(Gate::param("skip_qc")));

        let always: Gate = serde_json::from_str(r#""always""#).unwrap();
        assert_eq!(always, Gate::Always);
    }
}
