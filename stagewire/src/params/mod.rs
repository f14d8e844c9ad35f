//! The parameter store.
//!
//! Options are declared once in a [`ParamSchema`], resolved eagerly into an
//! immutable [`ParameterStore`], and then passed explicitly to the graph
//! builder (for gating) and the sandbox (for templating).

pub mod cli;
mod store;
mod value;

pub use store::{Constraint, ParamSchema, ParamSpec, ParameterStore};
pub use value::{ParamKind, ParamValue};
