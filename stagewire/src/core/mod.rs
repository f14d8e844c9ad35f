//! Core domain model types for stagewire.
//!
//! - Stream items, broadcast values and port types
//! - Instance and run status enums

mod item;
mod status;

pub(crate) use item::file_name;
pub use item::{Item, PortType, Shape, StreamValue};
pub use status::{InstanceState, RunStatus};
