//! Lifecycle events.
//!
//! The executor reports every instance state change plus a few run-level
//! facts to an [`EventSink`] handed to it explicitly. Instance events are
//! named after the state entered (see
//! [`InstanceState::event_name`](crate::core::InstanceState::event_name)).

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// A `collect` barrier released its list.
pub const COLLECT_EMITTED: &str = "collect.emitted";

/// Copying an output to the publish root failed.
pub const PUBLISH_FAILED: &str = "publish.failed";

/// The run finished; carries the status and counts.
pub const RUN_COMPLETED: &str = "run.completed";
