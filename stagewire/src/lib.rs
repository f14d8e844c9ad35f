//! # Stagewire
//!
//! A stream-wired workflow engine for external-command stages.
//!
//! Pipelines are graphs of typed streams connecting stage templates. Each
//! stage runs a shell command once per input item inside its own scratch
//! directory, and the files it leaves behind become the items of its output
//! streams. Stagewire provides:
//!
//! - **Gated graphs**: stages switched off by parameters are pruned together
//!   with their exclusive consumers before anything runs
//! - **Typed streams**: multi and broadcast streams, checked edge by edge
//! - **Combinators**: `fan_out`, `collect`, `cross_product` and `mix`
//! - **Bounded execution**: a worker pool with fail-fast or ignore policies,
//!   timeouts and cancellation that kills running processes
//! - **Publishing**: atomic copies of selected outputs to a results root
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stagewire::prelude::*;
//!
//! let graph = GraphBuilder::new("align")
//!     .seed(Seed::multi("reads", "fastq", discover(dir, "*_R{1,2}.fq.gz")?))
//!     .stage(
//!         StageDef::new("bwa", "bwa mem ref.fa {{ input.reads }} > {{ prefix }}.sam")
//!             .with_input("reads", "reads", PortType::item("fastq"))
//!             .with_output("sam", "*.sam", "sam"),
//!     )
//!     .build(ParameterStore::default())?;
//!
//! let summary = Executor::new(graph, EngineConfig::new()).run().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod executor;
pub mod glob;
pub mod observability;
pub mod params;
pub mod pipeline;
pub mod sandbox;
pub mod stages;
pub mod stream;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::{CancellationToken, CleanupRegistry};
    pub use crate::config::{EngineConfig, Materialize, PublishMode};
    pub use crate::core::{InstanceState, Item, PortType, RunStatus, Shape, StreamValue};
    pub use crate::errors::{
        ContractErrorInfo, ExecutionError, StagewireError, ValidationError, WiringError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::executor::{Executor, RunSummary};
    pub use crate::params::{ParamSchema, ParamValue, ParameterStore};
    pub use crate::pipeline::{
        FailurePolicy, Graph, GraphBuilder, PipelineDefinition,
    };
    pub use crate::stages::{Gate, InputPort, OutputPort, SizeRule, StageDef};
    pub use crate::stream::{
        discover, read_records, Combinator, Flavor, RecordLayout, Seed, SortKey,
    };
}
