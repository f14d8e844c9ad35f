//! Pipeline building.
//!
//! This module provides:
//! - The graph builder with gating, pruning and wiring validation
//! - The validated graph consumed by the executor
//! - JSON pipeline definitions
//! - Failure policies and failure bookkeeping

mod builder;
mod definition;
mod failure_tolerance;
mod graph;
mod integration_tests;

pub use builder::GraphBuilder;
pub use definition::{PipelineDefinition, SeedDef, SeedSource};
pub use failure_tolerance::{FailureCollector, FailurePolicy, FailureRecord};
pub use graph::{Consumer, Graph, Node, NodeDef, StreamInfo};
