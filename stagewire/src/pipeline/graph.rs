//! The built, immutable stage graph.

use crate::core::PortType;
use crate::params::ParameterStore;
use crate::stages::StageDef;
use crate::stream::{Combinator, Flavor, Seed, DEFAULT_PORT};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// A node declaration: seed, combinator or stage.
#[derive(Debug, Clone)]
pub enum NodeDef {
    /// External input.
    Seed(Seed),
    /// Stream operator.
    Combinator(Combinator),
    /// Processing stage.
    Stage(Arc<StageDef>),
}

impl NodeDef {
    /// Node name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Seed(seed) => &seed.name,
            Self::Combinator(c) => &c.name,
            Self::Stage(stage) => &stage.name,
        }
    }

    /// Short kind label: `seed`, `stage` or the combinator operation.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Seed(_) => "seed",
            Self::Combinator(c) => c.op_name(),
            Self::Stage(_) => "stage",
        }
    }

    /// Output port names.
    #[must_use]
    pub fn output_ports(&self) -> Vec<String> {
        match self {
            Self::Seed(_) => vec![DEFAULT_PORT.to_string()],
            Self::Combinator(c) => c.output_ports(),
            Self::Stage(stage) => stage.outputs.iter().map(|p| p.name.clone()).collect(),
        }
    }

    /// Stream references, one per input slot.
    #[must_use]
    pub fn references(&self) -> Vec<&str> {
        match self {
            Self::Seed(_) => Vec::new(),
            Self::Combinator(c) => c.sources(),
            Self::Stage(stage) => stage.inputs.iter().map(|p| p.source.as_str()).collect(),
        }
    }

    /// The stage definition, if this is a stage.
    #[must_use]
    pub fn as_stage(&self) -> Option<&Arc<StageDef>> {
        match self {
            Self::Stage(stage) => Some(stage),
            _ => None,
        }
    }
}

/// A live node with its resolved wiring.
#[derive(Debug, Clone)]
pub struct Node {
    /// The declaration.
    pub def: NodeDef,
    /// Stream id per input slot; `None` where a pruned producer was replaced
    /// by the port default.
    pub inputs: Vec<Option<String>>,
    /// Stream ids of the outputs, in port order.
    pub outputs: Vec<String>,
}

impl Node {
    /// Node name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.def.name()
    }
}

/// A consumer of a stream: node index and input slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Consumer {
    /// Index into [`Graph::nodes`].
    pub node: usize,
    /// Input slot on that node.
    pub slot: usize,
}

/// Static description of one stream.
#[derive(Debug, Clone, Serialize)]
pub struct StreamInfo {
    /// `"node.port"`.
    pub id: String,
    /// Producing node.
    pub producer: String,
    /// Output port on the producer.
    pub port: String,
    /// Item kind and shape.
    pub ty: PortType,
    /// Multi or broadcast.
    pub flavor: Flavor,
    /// Wired consumers; at most one for multi streams.
    pub consumers: Vec<Consumer>,
}

/// A validated DAG of live nodes, stored in topological order.
#[derive(Debug)]
pub struct Graph {
    pub(crate) name: String,
    pub(crate) params: Arc<ParameterStore>,
    pub(crate) nodes: Vec<Node>,
    pub(crate) index: HashMap<String, usize>,
    pub(crate) streams: BTreeMap<String, StreamInfo>,
    pub(crate) pruned: Vec<String>,
}

impl Graph {
    /// Pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The parameters the graph was built with.
    #[must_use]
    pub fn params(&self) -> &Arc<ParameterStore> {
        &self.params
    }

    /// Live nodes in topological order.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Looks up a live node.
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.index.get(name).map(|&i| &self.nodes[i])
    }

    /// Returns true if `name` survived pruning.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Node names in topological order.
    #[must_use]
    pub fn topological_order(&self) -> Vec<&str> {
        self.nodes.iter().map(Node::name).collect()
    }

    /// Names of the nodes removed by gating, in declaration order.
    #[must_use]
    pub fn pruned(&self) -> &[String] {
        &self.pruned
    }

    /// All streams by id.
    #[must_use]
    pub fn streams(&self) -> &BTreeMap<String, StreamInfo> {
        &self.streams
    }

    /// Looks up a stream.
    #[must_use]
    pub fn stream(&self, id: &str) -> Option<&StreamInfo> {
        self.streams.get(id)
    }

    /// Number of live stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n.def, NodeDef::Stage(_)))
            .count()
    }

    /// Producer → consumer node edges.
    #[must_use]
    pub fn edges(&self) -> Vec<(&str, &str)> {
        self.streams
            .values()
            .flat_map(|s| {
                s.consumers
                    .iter()
                    .map(move |c| (s.producer.as_str(), self.nodes[c.node].name()))
            })
            .collect()
    }

    /// Human-readable listing used by `stagewire graph`.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for node in &self.nodes {
            out.push_str(&format!("{} [{}]\n", node.name(), node.def.kind()));
            for id in &node.outputs {
                if let Some(info) = self.streams.get(id) {
                    out.push_str(&format!("  -> {} : {} ({})\n", id, info.ty, info.flavor));
                }
            }
        }
        if !self.pruned.is_empty() {
            out.push_str(&format!("pruned: {}\n", self.pruned.join(", ")));
        }
        out
    }
}
