//! Graph builder with gating, pruning and wiring validation.

use super::graph::{Consumer, Graph, Node, NodeDef, StreamInfo};
use crate::core::{PortType, Shape};
use crate::errors::{
    ContractErrorInfo, ContractSuggestions, CycleDetectedError, StagewireError, WiringError,
};
use crate::params::ParameterStore;
use crate::stages::{is_list_port, StageDef};
use crate::stream::{stream_id, Combinator, CombinatorOp, Flavor, Seed, SortKey, StreamRef};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// A resolved input: stream id and the index of its producer declaration.
type Source = (String, usize);

/// Builder for validated graphs.
///
/// Nodes may be declared in any order; wiring is resolved by name at
/// [`GraphBuilder::build`].
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    name: String,
    defs: Vec<NodeDef>,
}

impl GraphBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            defs: Vec::new(),
        }
    }

    /// Adds a seed stream.
    #[must_use]
    pub fn seed(mut self, seed: Seed) -> Self {
        self.defs.push(NodeDef::Seed(seed));
        self
    }

    /// Adds a stage.
    #[must_use]
    pub fn stage(mut self, stage: StageDef) -> Self {
        self.defs.push(NodeDef::Stage(Arc::new(stage)));
        self
    }

    /// Adds a combinator.
    #[must_use]
    pub fn combinator(mut self, combinator: Combinator) -> Self {
        self.defs.push(NodeDef::Combinator(combinator));
        self
    }

    /// Adds `fan_out(source, n)`; outputs are `name.0 .. name.{n-1}`.
    #[must_use]
    pub fn fan_out(self, name: impl Into<String>, source: impl Into<String>, n: usize) -> Self {
        self.combinator(Combinator::fan_out(name, source, n))
    }

    /// Adds `collect(source)`.
    #[must_use]
    pub fn collect(
        self,
        name: impl Into<String>,
        source: impl Into<String>,
        sort: Option<SortKey>,
    ) -> Self {
        self.combinator(Combinator::collect(name, source, sort))
    }

    /// Adds `cross_product(source, values)`.
    #[must_use]
    pub fn cross_product<I, S>(
        self,
        name: impl Into<String>,
        source: impl Into<String>,
        values: I,
        tag: impl Into<String>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.combinator(Combinator::cross_product(name, source, values, tag))
    }

    /// Adds `mix(sources...)`.
    #[must_use]
    pub fn mix<I, S>(self, name: impl Into<String>, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.combinator(Combinator::mix(name, sources))
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of declared nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.defs.len()
    }

    /// Builds the graph.
    ///
    /// Gates are evaluated first; gated-off stages and nodes consuming only
    /// from pruned producers are removed. The remaining nodes are checked for
    /// cycles, ordered topologically and type-checked edge by edge.
    ///
    /// # Errors
    ///
    /// `WiringError` for structural problems, `UnknownParameter` when a gate
    /// reads an unset option, `EmptySeed`/`ValidationError` for bad seeds.
    pub fn build(self, params: impl Into<Arc<ParameterStore>>) -> Result<Graph, StagewireError> {
        let params = params.into();
        if self.defs.is_empty() {
            return Err(wiring("WIRING-EMPTY", "Graph has no nodes".to_string(), Vec::new()).into());
        }

        self.check_declarations()?;

        let producers: HashMap<&str, usize> = self
            .defs
            .iter()
            .enumerate()
            .map(|(i, def)| (def.name(), i))
            .collect();

        let mut sources: Vec<Vec<Source>> = Vec::with_capacity(self.defs.len());
        for def in &self.defs {
            let resolved = def
                .references()
                .into_iter()
                .map(|reference| self.resolve(&producers, reference, def.name()))
                .collect::<Result<Vec<_>, _>>()?;
            sources.push(resolved);
        }

        let pruned = self.prune(&params, &sources)?;
        self.detect_cycles(&sources, &pruned)
            .map_err(WiringError::from)?;
        let order = topological_order(&sources, &pruned);

        let mut nodes: Vec<Node> = Vec::with_capacity(order.len());
        let mut index = HashMap::new();
        let mut streams: BTreeMap<String, StreamInfo> = BTreeMap::new();

        for &i in &order {
            let def = &self.defs[i];
            let (inputs, output_types) = match def {
                NodeDef::Seed(seed) => (Vec::new(), vec![(seed.port_type(), seed.flavor)]),
                NodeDef::Stage(stage) => self.wire_stage(stage, &sources[i], &pruned, &streams)?,
                NodeDef::Combinator(c) => wire_combinator(c, &sources[i], &pruned, &streams)?,
            };

            let position = nodes.len();
            for (slot, input) in inputs.iter().enumerate() {
                if let Some(info) = input.as_ref().and_then(|id| streams.get_mut(id)) {
                    info.consumers.push(Consumer {
                        node: position,
                        slot,
                    });
                }
            }

            let mut outputs = Vec::new();
            for (port, (ty, flavor)) in def.output_ports().into_iter().zip(output_types) {
                let id = stream_id(def.name(), &port);
                streams.insert(
                    id.clone(),
                    StreamInfo {
                        id: id.clone(),
                        producer: def.name().to_string(),
                        port,
                        ty,
                        flavor,
                        consumers: Vec::new(),
                    },
                );
                outputs.push(id);
            }

            index.insert(def.name().to_string(), position);
            nodes.push(Node {
                def: def.clone(),
                inputs,
                outputs,
            });
        }

        for info in streams.values() {
            if info.flavor == Flavor::Multi && info.consumers.len() > 1 {
                let consumers: Vec<String> = info
                    .consumers
                    .iter()
                    .map(|c| nodes[c.node].name().to_string())
                    .collect();
                return Err(wiring(
                    "WIRING-SHARED-MULTI",
                    format!(
                        "Multi stream '{}' is consumed by {}",
                        info.id,
                        consumers.join(", ")
                    ),
                    consumers,
                )
                .into());
            }
        }

        let pruned_names: Vec<String> = self
            .defs
            .iter()
            .zip(&pruned)
            .filter(|(_, &p)| p)
            .map(|(def, _)| def.name().to_string())
            .collect();

        info!(
            pipeline = %self.name,
            nodes = nodes.len(),
            pruned = pruned_names.len(),
            "Built stage graph"
        );

        Ok(Graph {
            name: self.name,
            params,
            nodes,
            index,
            streams,
            pruned: pruned_names,
        })
    }

    fn check_declarations(&self) -> Result<(), StagewireError> {
        let mut seen = HashSet::new();
        for def in &self.defs {
            let name = def.name();
            if name.is_empty() || name.contains('.') || name.contains('/') {
                return Err(wiring(
                    "WIRING-INVALID-NAME",
                    format!("Invalid node name '{name}'"),
                    vec![name.to_string()],
                )
                .into());
            }
            if !seen.insert(name) {
                return Err(wiring(
                    "WIRING-DUPLICATE-NODE",
                    format!("Node '{name}' is declared more than once"),
                    vec![name.to_string()],
                )
                .into());
            }

            match def {
                NodeDef::Seed(seed) => seed.check()?,
                NodeDef::Stage(stage) => check_ports(stage)?,
                NodeDef::Combinator(c) => check_combinator(c)?,
            }
        }
        Ok(())
    }

    fn resolve(
        &self,
        producers: &HashMap<&str, usize>,
        reference: &str,
        consumer: &str,
    ) -> Result<Source, WiringError> {
        let parsed = StreamRef::parse(reference);
        let missing = || {
            wiring(
                "WIRING-MISSING-PRODUCER",
                format!("'{consumer}' reads unknown stream '{reference}'"),
                vec![consumer.to_string(), parsed.node.clone()],
            )
        };

        let &producer = producers.get(parsed.node.as_str()).ok_or_else(missing)?;
        let ports = self.defs[producer].output_ports();

        let port = match parsed.port.as_deref() {
            Some(port) if ports.iter().any(|p| p == port) => port.to_string(),
            Some(_) => return Err(missing()),
            None => match ports.as_slice() {
                [only] => only.clone(),
                [] => return Err(missing()),
                _ => {
                    return Err(wiring(
                        "WIRING-AMBIGUOUS-REFERENCE",
                        format!(
                            "'{consumer}' reads '{reference}', which has outputs {}",
                            ports.join(", ")
                        ),
                        vec![consumer.to_string(), parsed.node.clone()],
                    ))
                }
            },
        };

        Ok((stream_id(&parsed.node, &port), producer))
    }

    fn prune(
        &self,
        params: &ParameterStore,
        sources: &[Vec<Source>],
    ) -> Result<Vec<bool>, StagewireError> {
        let mut pruned = vec![false; self.defs.len()];
        for (i, def) in self.defs.iter().enumerate() {
            if let NodeDef::Stage(stage) = def {
                if !stage.gate.evaluate(params)? {
                    debug!(stage = %stage.name, "Stage gated off");
                    pruned[i] = true;
                }
            }
        }

        loop {
            let mut changed = false;
            for i in 0..self.defs.len() {
                if pruned[i] || sources[i].is_empty() {
                    continue;
                }
                if sources[i].iter().all(|(_, producer)| pruned[*producer]) {
                    debug!(node = %self.defs[i].name(), "Pruned: all producers gated off");
                    pruned[i] = true;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        Ok(pruned)
    }

    fn detect_cycles(&self, sources: &[Vec<Source>], pruned: &[bool]) -> Result<(), CycleDetectedError> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for i in 0..self.defs.len() {
            if !pruned[i] && !visited.contains(&i) {
                if let Some(cycle) =
                    self.dfs_cycle(i, sources, pruned, &mut visited, &mut rec_stack, &mut path)
                {
                    return Err(CycleDetectedError::new(cycle));
                }
            }
        }
        Ok(())
    }

    fn dfs_cycle(
        &self,
        node: usize,
        sources: &[Vec<Source>],
        pruned: &[bool],
        visited: &mut HashSet<usize>,
        rec_stack: &mut HashSet<usize>,
        path: &mut Vec<usize>,
    ) -> Option<Vec<String>> {
        visited.insert(node);
        rec_stack.insert(node);
        path.push(node);

        for &(_, dep) in &sources[node] {
            if pruned[dep] {
                continue;
            }
            if !visited.contains(&dep) {
                if let Some(cycle) = self.dfs_cycle(dep, sources, pruned, visited, rec_stack, path) {
                    return Some(cycle);
                }
            } else if rec_stack.contains(&dep) {
                let start = path.iter().position(|&n| n == dep).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..]
                    .iter()
                    .map(|&n| self.defs[n].name().to_string())
                    .collect();
                cycle.push(self.defs[dep].name().to_string());
                return Some(cycle);
            }
        }

        path.pop();
        rec_stack.remove(&node);
        None
    }

    fn wire_stage(
        &self,
        stage: &StageDef,
        sources: &[Source],
        pruned: &[bool],
        streams: &BTreeMap<String, StreamInfo>,
    ) -> Result<(Vec<Option<String>>, Vec<(PortType, Flavor)>), WiringError> {
        let mut inputs = Vec::with_capacity(stage.inputs.len());
        let mut has_multi = false;

        for (port, (id, producer)) in stage.inputs.iter().zip(sources) {
            if pruned[*producer] {
                let producer_name = self.defs[*producer].name().to_string();
                match &port.default {
                    Some(value) if value.shape() == port.ty.shape => inputs.push(None),
                    Some(_) => {
                        return Err(mismatch(
                            format!(
                                "Default for '{}.{}' does not match its type {}",
                                stage.name, port.name, port.ty
                            ),
                            vec![stage.name.clone()],
                        ))
                    }
                    None => {
                        return Err(wiring(
                            "WIRING-PRUNED-DEPENDENCY",
                            format!(
                                "Input '{}.{}' is fed by gated-off '{producer_name}' and has no default",
                                stage.name, port.name
                            ),
                            vec![stage.name.clone(), producer_name],
                        ))
                    }
                }
                continue;
            }

            let info = streams.get(id).ok_or_else(|| {
                wiring(
                    "WIRING-MISSING-PRODUCER",
                    format!("'{}' reads unknown stream '{id}'", stage.name),
                    vec![stage.name.clone()],
                )
            })?;
            if !info.ty.feeds(&port.ty) {
                return Err(mismatch(
                    format!(
                        "'{}' produces {} but '{}.{}' expects {}",
                        info.id, info.ty, stage.name, port.name, port.ty
                    ),
                    vec![info.producer.clone(), stage.name.clone()],
                ));
            }
            has_multi |= info.flavor == Flavor::Multi;
            inputs.push(Some(id.clone()));
        }

        if let Some(variant) = stage
            .body
            .variants
            .iter()
            .find(|v| !is_list_port(stage, v.when.input()))
        {
            return Err(wiring(
                "WIRING-VARIANT-INPUT",
                format!(
                    "Stage '{}' selects a variant on '{}', which is not a list input",
                    stage.name,
                    variant.when.input()
                ),
                vec![stage.name.clone()],
            ));
        }

        let flavor = if has_multi {
            Flavor::Multi
        } else {
            Flavor::Broadcast
        };
        let outputs = stage
            .outputs
            .iter()
            .map(|p| (p.port_type(), flavor))
            .collect();
        Ok((inputs, outputs))
    }
}

fn wire_combinator(
    combinator: &Combinator,
    sources: &[Source],
    pruned: &[bool],
    streams: &BTreeMap<String, StreamInfo>,
) -> Result<(Vec<Option<String>>, Vec<(PortType, Flavor)>), WiringError> {
    let live: Vec<&StreamInfo> = sources
        .iter()
        .filter(|(_, producer)| !pruned[*producer])
        .filter_map(|(id, _)| streams.get(id))
        .collect();
    let name = &combinator.name;
    let Some(first) = live.first() else {
        return Err(wiring(
            "WIRING-MISSING-PRODUCER",
            format!("Combinator '{name}' has no live source"),
            vec![name.clone()],
        ));
    };
    let inputs = live.iter().map(|s| Some(s.id.clone())).collect();

    let outputs = match &combinator.op {
        CombinatorOp::FanOut { n, .. } => vec![(first.ty.clone(), first.flavor); *n],
        CombinatorOp::Collect { .. } => {
            if first.flavor != Flavor::Multi || first.ty.shape != Shape::Item {
                return Err(mismatch(
                    format!(
                        "collect '{name}' needs a multi item stream, '{}' is {} {}",
                        first.id, first.flavor, first.ty
                    ),
                    vec![first.producer.clone(), name.clone()],
                ));
            }
            vec![(first.ty.collected(), Flavor::Broadcast)]
        }
        CombinatorOp::CrossProduct { .. } => {
            if first.ty.shape != Shape::Item {
                return Err(mismatch(
                    format!("cross_product '{name}' needs an item stream, '{}' is {}", first.id, first.ty),
                    vec![first.producer.clone(), name.clone()],
                ));
            }
            vec![(first.ty.clone(), Flavor::Multi)]
        }
        CombinatorOp::Mix { .. } => {
            if let Some(bad) = live
                .iter()
                .find(|s| s.ty.shape != Shape::Item || !s.ty.feeds(&first.ty))
            {
                return Err(mismatch(
                    format!(
                        "mix '{name}' combines {} from '{}' with {} from '{}'",
                        bad.ty, bad.id, first.ty, first.id
                    ),
                    vec![bad.producer.clone(), name.clone()],
                ));
            }
            let kind = live
                .iter()
                .map(|s| s.ty.kind.as_str())
                .find(|k| *k != PortType::ANY)
                .unwrap_or(PortType::ANY);
            vec![(PortType::item(kind), Flavor::Multi)]
        }
    };

    Ok((inputs, outputs))
}

fn check_ports(stage: &StageDef) -> Result<(), WiringError> {
    if stage.timeout_ms == Some(0) {
        return Err(wiring(
            "WIRING-INVALID-TIMEOUT",
            format!("Stage '{}' has a zero timeout", stage.name),
            vec![stage.name.clone()],
        ));
    }
    let mut inputs = HashSet::new();
    for port in &stage.inputs {
        if !inputs.insert(port.name.as_str()) {
            return Err(duplicate_port(&stage.name, &port.name));
        }
    }
    let mut outputs = HashSet::new();
    for port in &stage.outputs {
        if port.name.is_empty() || port.name.contains('.') {
            return Err(wiring(
                "WIRING-INVALID-NAME",
                format!("Invalid output port name '{}.{}'", stage.name, port.name),
                vec![stage.name.clone()],
            ));
        }
        if !outputs.insert(port.name.as_str()) {
            return Err(duplicate_port(&stage.name, &port.name));
        }
    }
    Ok(())
}

fn check_combinator(combinator: &Combinator) -> Result<(), WiringError> {
    let problem = match &combinator.op {
        CombinatorOp::FanOut { n: 0, .. } => Some("fan_out needs at least one output"),
        CombinatorOp::CrossProduct { values, .. } if values.is_empty() => {
            Some("cross_product needs at least one value")
        }
        CombinatorOp::Mix { sources } if sources.is_empty() => Some("mix needs at least one source"),
        _ => None,
    };
    match problem {
        Some(problem) => Err(wiring(
            "WIRING-INVALID-COMBINATOR",
            format!("'{}': {problem}", combinator.name),
            vec![combinator.name.clone()],
        )),
        None => Ok(()),
    }
}

/// Kahn's algorithm; ties are broken by declaration order.
fn topological_order(sources: &[Vec<Source>], pruned: &[bool]) -> Vec<usize> {
    let n = sources.len();
    let mut in_degree = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];

    for i in (0..n).filter(|&i| !pruned[i]) {
        for &(_, producer) in &sources[i] {
            if !pruned[producer] {
                in_degree[i] += 1;
                dependents[producer].push(i);
            }
        }
    }

    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| !pruned[i] && in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &d in &dependents[i] {
            in_degree[d] -= 1;
            if in_degree[d] == 0 {
                ready.insert(d);
            }
        }
    }
    order
}

fn wiring(code: &str, message: String, nodes: Vec<String>) -> WiringError {
    let mut info = ContractErrorInfo::new(code, message.clone());
    if let Some(hint) = ContractSuggestions::get(code) {
        info = info.with_fix_hint(hint);
    }
    WiringError::new(message).with_nodes(nodes).with_error_info(info)
}

fn mismatch(message: String, nodes: Vec<String>) -> WiringError {
    wiring("WIRING-TYPE-MISMATCH", message, nodes)
}

fn duplicate_port(stage: &str, port: &str) -> WiringError {
    wiring(
        "WIRING-DUPLICATE-PORT",
        format!("Stage '{stage}' declares port '{port}' twice"),
        vec![stage.to_string()],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Item, StreamValue};
    use crate::params::ParamValue;
    use crate::stages::{Gate, InputPort, SizeRule};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn reads() -> Seed {
        Seed::multi(
            "reads",
            "fastq",
            vec![Item::new("S1"), Item::new("S2"), Item::new("S3")],
        )
    }

    fn align() -> StageDef {
        StageDef::new("align", "touch {{ prefix }}.bam")
            .with_input("reads", "reads", PortType::item("fastq"))
            .with_output("bam", "*.bam", "bam")
    }

    fn params(call_peaks: bool) -> ParameterStore {
        ParameterStore::from_values([("call_peaks", ParamValue::Bool(call_peaks))])
    }

    fn code(err: StagewireError) -> String {
        match err {
            StagewireError::Wiring(w) => w.code().unwrap_or_default().to_string(),
            other => panic!("expected wiring error, got {other}"),
        }
    }

    #[test]
    fn test_chain_topological_order() {
        let graph = GraphBuilder::new("test")
            .stage(
                StageDef::new("sort", "true")
                    .with_input("bam", "align.bam", PortType::item("bam"))
                    .with_output("sorted", "*.sorted.bam", "bam"),
            )
            .stage(align())
            .seed(reads())
            .build(ParameterStore::default())
            .unwrap();

        assert_eq!(graph.topological_order(), vec!["reads", "align", "sort"]);
        for (producer, consumer) in graph.edges() {
            let order = graph.topological_order();
            let p = order.iter().position(|n| *n == producer).unwrap();
            let c = order.iter().position(|n| *n == consumer).unwrap();
            assert!(p < c, "{producer} must precede {consumer}");
        }
        assert_eq!(graph.stream("align.bam").unwrap().flavor, Flavor::Multi);
    }

    #[test]
    fn test_empty_graph() {
        let err = GraphBuilder::new("empty").build(ParameterStore::default()).unwrap_err();
        assert_eq!(code(err), "WIRING-EMPTY");
    }

    #[test]
    fn test_missing_producer() {
        let err = GraphBuilder::new("test")
            .stage(align())
            .build(ParameterStore::default())
            .unwrap_err();
        assert_eq!(code(err), "WIRING-MISSING-PRODUCER");
    }

    #[test]
    fn test_unknown_port() {
        let err = GraphBuilder::new("test")
            .seed(reads())
            .stage(align())
            .stage(
                StageDef::new("sort", "true")
                    .with_input("bam", "align.bai", PortType::item("bam")),
            )
            .build(ParameterStore::default())
            .unwrap_err();
        assert_eq!(code(err), "WIRING-MISSING-PRODUCER");
    }

    #[test]
    fn test_type_mismatch() {
        let err = GraphBuilder::new("test")
            .seed(reads())
            .stage(
                StageDef::new("call", "true")
                    .with_input("bam", "reads", PortType::item("bam")),
            )
            .build(ParameterStore::default())
            .unwrap_err();
        assert_eq!(code(err), "WIRING-TYPE-MISMATCH");
    }

    #[test]
    fn test_shared_multi_requires_fan_out() {
        let qc = StageDef::new("qc", "true").with_input("reads", "reads", PortType::item("fastq"));
        let err = GraphBuilder::new("test")
            .seed(reads())
            .stage(align())
            .stage(qc.clone())
            .build(ParameterStore::default())
            .unwrap_err();
        assert_eq!(code(err), "WIRING-SHARED-MULTI");

        let graph = GraphBuilder::new("test")
            .seed(reads())
            .fan_out("split", "reads", 2)
            .stage(
                StageDef::new("align", "true")
                    .with_input("reads", "split.0", PortType::item("fastq"))
                    .with_output("bam", "*.bam", "bam"),
            )
            .stage(StageDef::new("qc", "true").with_input("reads", "split.1", PortType::item("fastq")))
            .build(ParameterStore::default())
            .unwrap();
        assert_eq!(graph.stream("split.1").unwrap().consumers.len(), 1);
    }

    #[test]
    fn test_broadcast_may_be_shared() {
        let graph = GraphBuilder::new("test")
            .seed(reads())
            .stage(align())
            .collect("all", "align.bam", Some(SortKey::Key))
            .stage(StageDef::new("merge", "true").with_input("bams", "all", PortType::list("bam")))
            .stage(StageDef::new("report", "true").with_input("bams", "all", PortType::list("bam")))
            .build(ParameterStore::default())
            .unwrap();

        let all = graph.stream("all.out").unwrap();
        assert_eq!(all.flavor, Flavor::Broadcast);
        assert_eq!(all.ty, PortType::list("bam"));
        assert_eq!(all.consumers.len(), 2);
    }

    #[test]
    fn test_gated_stage_and_exclusive_consumer_pruned() {
        let build = |flag: bool| {
            GraphBuilder::new("test")
                .seed(reads())
                .stage(align().with_gate(Gate::param("call_peaks")))
                .collect("all", "align.bam", None)
                .stage(StageDef::new("summary", "true").with_input("bams", "all", PortType::list("bam")))
                .build(params(flag))
        };

        let on = build(true).unwrap();
        assert!(on.contains("summary"));
        assert!(on.pruned().is_empty());

        let off = build(false).unwrap();
        assert!(!off.contains("align"));
        assert!(!off.contains("all"));
        assert!(!off.contains("summary"));
        assert_eq!(off.pruned(), ["align", "all", "summary"]);
        assert_eq!(off.topological_order(), vec!["reads"]);
    }

    #[test]
    fn test_pruned_dependency_without_default() {
        let err = GraphBuilder::new("test")
            .seed(reads())
            .fan_out("split", "reads", 2)
            .stage(
                StageDef::new("align", "true")
                    .with_input("reads", "split.0", PortType::item("fastq"))
                    .with_output("bam", "*.bam", "bam")
                    .with_gate(Gate::param("call_peaks")),
            )
            .stage(
                StageDef::new("report", "true")
                    .with_input("reads", "split.1", PortType::item("fastq"))
                    .with_input("bam", "align.bam", PortType::item("bam")),
            )
            .build(params(false))
            .unwrap_err();
        assert_eq!(code(err), "WIRING-PRUNED-DEPENDENCY");
    }

    #[test]
    fn test_pruned_dependency_with_default() {
        let graph = GraphBuilder::new("test")
            .seed(reads())
            .fan_out("split", "reads", 2)
            .stage(
                StageDef::new("align", "true")
                    .with_input("reads", "split.0", PortType::item("fastq"))
                    .with_output("bam", "*.bam", "bam")
                    .with_gate(Gate::param("call_peaks")),
            )
            .stage(
                StageDef::new("report", "true")
                    .with_input("reads", "split.1", PortType::item("fastq"))
                    .with_input_port(
                        InputPort::new("bam", "align.bam", PortType::item("bam"))
                            .with_default(StreamValue::Item(Item::new("none"))),
                    ),
            )
            .build(params(false))
            .unwrap();

        let report = graph.node("report").unwrap();
        assert_eq!(report.inputs, vec![Some("split.1".to_string()), None]);
    }

    #[test]
    fn test_mix_tolerates_pruned_source() {
        let graph = GraphBuilder::new("test")
            .seed(reads())
            .fan_out("split", "reads", 2)
            .stage(
                StageDef::new("trim", "true")
                    .with_input("reads", "split.0", PortType::item("fastq"))
                    .with_output("reads", "*.fq", "fastq")
                    .with_gate(Gate::param("call_peaks")),
            )
            .mix("both", ["trim.reads", "split.1"])
            .build(params(false))
            .unwrap();

        assert_eq!(graph.node("both").unwrap().inputs, vec![Some("split.1".to_string())]);
    }

    #[test]
    fn test_cycle_detected() {
        let err = GraphBuilder::new("test")
            .stage(
                StageDef::new("a", "true")
                    .with_input("x", "b.out", PortType::item("any"))
                    .with_output("out", "*", "any"),
            )
            .stage(
                StageDef::new("b", "true")
                    .with_input("x", "a.out", PortType::item("any"))
                    .with_output("out", "*", "any"),
            )
            .build(ParameterStore::default())
            .unwrap_err();
        assert_eq!(code(err), "WIRING-CYCLE");
    }

    #[test]
    fn test_duplicate_node() {
        let err = GraphBuilder::new("test")
            .seed(reads())
            .seed(reads())
            .build(ParameterStore::default())
            .unwrap_err();
        assert_eq!(code(err), "WIRING-DUPLICATE-NODE");
    }

    #[test]
    fn test_collect_requires_multi() {
        let err = GraphBuilder::new("test")
            .seed(Seed::broadcast("genome", "fasta", Item::new("hg38")))
            .collect("all", "genome", None)
            .build(ParameterStore::default())
            .unwrap_err();
        assert_eq!(code(err), "WIRING-TYPE-MISMATCH");
    }

    #[test]
    fn test_stage_without_multi_inputs_is_broadcast() {
        let graph = GraphBuilder::new("test")
            .seed(Seed::broadcast("genome", "fasta", Item::new("hg38")))
            .stage(
                StageDef::new("index", "true")
                    .with_input("fasta", "genome", PortType::item("fasta"))
                    .with_output("index", "*.idx", "index"),
            )
            .build(ParameterStore::default())
            .unwrap();
        assert_eq!(graph.stream("index.index").unwrap().flavor, Flavor::Broadcast);
    }

    #[test]
    fn test_variant_must_name_list_input() {
        let err = GraphBuilder::new("test")
            .seed(reads())
            .stage(align().with_variant(SizeRule::exactly("reads", 1), "true"))
            .build(ParameterStore::default())
            .unwrap_err();
        assert_eq!(code(err), "WIRING-VARIANT-INPUT");
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = GraphBuilder::new("test")
            .seed(reads())
            .stage(align().with_timeout(Duration::ZERO))
            .build(ParameterStore::default())
            .unwrap_err();
        assert_eq!(code(err), "WIRING-INVALID-TIMEOUT");

        let graph = GraphBuilder::new("test")
            .seed(reads())
            .stage(align().with_timeout(Duration::from_millis(250)))
            .build(ParameterStore::default())
            .unwrap();
        assert_eq!(
            graph.node("align").unwrap().def.as_stage().unwrap().timeout(),
            Some(Duration::from_millis(250))
        );
    }

    #[test]
    fn test_gate_on_unknown_parameter() {
        let err = GraphBuilder::new("test")
            .seed(reads())
            .stage(align().with_gate(Gate::param("nope")))
            .build(ParameterStore::default())
            .unwrap_err();
        assert!(matches!(err, StagewireError::UnknownParameter(_)));
    }

    #[test]
    fn test_required_empty_seed() {
        let err = GraphBuilder::new("test")
            .seed(Seed::multi("reads", "fastq", Vec::new()).required())
            .build(ParameterStore::default())
            .unwrap_err();
        assert!(matches!(err, StagewireError::EmptySeed(_)));
    }
}
