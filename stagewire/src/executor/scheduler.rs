//! Incremental readiness tracking and dispatch.
//!
//! Stream traffic is modelled as a queue of [`Signal`]s processed
//! synchronously between instance completions. Combinators react to signals
//! directly; stages turn them into instances. Only instances run on worker
//! tasks, so all bookkeeping lives on the scheduler task and needs no locks.

use super::summary::{RunSummary, StageCounts, UnmatchedItem};
use crate::cancellation::CancellationToken;
use crate::config::EngineConfig;
use crate::core::{InstanceState, Item, RunStatus, StreamValue};
use crate::errors::ExecutionError;
use crate::events::{EventSink, COLLECT_EMITTED, PUBLISH_FAILED, RUN_COMPLETED};
use crate::pipeline::{FailureCollector, FailureRecord, Graph, NodeDef};
use crate::sandbox::{sanitize_key, Instance, Sandbox, SandboxOutcome};
use crate::stages::StageDef;
use crate::stream::{cross, CombinatorOp, Flavor, SortKey};
use chrono::Utc;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde_json::json;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

type Completion = (usize, Result<Result<SandboxOutcome, ExecutionError>, JoinError>);

/// A unit of stream traffic.
#[derive(Debug, Clone)]
enum Signal {
    /// One item on a multi stream.
    Emit(String, Item),
    /// The value of a broadcast stream.
    SetBroadcast(String, StreamValue),
    /// No more traffic on the stream.
    Close(String),
}

impl Signal {
    fn stream(&self) -> &str {
        match self {
            Self::Emit(id, _) | Self::SetBroadcast(id, _) | Self::Close(id) => id,
        }
    }

    fn retarget(&self, stream: &str) -> Self {
        match self {
            Self::Emit(_, item) => Self::Emit(stream.to_string(), item.clone()),
            Self::SetBroadcast(_, value) => Self::SetBroadcast(stream.to_string(), value.clone()),
            Self::Close(_) => Self::Close(stream.to_string()),
        }
    }
}

#[derive(Debug)]
enum Slot {
    Multi,
    Broadcast(Option<StreamValue>),
}

#[derive(Debug)]
struct StageRuntime {
    def: Arc<StageDef>,
    slots: Vec<Slot>,
    multi_slots: Vec<usize>,
    /// Key join buffers, one queue per multi slot; used with two or more.
    joins: BTreeMap<String, Vec<VecDeque<Item>>>,
    multi_closed: usize,
    waiting: Vec<usize>,
    open: usize,
    spawned_single: bool,
    starved: bool,
    finished: bool,
    command: Option<String>,
}

impl StageRuntime {
    fn broadcasts_ready(&self) -> bool {
        self.slots.iter().all(|slot| match slot {
            Slot::Multi => true,
            Slot::Broadcast(value) => value.is_some(),
        })
    }

    /// Key and tags of a stage without multi inputs: taken from the first
    /// single-item broadcast input, else the stage name.
    fn single_identity(&self) -> (String, BTreeMap<String, String>) {
        self.slots
            .iter()
            .find_map(|slot| match slot {
                Slot::Broadcast(Some(StreamValue::Item(item))) => Some((item.key.clone(), item.tags.clone())),
                _ => None,
            })
            .unwrap_or_else(|| (self.def.name.clone(), BTreeMap::new()))
    }
}

#[derive(Debug)]
enum NodeRuntime {
    Seed,
    Stage(StageRuntime),
    FanOut,
    Collect {
        buffer: Vec<Item>,
        sort: Option<SortKey>,
    },
    Cross {
        values: Vec<String>,
        tag: String,
    },
    Mix {
        open: usize,
    },
}

#[derive(Debug)]
struct InstanceRecord {
    node: usize,
    key: String,
    tags: BTreeMap<String, String>,
    multi: Vec<(usize, Item)>,
    state: InstanceState,
    work_dir: Option<PathBuf>,
}

/// Drives one run of a graph.
pub(super) struct Scheduler {
    graph: Arc<Graph>,
    config: Arc<EngineConfig>,
    sandbox: Arc<Sandbox>,
    sink: Arc<dyn EventSink>,
    token: Arc<CancellationToken>,
    run_id: Uuid,
    run_dir: PathBuf,

    nodes: Vec<NodeRuntime>,
    instances: Vec<InstanceRecord>,
    queue: VecDeque<Signal>,
    ready: VecDeque<usize>,
    used_dirs: HashSet<PathBuf>,
    failures: FailureCollector,
    aborting: bool,

    outputs: BTreeMap<String, Vec<Item>>,
    publish_failures: Vec<crate::sandbox::PublishFailure>,
    unmatched: Vec<UnmatchedItem>,
    starved: Vec<String>,
}

impl Scheduler {
    pub(super) fn new(
        graph: Arc<Graph>,
        config: Arc<EngineConfig>,
        sink: Arc<dyn EventSink>,
        token: Arc<CancellationToken>,
        run_id: Uuid,
        run_dir: PathBuf,
    ) -> Self {
        let sandbox = Arc::new(Sandbox::new(config.clone(), graph.params().clone()));
        let nodes = graph
            .nodes()
            .iter()
            .map(|node| match &node.def {
                NodeDef::Seed(_) => NodeRuntime::Seed,
                NodeDef::Stage(def) => NodeRuntime::Stage(stage_runtime(&graph, def, &node.inputs)),
                NodeDef::Combinator(c) => match &c.op {
                    CombinatorOp::FanOut { .. } => NodeRuntime::FanOut,
                    CombinatorOp::Collect { sort, .. } => NodeRuntime::Collect {
                        buffer: Vec::new(),
                        sort: sort.clone(),
                    },
                    CombinatorOp::CrossProduct { values, tag, .. } => NodeRuntime::Cross {
                        values: values.clone(),
                        tag: tag.clone(),
                    },
                    CombinatorOp::Mix { .. } => NodeRuntime::Mix {
                        open: node.inputs.iter().flatten().count(),
                    },
                },
            })
            .collect();

        Self {
            graph,
            config,
            sandbox,
            sink,
            token,
            run_id,
            run_dir,
            nodes,
            instances: Vec::new(),
            queue: VecDeque::new(),
            ready: VecDeque::new(),
            used_dirs: HashSet::new(),
            failures: FailureCollector::new(),
            aborting: false,
            outputs: BTreeMap::new(),
            publish_failures: Vec::new(),
            unmatched: Vec::new(),
            starved: Vec::new(),
        }
    }

    /// Runs the graph to completion, abort or cancellation.
    pub(super) async fn run(mut self) -> RunSummary {
        let started_at = Utc::now();
        let clock = Instant::now();
        let graph = self.graph.clone();

        for node in graph.nodes() {
            if let NodeDef::Seed(seed) = &node.def {
                let out = &node.outputs[0];
                match seed.flavor {
                    Flavor::Multi => {
                        for item in &seed.items {
                            self.queue.push_back(Signal::Emit(out.clone(), item.clone()));
                        }
                    }
                    Flavor::Broadcast => {
                        if let Some(value) = seed.broadcast_value() {
                            self.queue.push_back(Signal::SetBroadcast(out.clone(), value));
                        }
                    }
                }
                self.queue.push_back(Signal::Close(out.clone()));
            }
        }
        for index in 0..self.nodes.len() {
            self.maybe_spawn_single(index);
            self.check_finished(index);
        }
        self.pump();

        let token = self.token.clone();
        let mut running: FuturesUnordered<BoxFuture<'static, Completion>> = FuturesUnordered::new();
        let mut cancel_seen = false;

        loop {
            self.dispatch(&mut running);
            if running.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                () = token.cancelled(), if !cancel_seen => {
                    cancel_seen = true;
                    self.aborting = true;
                    warn!(reason = ?token.reason(), running = running.len(), "Cancelling run");
                }
                Some((id, result)) = running.next() => {
                    self.complete(id, result);
                    self.pump();
                }
            }
        }

        let mut stranded = 0usize;
        for id in 0..self.instances.len() {
            if !self.instances[id].state.is_terminal() {
                if !self.aborting {
                    stranded += 1;
                }
                self.transition(id, InstanceState::Cancelled, None);
            }
        }
        if stranded > 0 {
            error!(
                stranded,
                max_workers = self.config.max_workers,
                "Run stopped with instances that were never dispatched"
            );
        }

        let status = if token.is_cancelled() {
            RunStatus::Cancelled
        } else if self.failures.should_stop() || stranded > 0 {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        };

        let mut stages: BTreeMap<String, StageCounts> = graph
            .nodes()
            .iter()
            .filter_map(|n| n.def.as_stage().map(|s| (s.name.clone(), StageCounts::default())))
            .collect();
        for record in &self.instances {
            let name = graph.nodes()[record.node].name().to_string();
            let counts = stages.entry(name).or_default();
            match record.state {
                InstanceState::Succeeded => counts.succeeded += 1,
                InstanceState::Failed => counts.failed += 1,
                _ => counts.cancelled += 1,
            }
        }

        #[allow(clippy::cast_possible_truncation)]
        let duration_ms = clock.elapsed().as_millis() as u64;
        info!(
            run_id = %self.run_id,
            pipeline = %graph.name(),
            %status,
            duration_ms,
            failures = self.failures.failures().len(),
            "Run completed"
        );
        self.sink.try_emit(
            RUN_COMPLETED,
            Some(json!({
                "run_id": self.run_id.to_string(),
                "pipeline": graph.name(),
                "status": status,
                "duration_ms": duration_ms,
                "instances": self.instances.len(),
                "failures": self.failures.failures().len(),
            })),
        );

        RunSummary {
            run_id: self.run_id,
            pipeline: graph.name().to_string(),
            status,
            started_at,
            finished_at: Utc::now(),
            duration_ms,
            stages,
            failures: self.failures.into_failures(),
            publish_failures: self.publish_failures,
            unmatched: self.unmatched,
            starved: self.starved,
            pruned: graph.pruned().to_vec(),
            outputs: self.outputs,
            cancel_reason: token.reason(),
        }
    }

    fn dispatch(&mut self, running: &mut FuturesUnordered<BoxFuture<'static, Completion>>) {
        while running.len() < self.config.max_workers && !self.aborting && !self.token.is_cancelled() {
            let Some(id) = self.ready.pop_front() else {
                break;
            };
            let instance = self.prepare(id);
            self.instances[id].work_dir = Some(instance.work_dir.clone());
            self.transition(
                id,
                InstanceState::Running,
                Some(json!({ "work_dir": instance.work_dir })),
            );

            let sandbox = self.sandbox.clone();
            let token = self.token.clone();
            let handle = tokio::spawn(async move { sandbox.run(&instance, &token).await });
            running.push(async move { (id, handle.await) }.boxed());
        }
    }

    fn prepare(&mut self, id: usize) -> Instance {
        let node = self.instances[id].node;
        let key = self.instances[id].key.clone();
        let tags = self.instances[id].tags.clone();

        let (def, inputs, command) = {
            let Some(stage) = stage_mut(&mut self.nodes, node) else {
                unreachable!("instances are only created for stages");
            };
            let record = &self.instances[id];
            let inputs: Vec<(String, StreamValue)> = stage
                .def
                .inputs
                .iter()
                .enumerate()
                .filter_map(|(slot, port)| {
                    let value = match &stage.slots[slot] {
                        Slot::Multi => record
                            .multi
                            .iter()
                            .find(|(s, _)| *s == slot)
                            .map(|(_, item)| StreamValue::Item(item.clone())),
                        Slot::Broadcast(value) => value.clone(),
                    };
                    value.map(|v| (port.name.clone(), v))
                })
                .collect();

            let command = stage
                .command
                .get_or_insert_with(|| {
                    let chosen = stage.def.body.select(|port| {
                        inputs
                            .iter()
                            .find(|(name, _)| name == port)
                            .and_then(|(_, v)| matches!(v, StreamValue::List(_)).then_some(v.len()))
                    });
                    debug!(stage = %stage.def.name, command = chosen, "Selected body");
                    chosen.to_string()
                })
                .clone();
            (stage.def.clone(), inputs, command)
        };

        let work_dir = self.allocate_dir(&def.name, &key);
        Instance {
            stage: def,
            key,
            tags,
            inputs,
            command,
            work_dir,
        }
    }

    fn allocate_dir(&mut self, stage: &str, key: &str) -> PathBuf {
        let name = sanitize_key(key);
        let base = self.run_dir.join(stage);
        let mut candidate = base.join(&name);
        let mut n = 1;
        while !self.used_dirs.insert(candidate.clone()) {
            candidate = base.join(format!("{name}-{n}"));
            n += 1;
        }
        candidate
    }

    fn complete(&mut self, id: usize, result: Result<Result<SandboxOutcome, ExecutionError>, JoinError>) {
        let result = result.unwrap_or_else(|err| {
            Err(ExecutionError::Spawn {
                message: format!("worker task failed: {err}"),
            })
        });
        let node = self.instances[id].node;
        let Some(def) = stage_mut(&mut self.nodes, node).map(|s| s.def.clone()) else {
            return;
        };

        match result {
            Ok(outcome) => {
                self.transition(
                    id,
                    InstanceState::Succeeded,
                    Some(json!({ "work_dir": outcome.work_dir })),
                );
                for failure in outcome.publish_failures {
                    self.sink.try_emit(
                        PUBLISH_FAILED,
                        Some(json!({
                            "run_id": self.run_id.to_string(),
                            "stage": failure.stage,
                            "key": failure.key,
                            "file": failure.file,
                            "target": failure.target,
                            "message": failure.message,
                        })),
                    );
                    self.publish_failures.push(failure);
                }
                self.emit_outputs(id, node, outcome.outputs);
            }
            Err(ExecutionError::Cancelled { reason }) => {
                debug!(stage = %def.name, key = %self.instances[id].key, %reason, "Instance cancelled");
                self.transition(id, InstanceState::Cancelled, Some(json!({ "reason": reason })));
            }
            Err(error) => {
                let record = &self.instances[id];
                warn!(stage = %def.name, key = %record.key, error = %error, policy = ?def.policy, "Instance failed");
                let mut failure = FailureRecord::new(&def.name, &record.key, error.clone(), def.policy);
                if let Some(dir) = &record.work_dir {
                    failure = failure.with_work_dir(dir.display().to_string());
                }
                if self.failures.record(failure) {
                    info!(stage = %def.name, "Fail-fast: no further instances will start");
                    self.aborting = true;
                }
                self.transition(
                    id,
                    InstanceState::Failed,
                    Some(json!({ "error": error, "policy": def.policy })),
                );
            }
        }

        if let Some(stage) = stage_mut(&mut self.nodes, node) {
            stage.open = stage.open.saturating_sub(1);
        }
        self.check_finished(node);
    }

    fn emit_outputs(&mut self, id: usize, node: usize, outputs: Vec<(String, Vec<PathBuf>)>) {
        let graph = self.graph.clone();
        let record = &self.instances[id];
        for ((_, files), stream) in outputs.into_iter().zip(&graph.nodes()[node].outputs) {
            if files.is_empty() {
                continue;
            }
            let item = Item {
                key: record.key.clone(),
                files,
                tags: record.tags.clone(),
            };
            let broadcast = graph
                .stream(stream)
                .is_some_and(|info| info.flavor == Flavor::Broadcast);
            self.queue.push_back(if broadcast {
                Signal::SetBroadcast(stream.clone(), StreamValue::Item(item))
            } else {
                Signal::Emit(stream.clone(), item)
            });
        }
    }

    fn pump(&mut self) {
        let graph = self.graph.clone();
        while let Some(signal) = self.queue.pop_front() {
            match &signal {
                Signal::Emit(id, item) => self.outputs.entry(id.clone()).or_default().push(item.clone()),
                Signal::SetBroadcast(id, value) => self
                    .outputs
                    .entry(id.clone())
                    .or_default()
                    .extend(value.items().iter().cloned()),
                Signal::Close(_) => {}
            }

            let Some(info) = graph.stream(signal.stream()) else {
                continue;
            };
            for consumer in &info.consumers {
                match &graph.nodes()[consumer.node].def {
                    NodeDef::Stage(_) => self.stage_input(consumer.node, consumer.slot, &signal),
                    NodeDef::Combinator(_) => self.combinator_input(consumer.node, &signal),
                    NodeDef::Seed(_) => {}
                }
            }
        }
    }

    fn combinator_input(&mut self, node: usize, signal: &Signal) {
        let graph = self.graph.clone();
        let outputs = &graph.nodes()[node].outputs;
        let name = graph.nodes()[node].name();
        let mut emitted = Vec::new();
        let mut collected = None;

        match &mut self.nodes[node] {
            NodeRuntime::FanOut => emitted.extend(outputs.iter().map(|out| signal.retarget(out))),
            NodeRuntime::Collect { buffer, sort } => match signal {
                Signal::Emit(_, item) => buffer.push(item.clone()),
                Signal::SetBroadcast(..) => {}
                Signal::Close(_) => {
                    let mut items = std::mem::take(buffer);
                    if let Some(sort) = sort {
                        sort.sort(&mut items);
                    }
                    collected = Some(items.len());
                    emitted.push(Signal::SetBroadcast(outputs[0].clone(), StreamValue::List(items)));
                    emitted.push(Signal::Close(outputs[0].clone()));
                }
            },
            NodeRuntime::Cross { values, tag } => match signal {
                Signal::Emit(_, item) | Signal::SetBroadcast(_, StreamValue::Item(item)) => {
                    emitted.extend(
                        cross(item, values, tag)
                            .into_iter()
                            .map(|derived| Signal::Emit(outputs[0].clone(), derived)),
                    );
                }
                Signal::SetBroadcast(_, StreamValue::List(_)) => {}
                Signal::Close(_) => emitted.push(Signal::Close(outputs[0].clone())),
            },
            NodeRuntime::Mix { open } => match signal {
                Signal::Emit(_, item) | Signal::SetBroadcast(_, StreamValue::Item(item)) => {
                    emitted.push(Signal::Emit(outputs[0].clone(), item.clone()));
                }
                Signal::SetBroadcast(_, StreamValue::List(_)) => {}
                Signal::Close(_) => {
                    *open = open.saturating_sub(1);
                    if *open == 0 {
                        emitted.push(Signal::Close(outputs[0].clone()));
                    }
                }
            },
            NodeRuntime::Seed | NodeRuntime::Stage(_) => {}
        }

        if let Some(size) = collected {
            debug!(collect = name, size, "Collect barrier released");
            self.sink.try_emit(
                COLLECT_EMITTED,
                Some(json!({ "run_id": self.run_id.to_string(), "node": name, "size": size })),
            );
        }
        self.queue.extend(emitted);
    }

    fn stage_input(&mut self, node: usize, slot: usize, signal: &Signal) {
        match signal {
            Signal::Emit(_, item) => self.stage_item(node, slot, item.clone()),
            Signal::SetBroadcast(_, value) => {
                if let Some(stage) = stage_mut(&mut self.nodes, node) {
                    if let Slot::Broadcast(held) = &mut stage.slots[slot] {
                        *held = Some(value.clone());
                    }
                }
                self.release_waiting(node);
                self.maybe_spawn_single(node);
            }
            Signal::Close(_) => {
                let mut starve = false;
                if let Some(stage) = stage_mut(&mut self.nodes, node) {
                    match &mut stage.slots[slot] {
                        Slot::Multi => stage.multi_closed += 1,
                        Slot::Broadcast(value) => starve = value.is_none(),
                    }
                }
                if starve {
                    self.starve(node, slot);
                }
                self.check_finished(node);
            }
        }
    }

    fn stage_item(&mut self, node: usize, slot: usize, item: Item) {
        let joined = {
            let Some(stage) = stage_mut(&mut self.nodes, node) else {
                return;
            };
            if stage.multi_slots.len() == 1 {
                Some(vec![(slot, item)])
            } else {
                let Some(pos) = stage.multi_slots.iter().position(|&s| s == slot) else {
                    return;
                };
                let width = stage.multi_slots.len();
                let key = item.key.clone();
                let queues = stage
                    .joins
                    .entry(key.clone())
                    .or_insert_with(|| vec![VecDeque::new(); width]);
                queues[pos].push_back(item);

                if queues.iter().all(|q| !q.is_empty()) {
                    let parts: Vec<(usize, Item)> = stage
                        .multi_slots
                        .iter()
                        .zip(queues.iter_mut())
                        .filter_map(|(&s, q)| q.pop_front().map(|item| (s, item)))
                        .collect();
                    if queues.iter().all(VecDeque::is_empty) {
                        stage.joins.remove(&key);
                    }
                    Some(parts)
                } else {
                    None
                }
            }
        };

        if let Some(parts) = joined {
            let key = parts[0].1.key.clone();
            let mut tags = BTreeMap::new();
            for (_, item) in &parts {
                for (name, value) in &item.tags {
                    tags.entry(name.clone()).or_insert_with(|| value.clone());
                }
            }
            self.create_instance(node, key, tags, parts);
        }
    }

    fn create_instance(
        &mut self,
        node: usize,
        key: String,
        tags: BTreeMap<String, String>,
        multi: Vec<(usize, Item)>,
    ) {
        let id = self.instances.len();
        self.instances.push(InstanceRecord {
            node,
            key,
            tags,
            multi,
            state: InstanceState::Pending,
            work_dir: None,
        });
        self.announce(id, InstanceState::Pending, None);

        let Some(stage) = stage_mut(&mut self.nodes, node) else {
            return;
        };
        stage.open += 1;
        if stage.starved {
            stage.open -= 1;
            self.transition(id, InstanceState::Cancelled, Some(json!({ "reason": "starved" })));
        } else if stage.broadcasts_ready() {
            self.transition(id, InstanceState::Ready, None);
            self.ready.push_back(id);
        } else {
            stage.waiting.push(id);
        }
    }

    fn release_waiting(&mut self, node: usize) {
        let released = match stage_mut(&mut self.nodes, node) {
            Some(stage) if stage.broadcasts_ready() => std::mem::take(&mut stage.waiting),
            _ => return,
        };
        for id in released {
            self.transition(id, InstanceState::Ready, None);
            self.ready.push_back(id);
        }
    }

    fn maybe_spawn_single(&mut self, node: usize) {
        let identity = match stage_mut(&mut self.nodes, node) {
            Some(stage)
                if stage.multi_slots.is_empty()
                    && !stage.spawned_single
                    && !stage.starved
                    && stage.broadcasts_ready() =>
            {
                stage.spawned_single = true;
                stage.single_identity()
            }
            _ => return,
        };
        self.create_instance(node, identity.0, identity.1, Vec::new());
    }

    fn starve(&mut self, node: usize, slot: usize) {
        let (name, port, waiting) = {
            let Some(stage) = stage_mut(&mut self.nodes, node) else {
                return;
            };
            stage.starved = true;
            let waiting = std::mem::take(&mut stage.waiting);
            stage.open = stage.open.saturating_sub(waiting.len());
            (
                stage.def.name.clone(),
                stage.def.inputs[slot].name.clone(),
                waiting,
            )
        };

        warn!(stage = %name, port = %port, "Broadcast input closed without a value; stage will not run");
        if !self.starved.contains(&name) {
            self.starved.push(name);
        }
        for id in waiting {
            self.transition(id, InstanceState::Cancelled, Some(json!({ "reason": "starved" })));
        }
    }

    fn check_finished(&mut self, node: usize) {
        let graph = self.graph.clone();
        let (name, leftovers) = {
            let Some(stage) = stage_mut(&mut self.nodes, node) else {
                return;
            };
            let inputs_done = stage.multi_closed >= stage.multi_slots.len();
            let started = !stage.multi_slots.is_empty() || stage.spawned_single || stage.starved;
            if stage.finished || !inputs_done || stage.open > 0 || !started {
                return;
            }
            stage.finished = true;

            let mut leftovers = Vec::new();
            for (key, queues) in std::mem::take(&mut stage.joins) {
                for (pos, queue) in queues.iter().enumerate() {
                    let port = &stage.def.inputs[stage.multi_slots[pos]].name;
                    leftovers.extend(queue.iter().map(|_| UnmatchedItem {
                        stage: stage.def.name.clone(),
                        port: port.clone(),
                        key: key.clone(),
                    }));
                }
            }
            (stage.def.name.clone(), leftovers)
        };

        if !leftovers.is_empty() {
            warn!(stage = %name, count = leftovers.len(), "Items without a join partner");
        }
        debug!(stage = %name, "Stage finished; closing outputs");
        self.unmatched.extend(leftovers);
        for stream in &graph.nodes()[node].outputs {
            self.queue.push_back(Signal::Close(stream.clone()));
        }
    }

    fn transition(&mut self, id: usize, next: InstanceState, extra: Option<serde_json::Value>) {
        let record = &mut self.instances[id];
        if !record.state.can_transition_to(next) {
            debug!(instance = id, from = %record.state, to = %next, "Ignoring transition");
            return;
        }
        record.state = next;
        self.announce(id, next, extra);
    }

    fn announce(&self, id: usize, state: InstanceState, extra: Option<serde_json::Value>) {
        let record = &self.instances[id];
        let mut payload = json!({
            "run_id": self.run_id.to_string(),
            "instance": id,
            "stage": self.graph.nodes()[record.node].name(),
            "key": record.key,
        });
        if let (Some(serde_json::Value::Object(extra)), Some(map)) = (extra, payload.as_object_mut()) {
            map.extend(extra);
        }
        self.sink.try_emit(state.event_name(), Some(payload));
    }
}

fn stage_mut(nodes: &mut [NodeRuntime], node: usize) -> Option<&mut StageRuntime> {
    match nodes.get_mut(node) {
        Some(NodeRuntime::Stage(stage)) => Some(stage),
        _ => None,
    }
}

fn stage_runtime(graph: &Graph, def: &Arc<StageDef>, inputs: &[Option<String>]) -> StageRuntime {
    let mut slots = Vec::with_capacity(inputs.len());
    let mut multi_slots = Vec::new();

    for (index, (port, stream)) in def.inputs.iter().zip(inputs).enumerate() {
        let slot = match stream.as_deref().and_then(|id| graph.stream(id)) {
            Some(info) if info.flavor == Flavor::Multi => {
                multi_slots.push(index);
                Slot::Multi
            }
            Some(_) => Slot::Broadcast(None),
            None => Slot::Broadcast(port.default.clone()),
        };
        slots.push(slot);
    }

    StageRuntime {
        def: def.clone(),
        slots,
        multi_slots,
        joins: BTreeMap::new(),
        multi_closed: 0,
        waiting: Vec::new(),
        open: 0,
        spawned_single: false,
        starved: false,
        finished: false,
        command: None,
    }
}
