//! End-to-end runs with real `sh` stage bodies.

#[cfg(test)]
mod tests {
    use crate::config::EngineConfig;
    use crate::core::{Item, PortType, RunStatus};
    use crate::errors::ExecutionError;
    use crate::events::{CollectingEventSink, COLLECT_EMITTED};
    use crate::executor::{Executor, RunSummary, UnmatchedItem};
    use crate::params::{ParamValue, ParameterStore};
    use crate::pipeline::{FailurePolicy, Graph, GraphBuilder};
    use crate::stages::{Gate, OutputPort, SizeRule, StageDef};
    use crate::stream::{discover, parse_records, RecordLayout, Seed, SortKey};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn config(root: &Path) -> EngineConfig {
        EngineConfig::new()
            .with_shell("sh")
            .with_work_dir(root.join("work"))
            .with_publish_dir(root.join("results"))
            .with_max_workers(4)
    }

    async fn execute(graph: Graph, config: EngineConfig) -> (RunSummary, Arc<CollectingEventSink>) {
        let sink = Arc::new(CollectingEventSink::new());
        let summary = Executor::new(graph, config)
            .with_event_sink(sink.clone())
            .run()
            .await
            .unwrap();
        (summary, sink)
    }

    fn samples(keys: &[&str]) -> Vec<Item> {
        keys.iter().map(|k| Item::new(*k)).collect()
    }

    fn echo_stage(name: &str, source: &str) -> StageDef {
        StageDef::new(name, "echo {{ key }} > {{ prefix }}.out")
            .with_input("sample", source, PortType::item("sample"))
            .with_output("out", "*.out", "txt")
    }

    fn design_graph(call: bool) -> Result<Graph, crate::errors::StagewireError> {
        let layout = RecordLayout::new(["sample", "control", "id"], "sample");
        let rows = parse_records("A,B,X\nC,,Y\nD,E,Z\n", &layout, None)?;
        let params = ParameterStore::from_values([("call", ParamValue::Bool(call))]);

        GraphBuilder::new("design")
            .seed(Seed::multi("design", "row", rows))
            .stage(
                StageDef::new("call", "echo '{{ tags.id }} {{ tags.control }}' > {{ prefix }}.txt")
                    .with_input("row", "design", PortType::item("row"))
                    .with_output("result", "*.txt", "txt")
                    .with_gate(Gate::param("call")),
            )
            .collect("calls", "call.result", Some(SortKey::Key))
            .stage(
                StageDef::new("report", "cat {{ input.calls }} > report.txt")
                    .with_input("calls", "calls", PortType::list("txt"))
                    .with_output("report", "report.txt", "txt"),
            )
            .build(params)
    }

    #[tokio::test]
    async fn test_records_through_gated_stage() {
        let dir = tempfile::tempdir().unwrap();
        let (summary, _) = execute(design_graph(true).unwrap(), config(dir.path())).await;

        assert_eq!(summary.status, RunStatus::Succeeded);
        let mut keys: Vec<&str> = summary
            .outputs("call.result")
            .iter()
            .map(|i| i.key.as_str())
            .collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["A", "C", "D"]);

        let report = &summary.outputs("report.report")[0];
        let text = std::fs::read_to_string(&report.files[0]).unwrap();
        assert_eq!(text, "X B\nY \nZ E\n");
    }

    #[tokio::test]
    async fn test_gated_off_stage_and_sink_absent() {
        let graph = design_graph(false).unwrap();
        assert!(!graph.contains("call"));
        assert!(!graph.contains("calls"));
        assert!(!graph.contains("report"));
        assert_eq!(graph.pruned(), ["call", "calls", "report"]);

        let dir = tempfile::tempdir().unwrap();
        let (summary, sink) = execute(graph, config(dir.path())).await;
        assert!(summary.is_success());
        assert!(summary.stages.is_empty());
        assert!(sink.events_of_type("instance.").is_empty());
    }

    #[tokio::test]
    async fn test_cross_product_tags_each_instance() {
        let dir = tempfile::tempdir().unwrap();
        let graph = GraphBuilder::new("subsample")
            .seed(Seed::multi("reads", "sample", samples(&["S1"])))
            .cross_product("fractions", "reads", ["0.1", "0.5", "1.0"], "fraction")
            .stage(
                StageDef::new("sub", "echo {{ tags.fraction }} > {{ prefix }}.frac")
                    .with_input("reads", "fractions", PortType::item("sample"))
                    .with_output("frac", "*.frac", "frac"),
            )
            .build(ParameterStore::default())
            .unwrap();

        let (summary, _) = execute(graph, config(dir.path())).await;
        assert_eq!(summary.counts("sub").succeeded, 3);

        let outputs = summary.outputs("sub.frac");
        let fractions: BTreeSet<&str> = outputs.iter().filter_map(|i| i.tag("fraction")).collect();
        assert_eq!(fractions, BTreeSet::from(["0.1", "0.5", "1.0"]));
        for item in outputs {
            let text = std::fs::read_to_string(&item.files[0]).unwrap();
            assert_eq!(text.trim(), item.tag("fraction").unwrap());
        }
    }

    #[tokio::test]
    async fn test_collect_waits_for_all_instances() {
        let dir = tempfile::tempdir().unwrap();
        let graph = GraphBuilder::new("merge")
            .seed(Seed::multi("samples", "sample", samples(&["S4", "S2", "S3", "S1"])))
            .stage(echo_stage("touch", "samples"))
            .collect("all", "touch.out", Some(SortKey::Key))
            .stage(
                StageDef::new("merge", "cat {{ input.parts }} > merged.txt")
                    .with_input("parts", "all", PortType::list("txt"))
                    .with_output("merged", "merged.txt", "txt"),
            )
            .build(ParameterStore::default())
            .unwrap();

        let (summary, sink) = execute(graph, config(dir.path())).await;
        assert!(summary.is_success());

        let collected = sink.events_of_type(COLLECT_EMITTED);
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].1.as_ref().unwrap()["size"], 4);

        let events = sink.events();
        let emitted_at = events.iter().position(|(n, _)| n == COLLECT_EMITTED).unwrap();
        let last_touch = events
            .iter()
            .rposition(|(n, data)| {
                n == "instance.succeeded"
                    && data.as_ref().is_some_and(|d| d["stage"] == "touch")
            })
            .unwrap();
        assert!(last_touch < emitted_at);

        let merged = &summary.outputs("merge.merged")[0];
        assert_eq!(merged.key, "merge");
        let text = std::fs::read_to_string(&merged.files[0]).unwrap();
        assert_eq!(text, "S1\nS2\nS3\nS4\n");
    }

    #[tokio::test]
    async fn test_size_variant_selected_from_collected_list() {
        let dir = tempfile::tempdir().unwrap();
        let graph = GraphBuilder::new("variant")
            .seed(Seed::multi("samples", "sample", samples(&["S1"])))
            .stage(echo_stage("touch", "samples"))
            .collect("all", "touch.out", None)
            .stage(
                StageDef::new("merge", "echo many > merged.txt")
                    .with_variant(SizeRule::exactly("parts", 1), "echo single > merged.txt")
                    .with_input("parts", "all", PortType::list("txt"))
                    .with_output("merged", "merged.txt", "txt"),
            )
            .build(ParameterStore::default())
            .unwrap();

        let (summary, _) = execute(graph, config(dir.path())).await;
        let merged = &summary.outputs("merge.merged")[0];
        assert_eq!(std::fs::read_to_string(&merged.files[0]).unwrap(), "single\n");
    }

    fn flaky_graph(policy: FailurePolicy) -> Graph {
        GraphBuilder::new("flaky")
            .seed(Seed::multi("samples", "sample", samples(&["A", "B", "C"])))
            .stage(
                StageDef::new(
                    "flaky",
                    "{% if key == 'B' %}echo boom >&2\nexit 3\n{% endif %}echo {{ key }} > {{ prefix }}.out",
                )
                .with_input("sample", "samples", PortType::item("sample"))
                .with_output("out", "*.out", "txt")
                .with_policy(policy),
            )
            .collect("all", "flaky.out", Some(SortKey::Key))
            .build(ParameterStore::default())
            .unwrap()
    }

    #[tokio::test]
    async fn test_fail_fast_stops_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path()).with_max_workers(1);
        let (summary, sink) = execute(flaky_graph(FailurePolicy::FailFast), config).await;

        assert_eq!(summary.status, RunStatus::Failed);
        let counts = summary.counts("flaky");
        assert_eq!((counts.succeeded, counts.failed, counts.cancelled), (1, 1, 1));

        let failure = &summary.failures[0];
        assert_eq!(failure.key, "B");
        assert!(failure.work_dir.is_some());
        match &failure.error {
            ExecutionError::NonZeroExit { code, stderr_tail } => {
                assert_eq!(*code, 3);
                assert_eq!(stderr_tail, "boom");
            }
            other => panic!("unexpected {other:?}"),
        }

        let names = sink.names();
        let failed_at = names.iter().position(|n| n == "instance.failed").unwrap();
        assert!(!names[failed_at..].iter().any(|n| n == "instance.running"));
        assert!(sink.events_of_type(COLLECT_EMITTED).is_empty());
    }

    #[tokio::test]
    async fn test_ignore_policy_records_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        let (summary, sink) = execute(flaky_graph(FailurePolicy::Ignore), config(dir.path())).await;

        assert_eq!(summary.status, RunStatus::Succeeded);
        assert_eq!(summary.counts("flaky").succeeded, 2);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].policy, FailurePolicy::Ignore);

        let collected = sink.events_of_type(COLLECT_EMITTED);
        assert_eq!(collected[0].1.as_ref().unwrap()["size"], 2);
    }

    #[tokio::test]
    async fn test_published_output_rediscovered_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let graph = GraphBuilder::new("publish")
            .seed(Seed::multi("samples", "sample", samples(&["S1", "S2"])))
            .stage(
                StageDef::new("report", "printf '%s\\n\\001\\377' {{ key }} > {{ prefix }}.bin")
                    .with_input("sample", "samples", PortType::item("sample"))
                    .with_output_port(OutputPort::new("bin", "*.bin", "bin").published()),
            )
            .build(ParameterStore::default())
            .unwrap();

        let (summary, _) = execute(graph, config(dir.path())).await;
        assert!(summary.publish_failures.is_empty());

        let rediscovered = discover(&dir.path().join("results/report"), "*.bin").unwrap();
        assert_eq!(rediscovered.len(), 2);
        for original in summary.outputs("report.bin") {
            let copy = rediscovered.iter().find(|i| i.key == original.key).unwrap();
            assert_eq!(
                std::fs::read(&copy.files[0]).unwrap(),
                std::fs::read(&original.files[0]).unwrap()
            );
        }
    }

    #[tokio::test]
    async fn test_flat_publish_collision_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let graph = GraphBuilder::new("stats")
            .seed(Seed::multi("samples", "sample", samples(&["S1", "S2"])))
            .stage(
                StageDef::new("stats", "echo {{ key }} > stats.txt")
                    .with_input("sample", "samples", PortType::item("sample"))
                    .with_output_port(OutputPort::new("stats", "stats.txt", "txt").published()),
            )
            .build(ParameterStore::default())
            .unwrap();

        let (summary, _) = execute(graph, config(dir.path())).await;
        assert_eq!(summary.status, RunStatus::Succeeded);
        assert_eq!(summary.counts("stats").succeeded, 2);
        assert_eq!(summary.publish_failures.len(), 1);

        let loser = &summary.publish_failures[0];
        let winner = if loser.key == "S1" { "S2" } else { "S1" };
        let published = std::fs::read_to_string(dir.path().join("results/stats/stats.txt")).unwrap();
        assert_eq!(published, format!("{winner}\n"));
    }

    #[tokio::test]
    async fn test_undispatched_instances_fail_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let graph = GraphBuilder::new("idle")
            .seed(Seed::multi("samples", "sample", samples(&["S1"])))
            .stage(echo_stage("echo", "samples"))
            .build(ParameterStore::default())
            .unwrap();
        let mut config = config(dir.path());
        config.max_workers = 0;

        let (summary, _) = execute(graph, config).await;
        assert_eq!(summary.status, RunStatus::Failed);
        assert!(!summary.is_success());
        assert_eq!(summary.counts("echo").succeeded, 0);
        assert_eq!(summary.counts("echo").cancelled, 1);
    }

    #[tokio::test]
    async fn test_missing_required_output_fails_instance() {
        let dir = tempfile::tempdir().unwrap();
        let graph = GraphBuilder::new("missing")
            .seed(Seed::multi("samples", "sample", samples(&["S1"])))
            .stage(
                StageDef::new("noop", "true")
                    .with_input("sample", "samples", PortType::item("sample"))
                    .with_output("bam", "{{ prefix }}.bam", "bam"),
            )
            .build(ParameterStore::default())
            .unwrap();

        let (summary, _) = execute(graph, config(dir.path())).await;
        assert_eq!(summary.status, RunStatus::Failed);
        assert!(matches!(
            &summary.failures[0].error,
            ExecutionError::MissingOutput { pattern, .. } if pattern == "S1.bam"
        ));
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let graph = GraphBuilder::new("slow")
            .seed(Seed::multi("samples", "sample", samples(&["S1"])))
            .stage(
                StageDef::new("slow", "sleep 5")
                    .with_input("sample", "samples", PortType::item("sample"))
                    .with_timeout(Duration::from_secs(1)),
            )
            .build(ParameterStore::default())
            .unwrap();

        let started = Instant::now();
        let (summary, _) = execute(graph, config(dir.path())).await;
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(summary.status, RunStatus::Failed);
        assert!(matches!(
            summary.failures[0].error,
            ExecutionError::Timeout { millis: 1000 }
        ));
    }

    #[tokio::test]
    async fn test_cancellation_kills_running_and_skips_ready() {
        let dir = tempfile::tempdir().unwrap();
        let graph = GraphBuilder::new("cancel")
            .seed(Seed::multi("samples", "sample", samples(&["S1", "S2", "S3"])))
            .stage(
                StageDef::new("slow", "sleep 5")
                    .with_input("sample", "samples", PortType::item("sample")),
            )
            .build(ParameterStore::default())
            .unwrap();

        let executor = Executor::new(graph, config(dir.path()).with_max_workers(2));
        let token = executor.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            token.cancel("stop");
        });

        let started = Instant::now();
        let summary = executor.run().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(summary.status, RunStatus::Cancelled);
        assert_eq!(summary.cancel_reason.as_deref(), Some("stop"));
        assert_eq!(summary.counts("slow").cancelled, 3);
        assert!(summary.failures.is_empty());
    }

    #[tokio::test]
    async fn test_key_join_pairs_and_reports_unmatched() {
        let dir = tempfile::tempdir().unwrap();
        let graph = GraphBuilder::new("pairs")
            .seed(Seed::multi("tumor", "sample", samples(&["P1", "P2", "P3"])))
            .seed(Seed::multi("normal", "sample", samples(&["P4", "P2", "P1"])))
            .stage(
                StageDef::new("pair", "touch {{ prefix }}.pair")
                    .with_input("tumor", "tumor", PortType::item("sample"))
                    .with_input("normal", "normal", PortType::item("sample"))
                    .with_output("pair", "*.pair", "pair"),
            )
            .build(ParameterStore::default())
            .unwrap();

        let (summary, _) = execute(graph, config(dir.path())).await;
        assert_eq!(summary.counts("pair").succeeded, 2);

        let mut unmatched = summary.unmatched.clone();
        unmatched.sort_by(|a, b| a.key.cmp(&b.key));
        assert_eq!(
            unmatched,
            vec![
                UnmatchedItem {
                    stage: "pair".to_string(),
                    port: "tumor".to_string(),
                    key: "P3".to_string(),
                },
                UnmatchedItem {
                    stage: "pair".to_string(),
                    port: "normal".to_string(),
                    key: "P4".to_string(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_mix_interleaves_sources() {
        let dir = tempfile::tempdir().unwrap();
        let graph = GraphBuilder::new("mix")
            .seed(Seed::multi("lane1", "sample", samples(&["L1a", "L1b"])))
            .seed(Seed::multi("lane2", "sample", samples(&["L2a"])))
            .mix("lanes", ["lane1", "lane2"])
            .stage(echo_stage("touch", "lanes"))
            .build(ParameterStore::default())
            .unwrap();

        let (summary, _) = execute(graph, config(dir.path())).await;
        assert_eq!(summary.counts("touch").succeeded, 3);
        assert_eq!(summary.outputs("touch.out").len(), 3);
    }

    #[tokio::test]
    async fn test_broadcast_closed_without_value_starves_consumer() {
        let dir = tempfile::tempdir().unwrap();
        let graph = GraphBuilder::new("starve")
            .seed(Seed::multi("samples", "sample", samples(&["S1", "S2"])))
            .stage(
                StageDef::new("index", "true")
                    .with_output_port(OutputPort::new("idx", "*.idx", "idx").optional()),
            )
            .stage(
                StageDef::new("align", "touch {{ prefix }}.bam")
                    .with_input("sample", "samples", PortType::item("sample"))
                    .with_input("idx", "index.idx", PortType::item("idx"))
                    .with_output("bam", "*.bam", "bam"),
            )
            .build(ParameterStore::default())
            .unwrap();

        let (summary, _) = execute(graph, config(dir.path())).await;
        assert!(summary.is_success());
        assert_eq!(summary.counts("index").succeeded, 1);
        assert_eq!(summary.counts("align").cancelled, 2);
        assert_eq!(summary.starved, vec!["align"]);
    }

    #[tokio::test]
    async fn test_successful_run_reclaims_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        let graph = GraphBuilder::new("clean")
            .seed(Seed::multi("samples", "sample", samples(&["S1"])))
            .stage(echo_stage("touch", "samples"))
            .build(ParameterStore::default())
            .unwrap();

        let (summary, _) = execute(graph, config(dir.path()).with_retain_work(false)).await;
        assert!(summary.is_success());
        assert!(!dir.path().join("work").join(summary.run_id.to_string()).exists());
    }
}
