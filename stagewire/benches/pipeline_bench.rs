//! Benchmarks for glob matching and graph building.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use stagewire::core::{Item, PortType};
use stagewire::glob::Pattern;
use stagewire::params::ParameterStore;
use stagewire::pipeline::GraphBuilder;
use stagewire::stages::StageDef;
use stagewire::stream::{Seed, SortKey};

fn glob_benchmark(c: &mut Criterion) {
    let pattern = Pattern::new("*_R{1,2}.f[aq]*.gz");
    let names: Vec<String> = (0..1_000)
        .map(|i| format!("sample{i}_R{}.fastq.gz", i % 2 + 1))
        .collect();

    c.bench_function("glob_match_1000", |b| {
        b.iter(|| names.iter().filter(|n| pattern.matches(black_box(n))).count());
    });
    c.bench_function("glob_captures_1000", |b| {
        b.iter(|| {
            names
                .iter()
                .filter_map(|n| pattern.captures(black_box(n)))
                .count()
        });
    });
}

fn chain(width: usize) -> GraphBuilder {
    let items = (0..width).map(|i| Item::new(format!("S{i}"))).collect();
    let mut builder = GraphBuilder::new("bench").seed(Seed::multi("reads", "fastq", items));
    let mut source = "reads".to_string();
    for step in 0..50 {
        let name = format!("step{step}");
        builder = builder.stage(
            StageDef::new(&name, "cp {{ input.data }} {{ prefix }}.out")
                .with_input("data", &source, PortType::item("any"))
                .with_output("out", "*.out", "data"),
        );
        source = name;
    }
    builder.collect("all", source, Some(SortKey::Key))
}

fn build_benchmark(c: &mut Criterion) {
    c.bench_function("build_chain_50", |b| {
        b.iter(|| {
            chain(black_box(10))
                .build(ParameterStore::default())
                .map(|g| g.stage_count())
        });
    });
}

criterion_group!(benches, glob_benchmark, build_benchmark);
criterion_main!(benches);
