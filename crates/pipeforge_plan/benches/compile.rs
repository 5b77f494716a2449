//! Benchmarks for build script generation
//!
//! Run with: cargo bench -p pipeforge_plan

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pipeforge_core::PortRef;
use pipeforge_plan::{Pipeline, Position, ScriptCompiler, ScriptOptions, Table};
use pipeforge_toolbox::{Format, FormatRegistry, ModuleDef, Parameter, Toolbox};
use std::fmt::Write;
use std::path::Path;
use std::sync::Arc;

fn toolbox() -> Arc<Toolbox> {
    let formats = FormatRegistry::load([Format::new("text", "txt")]).unwrap();
    let mut toolbox = Toolbox::new("bench", formats);
    let step = ModuleDef::new(
        "step",
        vec![Parameter::required("in", "text")],
        vec![Parameter::required("out", "text")],
        "step {in} > {out}",
    )
    .unwrap();
    toolbox.register_module(step).unwrap();
    Arc::new(toolbox)
}

/// Source, `depth` chained modules, sink
fn chain(depth: usize) -> Pipeline {
    let mut pipeline = Pipeline::new("chain", toolbox());
    let at = Position::default();
    let mut last = pipeline
        .add_source("infile", Parameter::required("in", "text"), at)
        .unwrap();
    for _ in 0..depth {
        let m = pipeline.add_module("step", at).unwrap();
        pipeline
            .connect(PortRef::output(last, 0), PortRef::input(m, 0))
            .unwrap();
        last = m;
    }
    let sink = pipeline
        .add_sink("outfile", Parameter::required("out", "text"), at)
        .unwrap();
    pipeline
        .connect(PortRef::output(last, 0), PortRef::input(sink, 0))
        .unwrap();
    pipeline
}

fn table(rows: usize) -> Table {
    let mut text = String::from("id|infile|outfile\n");
    for i in 0..rows {
        let _ = writeln!(text, "{i}|in/{i}.txt|out/{i}.txt");
    }
    Table::parse(&text).unwrap()
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");
    let compiler = ScriptCompiler::new(ScriptOptions::new().with_keep_going(true));
    let pipeline = chain(8);

    for rows in [10, 100, 1000] {
        let table = table(rows);
        group.throughput(Throughput::Elements(rows as u64));
        group.bench_with_input(BenchmarkId::from_parameter(rows), &table, |b, table| {
            b.iter(|| {
                compiler
                    .compile(black_box(&pipeline), black_box(table), Path::new("/tmp/bench"))
                    .unwrap()
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_compile);
criterion_main!(benches);
