//! Mapspec and scheduler benchmarks: parse, shape, key enumeration, and a
//! full sequential sweep.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use pipemap::map::{run, RunOptions};
use pipemap::mapspec::{parse_mapspec, MapSpec};
use pipemap::pipeline::{PipeFunc, Pipeline};
use pipemap::value::Value;
use std::collections::HashMap;
use tempfile::TempDir;

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");
    for spec in ["x[i] -> y[i]", "a[i], b[i], c[j], d[k] -> out[i, j, k]"] {
        group.bench_with_input(BenchmarkId::from_parameter(spec), &spec, |bench, spec| {
            bench.iter(|| parse_mapspec(spec).unwrap());
        });
    }
    group.finish();
}

fn bench_input_keys(c: &mut Criterion) {
    let ms: MapSpec = "a[i], b[j], c[k] -> out[i, j, k]".parse().unwrap();
    let external = [20, 20, 20];

    c.bench_function("input_keys_8000_cells", |bench| {
        bench.iter(|| {
            for linear in 0..8000 {
                let _ = ms.input_keys(&external, linear);
            }
        });
    });
}

fn bench_sequential_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequential_sweep");
    group.sample_size(10);
    for size in [100i64, 1_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |bench, &size| {
            bench.iter(|| {
                let temp = TempDir::new().unwrap();
                let double =
                    PipeFunc::new("double", &["x"], "y", |kw| Ok(Value::Int(kw.int("x")? * 2)))
                        .with_mapspec("x[i] -> y[i]")
                        .unwrap();
                let pipeline = Pipeline::new(vec![double]).unwrap();
                let values: Vec<i64> = (0..size).collect();
                let inputs = HashMap::from([(
                    "x".to_string(),
                    Value::List(values.into_iter().map(Value::Int).collect()),
                )]);
                run(
                    &pipeline,
                    &inputs,
                    temp.path(),
                    &RunOptions {
                        parallel: false,
                        ..RunOptions::default()
                    },
                )
                .unwrap()
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_parse, bench_input_keys, bench_sequential_sweep);
criterion_main!(benches);
