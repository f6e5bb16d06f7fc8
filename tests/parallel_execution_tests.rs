//! Parallel Execution Tests
//!
//! Tests for:
//! - Correctness of parallel fan-out over a thread pool
//! - Parallelism gating on storage capability
//! - First-error propagation with cancellation of queued cells
//! - Memory storage in sequential runs, with persistence

use pipemap::map::{run, RunOptions};
use pipemap::pipeline::{PipeFunc, Pipeline};
use pipemap::value::Value;
use pipemap::RunError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn ints(values: &[i64]) -> Value {
    Value::List(values.iter().copied().map(Value::Int).collect())
}

fn doubler() -> PipeFunc {
    PipeFunc::new("double", &["x"], "y", |kw| Ok(Value::Int(kw.int("x")? * 2)))
        .with_mapspec("x[i] -> y[i]")
        .unwrap()
}

#[test]
fn test_parallel_run_matches_sequential() {
    let values: Vec<i64> = (0..64).collect();
    let inputs = HashMap::from([("x".to_string(), ints(&values))]);

    let seq_temp = TempDir::new().unwrap();
    let sequential = run(
        &Pipeline::new(vec![doubler()]).unwrap(),
        &inputs,
        seq_temp.path(),
        &RunOptions {
            parallel: false,
            ..RunOptions::default()
        },
    )
    .unwrap();

    let par_temp = TempDir::new().unwrap();
    let parallel = run(
        &Pipeline::new(vec![doubler()]).unwrap(),
        &inputs,
        par_temp.path(),
        &RunOptions {
            num_threads: 4,
            ..RunOptions::default()
        },
    )
    .unwrap();

    assert_eq!(parallel["y"].output, sequential["y"].output);
    let expected: Vec<i64> = values.iter().map(|v| v * 2).collect();
    assert_eq!(parallel["y"].output, ints(&expected));
}

#[test]
fn test_parallel_workers_each_touch_distinct_cells() {
    let temp = TempDir::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let double = PipeFunc::new("double", &["x"], "y", move |kw| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Int(kw.int("x")? * 2))
    })
    .with_mapspec("x[i] -> y[i]")
    .unwrap();
    let pipeline = Pipeline::new(vec![double]).unwrap();
    let values: Vec<i64> = (0..32).collect();
    let inputs = HashMap::from([("x".to_string(), ints(&values))]);

    run(
        &pipeline,
        &inputs,
        temp.path(),
        &RunOptions {
            num_threads: 8,
            ..RunOptions::default()
        },
    )
    .unwrap();

    // Exactly one call per cell and one blob per cell.
    assert_eq!(calls.load(Ordering::SeqCst), 32);
    for i in 0..32 {
        assert!(temp.path().join(format!("outputs/y/{i}")).is_file());
    }
}

#[test]
fn test_parallel_with_memory_storage_rejected_before_any_call() {
    let temp = TempDir::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let double = PipeFunc::new("double", &["x"], "y", move |kw| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Int(kw.int("x")? * 2))
    })
    .with_mapspec("x[i] -> y[i]")
    .unwrap();
    let pipeline = Pipeline::new(vec![double]).unwrap();
    let inputs = HashMap::from([("x".to_string(), ints(&[1, 2, 3]))]);

    let err = run(
        &pipeline,
        &inputs,
        temp.path(),
        &RunOptions {
            storage: "memory".to_string(),
            ..RunOptions::default()
        },
    )
    .unwrap_err();

    assert!(matches!(err, RunError::ParallelismUnsupported(ref id) if id == "memory"));
    assert_eq!(calls.load(Ordering::SeqCst), 0, "gated before execution");
}

#[test]
fn test_memory_storage_sequential_run_persists() {
    let temp = TempDir::new().unwrap();
    let pipeline = Pipeline::new(vec![doubler()]).unwrap();
    let inputs = HashMap::from([("x".to_string(), ints(&[1, 2, 3]))]);

    let results = run(
        &pipeline,
        &inputs,
        temp.path(),
        &RunOptions {
            parallel: false,
            storage: "memory".to_string(),
            persist_memory: true,
            ..RunOptions::default()
        },
    )
    .unwrap();
    assert_eq!(results["y"].output, ints(&[2, 4, 6]));

    // persist_memory flushed the cells into the file layout.
    for i in 0..3 {
        assert!(temp.path().join(format!("outputs/y/{i}")).is_file());
    }
}

#[test]
fn test_first_error_cancels_remaining_cells() {
    let temp = TempDir::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let flaky = PipeFunc::new("flaky", &["x"], "y", move |kw| {
        counter.fetch_add(1, Ordering::SeqCst);
        let x = kw.int("x")?;
        if x == 0 {
            anyhow::bail!("first cell fails");
        }
        // Slow cells give cancellation a chance to observe the flag.
        std::thread::sleep(std::time::Duration::from_millis(5));
        Ok(Value::Int(x))
    })
    .with_mapspec("x[i] -> y[i]")
    .unwrap();
    let pipeline = Pipeline::new(vec![flaky]).unwrap();
    let values: Vec<i64> = (0..256).collect();
    let inputs = HashMap::from([("x".to_string(), ints(&values))]);

    let err = run(
        &pipeline,
        &inputs,
        temp.path(),
        &RunOptions {
            num_threads: 2,
            ..RunOptions::default()
        },
    )
    .unwrap_err();

    assert!(err.to_string().contains("first cell fails"));
    assert!(err.to_string().contains("flaky"));
    // Cancellation stops the fan-out well short of the full sweep.
    assert!(
        calls.load(Ordering::SeqCst) < 256,
        "queued cells were skipped after the failure"
    );
}

#[test]
fn test_parallel_resume_after_partial_run() {
    let temp = TempDir::new().unwrap();
    let first_calls = Arc::new(AtomicUsize::new(0));
    let second_calls = Arc::new(AtomicUsize::new(0));
    let values: Vec<i64> = (0..16).collect();
    let inputs = HashMap::from([("x".to_string(), ints(&values))]);

    let c = Arc::clone(&first_calls);
    let counted = PipeFunc::new("double", &["x"], "y", move |kw| {
        c.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Int(kw.int("x")? * 2))
    })
    .with_mapspec("x[i] -> y[i]")
    .unwrap();
    run(
        &Pipeline::new(vec![counted]).unwrap(),
        &inputs,
        temp.path(),
        &RunOptions::default(),
    )
    .unwrap();
    assert_eq!(first_calls.load(Ordering::SeqCst), 16);

    // Remove a few cells and rerun in parallel without cleanup.
    for i in [3usize, 7, 11] {
        std::fs::remove_file(temp.path().join(format!("outputs/y/{i}"))).unwrap();
    }
    let c = Arc::clone(&second_calls);
    let recounted = PipeFunc::new("double", &["x"], "y", move |kw| {
        c.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Int(kw.int("x")? * 2))
    })
    .with_mapspec("x[i] -> y[i]")
    .unwrap();
    let results = run(
        &Pipeline::new(vec![recounted]).unwrap(),
        &inputs,
        temp.path(),
        &RunOptions {
            cleanup: false,
            ..RunOptions::default()
        },
    )
    .unwrap();

    assert_eq!(second_calls.load(Ordering::SeqCst), 3);
    let expected: Vec<i64> = values.iter().map(|v| v * 2).collect();
    assert_eq!(results["y"].output, ints(&expected));
}
