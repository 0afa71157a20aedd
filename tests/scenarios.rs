// Copyright 2024 the labforge Project
// Licensed under the MIT License

//! End-to-end scenarios S1-S6.

use labforge::cache::CacheStore;
use labforge::config::Config;
use labforge::executor::{extract_results, Executor};
use labforge::planner;
use labforge::registry::{ProcessOutput, ProcessRegistry};
use labforge::value::{Params, Value};
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use tectonic_status_base::plain::PlainStatusBackend;

static RETURN_N_CALLS: AtomicUsize = AtomicUsize::new(0);

fn return_n(_inputs: &[Value], params: &Params) -> tectonic_errors::Result<ProcessOutput> {
    RETURN_N_CALLS.fetch_add(1, Ordering::SeqCst);
    Ok(ProcessOutput::Single(params["n"].clone()))
}

fn return_inverse(inputs: &[Value], _params: &Params) -> tectonic_errors::Result<ProcessOutput> {
    Ok(ProcessOutput::Single(Value::from(-inputs[0].as_i64().unwrap())))
}

fn pair(inputs: &[Value], _params: &Params) -> tectonic_errors::Result<ProcessOutput> {
    let n = inputs[0].as_i64().unwrap();
    Ok(ProcessOutput::Multiple(vec![Value::from(-n), Value::from(n)]))
}

fn identity(inputs: &[Value], _params: &Params) -> tectonic_errors::Result<ProcessOutput> {
    Ok(ProcessOutput::Single(inputs[0].clone()))
}

fn demo_registry() -> ProcessRegistry {
    let mut reg = ProcessRegistry::new();
    reg.register("return_n", &["n"], return_n);
    reg.register("return_inverse", &[], return_inverse);
    reg.register("pair", &[], pair);
    reg.register("identity", &[], identity);
    reg
}

fn status() -> PlainStatusBackend {
    PlainStatusBackend::default()
}

#[test]
fn s1_single_trial() {
    let dir = tempfile::tempdir().unwrap();
    let mut cache = CacheStore::open(dir.path(), &mut status()).unwrap();
    let registry = demo_registry();

    let config: Config = toml::from_str(
        r#"
        [sources]
        zero = "value:0"

        [experiments.exp1]
        results = ["neg"]

        [experiments.exp1.structure.neg]
        function = "return_inverse"
        sources = ["zero"]
        results = ["neg"]
        "#,
    )
    .unwrap();

    let plan = planner::plan(&config, &registry, &mut cache).unwrap();
    let executor = Executor::new("lab", &registry);
    executor.run(&plan, &mut cache, &mut status()).unwrap();

    let results = extract_results(&plan);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].trial, "control");
    assert_eq!(results[0].process, "neg");
    assert_eq!(results[0].value(&cache).unwrap(), Value::from(0));

    // Re-run: no cached object is missing, so nothing new is written; the
    // plan is unchanged and every row is already `has_run`.
    assert!(plan.iter().all(|row| row.has_run(&cache)));
    executor.run(&plan, &mut cache, &mut status()).unwrap();
    assert_eq!(extract_results(&plan)[0].value(&cache).unwrap(), Value::from(0));
}

#[test]
fn s2_multi_trial_partial_reuse() {
    RETURN_N_CALLS.store(0, Ordering::SeqCst);

    let dir = tempfile::tempdir().unwrap();
    let mut cache = CacheStore::open(dir.path(), &mut status()).unwrap();
    let registry = demo_registry();

    let config: Config = toml::from_str(
        r#"
        [experiments.exp1]
        results = ["b"]

        [experiments.exp1.parameters]
        "a.n" = 5

        [experiments.exp1.structure.a]
        function = "return_n"
        sources = []
        results = ["a"]

        [experiments.exp1.structure.b]
        function = "return_inverse"
        sources = ["a"]
        results = ["b"]

        [experiments.exp1.trials.t1]

        [experiments.exp1.trials.t2]
        "a.n" = 3
        "#,
    )
    .unwrap();

    let plan = planner::plan(&config, &registry, &mut cache).unwrap();
    let executor = Executor::new("lab", &registry);
    executor.run(&plan, &mut cache, &mut status()).unwrap();

    let results = extract_results(&plan);
    let by_trial = |trial: &str| {
        results
            .iter()
            .find(|r| r.trial == trial)
            .unwrap()
            .value(&cache)
            .unwrap()
    };

    assert_eq!(by_trial("control"), Value::from(-5));
    assert_eq!(by_trial("t1"), Value::from(-5));
    assert_eq!(by_trial("t2"), Value::from(-3));

    // process `a` with n=5 is shared by `control` and `t1`: it should
    // have run exactly once across the two trials that reuse it (plus
    // the distinct n=3 invocation for `t2`) -- two calls total.
    assert_eq!(RETURN_N_CALLS.load(Ordering::SeqCst), 2);
}

#[test]
fn s3_multi_result_process() {
    let dir = tempfile::tempdir().unwrap();
    let mut cache = CacheStore::open(dir.path(), &mut status()).unwrap();
    let registry = demo_registry();

    let config: Config = toml::from_str(
        r#"
        [sources]
        five = "value:5"

        [experiments.exp1]
        results = ["hi"]

        [experiments.exp1.structure.p]
        function = "pair"
        sources = ["five"]
        results = ["lo", "hi"]
        "#,
    )
    .unwrap();

    let plan = planner::plan(&config, &registry, &mut cache).unwrap();
    let executor = Executor::new("lab", &registry);
    executor.run(&plan, &mut cache, &mut status()).unwrap();

    let results = extract_results(&plan);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].result_name, "hi");
    assert_eq!(results[0].value(&cache).unwrap(), Value::from(5));

    let row = &plan[0];
    assert_eq!(row.result_hashes.len(), 2);
    assert_ne!(row.result_hashes[0], row.result_hashes[1]);
    assert_eq!(cache.get(&row.result_hashes[0]).unwrap(), Value::from(-5));
}

#[test]
fn s4_external_file_ingestion() {
    let dir = tempfile::tempdir().unwrap();
    let mut cache = CacheStore::open(dir.path(), &mut status()).unwrap();
    let registry = demo_registry();

    let external = dir.path().join("staging.bin");
    fs::write(&external, b"DATA").unwrap();
    cache.add_file(&external).unwrap();

    let config: Config = toml::from_str(
        r#"
        [sources]
        d = "file:staging.bin"

        [experiments.exp1]
        results = ["out"]

        [experiments.exp1.structure.f]
        function = "identity"
        sources = ["d"]
        results = ["out"]
        "#,
    )
    .unwrap();

    let plan = planner::plan(&config, &registry, &mut cache).unwrap();
    let executor = Executor::new("lab", &registry);
    executor.run(&plan, &mut cache, &mut status()).unwrap();

    let results = extract_results(&plan);
    assert_eq!(results[0].value(&cache).unwrap(), Value::String("DATA".to_owned()));
}

#[test]
fn s5_corruption_recovery() {
    let dir = tempfile::tempdir().unwrap();
    let mut cache = CacheStore::open(dir.path(), &mut status()).unwrap();
    let registry = demo_registry();

    let config: Config = toml::from_str(
        r#"
        [sources]
        zero = "value:0"

        [experiments.exp1]
        results = ["neg"]

        [experiments.exp1.structure.neg]
        function = "return_inverse"
        sources = ["zero"]
        results = ["neg"]
        "#,
    )
    .unwrap();

    let plan = planner::plan(&config, &registry, &mut cache).unwrap();
    let executor = Executor::new("lab", &registry);
    executor.run(&plan, &mut cache, &mut status()).unwrap();

    let hash = plan[0].result_hashes[0];
    assert!(cache.get(&hash).is_ok());

    // Delete the payload out-of-band, then sync: the row should
    // disappear. Its filename may have been rewritten by the executor's
    // rename-on-finalize step, and other rows (e.g. the `value:0`
    // source, never renamed) share the cache directory, so look up the
    // current filename for this specific hash via the cache rather than
    // guessing which file on disk belongs to it.
    let filename = cache.filename_of(&hash).unwrap();
    fs::remove_file(dir.path().join(filename)).unwrap();
    cache.sync().unwrap();
    assert!(!cache.has(&hash));

    // A subsequent run recomputes and reinserts it.
    let plan2 = planner::plan(&config, &registry, &mut cache).unwrap();
    executor.run(&plan2, &mut cache, &mut status()).unwrap();
    assert!(cache.has(&hash));
}

#[test]
fn s6_structure_override_via_parameter() {
    let dir = tempfile::tempdir().unwrap();
    let mut cache = CacheStore::open(dir.path(), &mut status()).unwrap();
    let registry = demo_registry();

    let base: Config = toml::from_str(
        r#"
        [sources]
        five = "value:5"

        [experiments.exp1]
        results = ["out"]

        [experiments.exp1.structure.foo]
        function = "identity"
        sources = ["five"]
        results = ["out"]
        "#,
    )
    .unwrap();

    let overridden: Config = toml::from_str(
        r#"
        [sources]
        five = "value:5"

        [experiments.exp1]
        results = ["out"]

        [experiments.exp1.parameters]
        "foo.FUNCTION" = "return_inverse"

        [experiments.exp1.structure.foo]
        function = "identity"
        sources = ["five"]
        results = ["out"]
        "#,
    )
    .unwrap();

    let plan_base = planner::plan(&base, &registry, &mut cache).unwrap();
    let plan_overridden = planner::plan(&overridden, &registry, &mut cache).unwrap();

    assert_ne!(plan_base[0].result_hashes, plan_overridden[0].result_hashes);
    assert_eq!(plan_overridden[0].function, "return_inverse");
}
