// Copyright 2024 the labforge Project
// Licensed under the MIT License

//! A thin CLI wiring `Config::load` → `planner::plan` → `Executor::run` →
//! `extract_results`. Parsing, scaffolding, and result rendering beyond a
//! one-line summary are out of scope; this binary exists to exercise the
//! core end-to-end.

use clap::{Parser, Subcommand};
use labforge::cache::CacheStore;
use labforge::config::Config;
use labforge::executor::{extract_results, Executor};
use labforge::planner;
use labforge::registry::{ProcessOutput, ProcessRegistry};
use labforge::value::{Params, Value};
use std::path::PathBuf;
use tectonic_errors::prelude::*;
use tectonic_status_base::plain::PlainStatusBackend;
use tectonic_status_base::{ChatterLevel, StatusBackend};

fn main() {
    let args = ToplevelArgs::parse();
    let mut status: Box<dyn StatusBackend> = Box::new(PlainStatusBackend::new(ChatterLevel::Normal));

    if let Err(e) = args.exec(status.as_mut()) {
        status.report_error(&e);
        std::process::exit(1);
    }
}

#[derive(Debug, Parser)]
struct ToplevelArgs {
    /// Path to the config file. Falls back to `$LABFORGE_CONFIG`.
    #[arg(long, global = true, env = "LABFORGE_CONFIG")]
    config: Option<PathBuf>,

    /// Path to the cache directory. Falls back to `$LABFORGE_CACHE_DIR`.
    #[arg(long, global = true, env = "LABFORGE_CACHE_DIR", default_value = "cache")]
    cache_dir: PathBuf,

    /// The laboratory name used to build source labels.
    #[arg(long, global = true, default_value = "lab")]
    lab: String,

    #[command(subcommand)]
    action: Action,
}

#[derive(Debug, Subcommand)]
enum Action {
    /// Plan and execute every experiment in the config.
    Run,
    /// Reconcile the cache directory against its metadata sidecar.
    Sync,
    /// Plan, execute, and print every surfaced experiment result.
    Results,
}

impl ToplevelArgs {
    fn exec(self, status: &mut dyn StatusBackend) -> Result<()> {
        let mut cache = CacheStore::open(&self.cache_dir, status)?;

        match self.action {
            Action::Sync => cache.sync(),
            Action::Run => {
                let config = self.load_config()?;
                let registry = demo_registry();
                let plan = planner::plan(&config, &registry, &mut cache)?;
                let executor = Executor::new(&self.lab, &registry);
                executor.run(&plan, &mut cache, status)
            }
            Action::Results => {
                let config = self.load_config()?;
                let registry = demo_registry();
                let plan = planner::plan(&config, &registry, &mut cache)?;
                let executor = Executor::new(&self.lab, &registry);
                executor.run(&plan, &mut cache, status)?;

                for record in extract_results(&plan) {
                    let value = record.value(&cache)?;
                    println!(
                        "{}.{}.{}.{} = {value}",
                        record.experiment, record.trial, record.process, record.result_name
                    );
                }

                Ok(())
            }
        }
    }

    fn load_config(&self) -> Result<Config> {
        let path = self
            .config
            .clone()
            .ok_or_else(|| anyhow!("no config file given (pass --config or set LABFORGE_CONFIG)"))?;
        Config::load(path)
    }
}

/// A small fixed set of demo processes, registered here since
/// process/output registry *population* is a host concern.
fn demo_registry() -> ProcessRegistry {
    let mut registry = ProcessRegistry::new();
    registry.register("return_n", &["n"], return_n);
    registry.register("return_inverse", &[], return_inverse);
    registry.register("pair", &[], pair);
    registry
}

fn return_n(_inputs: &[Value], params: &Params) -> Result<ProcessOutput> {
    let n = params
        .get("n")
        .ok_or_else(|| anyhow!("`return_n` requires an `n` parameter"))?;
    Ok(ProcessOutput::Single(n.clone()))
}

fn return_inverse(inputs: &[Value], _params: &Params) -> Result<ProcessOutput> {
    let n = inputs
        .first()
        .and_then(Value::as_i64)
        .ok_or_else(|| anyhow!("`return_inverse` requires one numeric input"))?;
    Ok(ProcessOutput::Single(Value::from(-n)))
}

fn pair(inputs: &[Value], _params: &Params) -> Result<ProcessOutput> {
    let n = inputs
        .first()
        .and_then(Value::as_i64)
        .ok_or_else(|| anyhow!("`pair` requires one numeric input"))?;
    Ok(ProcessOutput::Multiple(vec![Value::from(-n), Value::from(n)]))
}
