// Copyright 2024 the labforge Project
// Licensed under the MIT License

//! `ProcessRegistry` and `OutputRegistry`: explicit name→callable maps.
//!
//! The host builds these directly and hands them to the planner/executor;
//! discovering and loading process implementations from disk is a
//! plugin-loading concern for the host, not the core.

use crate::error::{ExecutorError, PlannerError};
use crate::value::{Params, Value};
use std::collections::HashMap;
use tectonic_errors::prelude::*;

/// The shape of a process's return value once it comes back from its
/// function pointer.
///
/// A process with exactly one declared result may return its value
/// directly ([`ProcessOutput::Single`]); a process with more than one
/// declared result must return them in order
/// ([`ProcessOutput::Multiple`]).
#[derive(Debug, Clone)]
pub enum ProcessOutput {
    Single(Value),
    Multiple(Vec<Value>),
}

impl ProcessOutput {
    /// Expand this output into exactly `n` values, or fail with
    /// [`ExecutorError::ArityError`].
    pub fn into_values(self, process: &str, n: usize) -> Result<Vec<Value>> {
        let values = match self {
            ProcessOutput::Single(v) => vec![v],
            ProcessOutput::Multiple(vs) => vs,
        };

        if values.len() != n {
            return Err(ExecutorError::ArityError {
                process: process.to_owned(),
                expected: n,
                actual: values.len(),
            }
            .into());
        }

        Ok(values)
    }
}

/// A process function: takes its resolved, ordered input values and its
/// specialized parameter dict, and produces an output.
pub type ProcessFn = fn(&[Value], &Params) -> Result<ProcessOutput>;

/// A registered process: its declared parameter names (advertised by the
/// host, since Rust has no runtime signature introspection), plus its
/// function pointer.
#[derive(Clone, Copy)]
pub struct ProcessEntry {
    pub params: &'static [&'static str],
    pub func: ProcessFn,
}

/// The process-wide table of named, callable process implementations.
#[derive(Default)]
pub struct ProcessRegistry {
    entries: HashMap<String, ProcessEntry>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a process under `name`, advertising the parameter names
    /// it recognizes.
    pub fn register(&mut self, name: impl Into<String>, params: &'static [&'static str], func: ProcessFn) {
        self.entries.insert(name.into(), ProcessEntry { params, func });
    }

    /// Look up a process by name, failing with [`PlannerError::UnknownProcess`].
    pub fn get(&self, name: &str) -> Result<&ProcessEntry> {
        self.entries
            .get(name)
            .ok_or_else(|| PlannerError::UnknownProcess(name.to_owned()).into())
    }
}

/// An output function: consumes a lazily-materialized stream of result
/// tuples. The registry and lookup are in scope; any non-trivial
/// rendering (tables, plots) is a host concern.
pub type OutputFn = fn(&crate::executor::ResultRecord);

/// The process-wide table of named output callables.
#[derive(Default)]
pub struct OutputRegistry {
    entries: HashMap<String, OutputFn>,
}

impl OutputRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, func: OutputFn) {
        self.entries.insert(name.into(), func);
    }

    pub fn get(&self, name: &str) -> Result<OutputFn> {
        self.entries
            .get(name)
            .copied()
            .ok_or_else(|| ExecutorError::UnknownOutput(name.to_owned()).into())
    }
}
