// Copyright 2024 the labforge Project
// Licensed under the MIT License

//! The execution engine: consumes a [`Plan`], reuses cached outputs, and
//! invokes process functions for the rest, plus result extraction.

use crate::cache::CacheStore;
use crate::digest::Hash;
use crate::error::{CacheError, ExecutorError};
use crate::plan::Plan;
use crate::registry::ProcessRegistry;
use crate::value::Value;
use tectonic_errors::prelude::*;
use tectonic_status_base::{tt_note, StatusBackend};

/// One surfaced result, as produced by [`extract_results`].
#[derive(Debug, Clone)]
pub struct ResultRecord {
    pub experiment: String,
    pub trial: String,
    pub process: String,
    pub result_name: String,
    pub hash: Hash,
}

impl ResultRecord {
    /// Lazily materialize this result's value by reading the cache.
    pub fn value(&self, cache: &CacheStore) -> Result<Value> {
        cache.get(&self.hash)
    }
}

/// Runs a [`Plan`] against a [`CacheStore`].
pub struct Executor<'a> {
    lab: String,
    registry: &'a ProcessRegistry,
}

impl<'a> Executor<'a> {
    pub fn new(lab: impl Into<String>, registry: &'a ProcessRegistry) -> Self {
        Executor {
            lab: lab.into(),
            registry,
        }
    }

    /// Execute every unresolved row of `plan`, in `(experiment, trial,
    /// order)` sequence, then rename any row whose canonical filename
    /// differs from the one on disk.
    pub fn run(&self, plan: &Plan, cache: &mut CacheStore, status: &mut dyn StatusBackend) -> Result<()> {
        cache.sync()?;

        let mut rows: Vec<&crate::plan::ProcessInstance> = plan.iter().collect();
        rows.sort_by(|a, b| {
            (a.experiment.as_str(), a.trial.as_str(), a.order).cmp(&(
                b.experiment.as_str(),
                b.trial.as_str(),
                b.order,
            ))
        });

        for row in &rows {
            if row.has_run(cache) {
                tt_note!(status, "skipping `{}` ({}.{}): already cached", row.name, row.experiment, row.trial);
                continue;
            }

            tt_note!(status, "running `{}` ({}.{})", row.name, row.experiment, row.trial);

            let mut inputs = Vec::with_capacity(row.source_hashes.len());
            for hash in &row.source_hashes {
                let value = cache.get(hash).map_err(|e| match e.downcast_ref::<CacheError>() {
                    Some(CacheError::NotFound(_)) => ExecutorError::MissingInput(*hash).into(),
                    _ => e,
                })?;
                inputs.push(value);
            }

            let entry = self.registry.get(&row.function)?;
            let output = (entry.func)(&inputs, &row.params)?;
            let values = output.into_values(&row.name, row.result_names.len())?;

            let label = row.source_label(&self.lab);
            for (hash, value) in row.result_hashes.iter().zip(values.iter()) {
                cache.put(*hash, value, Some(&label))?;
            }
        }

        for row in &rows {
            for hash in &row.result_hashes {
                cache.rename(hash)?;
            }
        }

        Ok(())
    }
}

/// Walk `plan` and collect every row flagged as an experiment result.
pub fn extract_results(plan: &Plan) -> Vec<ResultRecord> {
    let mut results = Vec::new();

    for row in plan {
        for ((name, hash), flagged) in row
            .result_names
            .iter()
            .zip(row.result_hashes.iter())
            .zip(row.results_flags.iter())
        {
            if *flagged {
                results.push(ResultRecord {
                    experiment: row.experiment.clone(),
                    trial: row.trial.clone(),
                    process: row.name.clone(),
                    result_name: name.clone(),
                    hash: *hash,
                });
            }
        }
    }

    results
}
