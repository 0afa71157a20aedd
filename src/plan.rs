// Copyright 2024 the labforge Project
// Licensed under the MIT License

//! The plan table: the planner's output and the executor's input.

use crate::cache::CacheStore;
use crate::digest::Hash;
use crate::value::Params;

/// One row of the plan table.
#[derive(Debug, Clone)]
pub struct ProcessInstance {
    pub experiment: String,
    pub trial: String,
    pub name: String,

    /// The registered name of the resolved callable: the *name* is what
    /// gets hashed, not a representation of the callable itself.
    pub function: String,

    pub params: Params,

    pub source_names: Vec<String>,
    pub source_hashes: Vec<Hash>,

    pub result_names: Vec<String>,
    pub result_hashes: Vec<Hash>,
    pub results_flags: Vec<bool>,

    /// Rows with lower `order` never depend on rows with higher `order`
    /// within the same `(experiment, trial)`.
    pub order: usize,
}

impl ProcessInstance {
    /// True iff every declared result is already present in `cache`.
    pub fn has_run(&self, cache: &CacheStore) -> bool {
        self.result_hashes.iter().all(|h| cache.has(h))
    }

    /// The canonical human-readable source label for a `put` performed by
    /// this row: `"<lab>/<experiment>.<trial>.<process>"`. `lab` names the
    /// laboratory a plan belongs to, one level above `experiment`.
    pub fn source_label(&self, lab: &str) -> String {
        format!("{}/{}.{}.{}", lab, self.experiment, self.trial, self.name)
    }
}

/// The flat, ordered plan produced by [`crate::planner::plan`].
pub type Plan = Vec<ProcessInstance>;
