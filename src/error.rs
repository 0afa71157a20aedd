// Copyright 2024 the labforge Project
// Licensed under the MIT License

//! Typed error kinds.
//!
//! These enums exist so that call sites which need to distinguish *why*
//! an operation failed (e.g. corruption recovery, which must tell
//! `CacheError::NotFound` apart from `CacheError::CorruptObject`) can
//! match on a concrete type. Everywhere else, the ordinary
//! `tectonic_errors` idiom (`atry!`, `bail!`, `?`) is used for contextual
//! propagation; these types convert into `tectonic_errors::Error` via
//! `anyhow`'s blanket `From<E: StdError>`.

use crate::digest::Hash;
use thiserror::Error;

/// Errors raised by [`crate::cache::CacheStore`].
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("object `{0}` not found in cache")]
    NotFound(Hash),

    #[error("object `{0}` is corrupt: {1}")]
    CorruptObject(Hash, String),
}

/// Errors raised while planning.
#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("source `{0}` could not be resolved to a hash")]
    SourceNotFound(String),

    #[error("no process registered under the name `{0}`")]
    UnknownProcess(String),

    #[error("process structure for experiment `{experiment}` contains a cycle")]
    Cyclic { experiment: String },
}

/// Errors raised while executing a plan.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("input hash `{0}` claimed by the plan is absent from the cache")]
    MissingInput(Hash),

    #[error(
        "process `{process}` declared {expected} result(s) but returned {actual}"
    )]
    ArityError {
        process: String,
        expected: usize,
        actual: usize,
    },

    #[error("no output registered under the name `{0}`")]
    UnknownOutput(String),
}
