// Copyright 2024 the labforge Project
// Licensed under the MIT License

//! The lowered configuration format.
//!
//! Sugar such as `"foo: a,b -> x,y"` is out of scope; this module only
//! deserializes the already-structured grammar, reading one TOML file and
//! failing with context on a bad parse.

use crate::digest::Hash;
use crate::value::Value;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tectonic_errors::prelude::*;

/// A resolved reference to a cache-addressable object, as written in the
/// `sources` table.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceRef {
    Hash(Hash),
    File(String),
    Value(Value),
}

impl std::str::FromStr for SourceRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if let Some(rest) = s.strip_prefix("hash:") {
            let hash = atry!(
                rest.parse::<Hash>();
                ["`{}` is not a valid `hash:` source reference", s]
            );
            return Ok(SourceRef::Hash(hash));
        }

        if let Some(rest) = s.strip_prefix("file:") {
            return Ok(SourceRef::File(rest.to_owned()));
        }

        if let Some(rest) = s.strip_prefix("value:") {
            let value = serde_json::from_str(rest)
                .unwrap_or_else(|_| Value::String(rest.to_owned()));
            return Ok(SourceRef::Value(value));
        }

        bail!("`{}` is not a recognized source reference (expected hash:/file:/value:)", s)
    }
}

/// A parsed parameter key: either a plain name, applying to every process
/// that recognizes it, or a `<proc>.<name>` scoped override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamKey {
    Global(String),
    Scoped { process: String, param: String },
}

impl ParamKey {
    /// Parse `key`, disambiguating `<proc>.<name>` from a bare name that
    /// happens to contain a dot by checking `known_processes`.
    pub fn parse(key: &str, known_processes: &std::collections::BTreeSet<String>) -> ParamKey {
        if let Some((prefix, rest)) = key.split_once('.') {
            if known_processes.contains(prefix) {
                return ParamKey::Scoped {
                    process: prefix.to_owned(),
                    param: rest.to_owned(),
                };
            }
        }
        ParamKey::Global(key.to_owned())
    }
}

/// One process declaration inside an experiment's `structure` table.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessConfig {
    /// Defaults to the process's own name if absent.
    #[serde(default)]
    pub function: Option<String>,
    pub sources: Vec<String>,
    pub results: Vec<String>,
}

/// One experiment: a structure (DAG of processes), a results list, and an
/// optional set of trials and global parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct ExperimentConfig {
    pub structure: BTreeMap<String, ProcessConfig>,
    pub results: Vec<String>,
    #[serde(default)]
    pub trials: BTreeMap<String, BTreeMap<String, Value>>,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
}

/// The top-level, already-lowered configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sources: BTreeMap<String, String>,
    pub experiments: BTreeMap<String, ExperimentConfig>,
}

impl Config {
    /// Load and parse a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let text = atry!(
            fs::read_to_string(path);
            ["failed to read config file `{}`", path.display()]
        );
        let config = atry!(
            toml::from_str(&text);
            ["failed to parse config file `{}`", path.display()]
        );
        Ok(config)
    }
}
