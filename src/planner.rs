// Copyright 2024 the labforge Project
// Licensed under the MIT License

//! The planner: a pure function from a [`Config`] to a [`Plan`].

use crate::cache::CacheStore;
use crate::config::{Config, ExperimentConfig, ParamKey, ProcessConfig, SourceRef};
use crate::digest::{DigestComputer, Digestible, Hash};
use crate::error::PlannerError;
use crate::plan::{Plan, ProcessInstance};
use crate::registry::ProcessRegistry;
use crate::value::{canonical_params_bytes, Params};
use petgraph::graph::DiGraph;
use sha2::Digest as _;
use std::collections::{BTreeMap, BTreeSet};
use tectonic_errors::prelude::*;

/// Resolve every entry of `config.sources` to a hash.
fn resolve_sources(config: &Config, cache: &mut CacheStore) -> Result<BTreeMap<String, Hash>> {
    let mut resolved = BTreeMap::new();

    for (label, reference) in &config.sources {
        let source_ref: SourceRef = atry!(
            reference.parse();
            ["failed to parse source `{}`", label]
        );

        let hash = match source_ref {
            SourceRef::Hash(h) => h,
            SourceRef::File(name) => *cache
                .keys_by_filename(&name)
                .first()
                .ok_or_else(|| PlannerError::SourceNotFound(reference.clone()))?,
            SourceRef::Value(value) => cache.add_value(&value)?,
        };

        resolved.insert(label.clone(), hash);
    }

    Ok(resolved)
}

/// Apply any `<proc>.SOURCES`/`FUNCTION`/`RESULTS` overrides found among
/// `params` to `structure`, before any other interpretation of parameters.
fn apply_structure_overrides(
    structure: &mut BTreeMap<String, ProcessConfig>,
    params: &BTreeMap<String, crate::value::Value>,
) {
    let known: BTreeSet<String> = structure.keys().cloned().collect();

    for (key, value) in params {
        let ParamKey::Scoped { process, param } = ParamKey::parse(key, &known) else {
            continue;
        };

        let Some(proc_config) = structure.get_mut(&process) else {
            continue;
        };

        match param.as_str() {
            "FUNCTION" => {
                if let Some(name) = value.as_str() {
                    proc_config.function = Some(name.to_owned());
                }
            }
            "SOURCES" => {
                if let Some(list) = value.as_array() {
                    proc_config.sources = list
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_owned))
                        .collect();
                }
            }
            "RESULTS" => {
                if let Some(list) = value.as_array() {
                    proc_config.results = list
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_owned))
                        .collect();
                }
            }
            _ => {}
        }
    }
}

/// Specialize recognized parameters for `process`, given its registry
/// entry's declared parameter names.
fn specialize_params(
    process: &str,
    declared: &[&'static str],
    merged: &BTreeMap<String, crate::value::Value>,
    known_processes: &BTreeSet<String>,
) -> Params {
    let mut params = Params::new();

    for name in declared {
        let scoped = merged.iter().find_map(|(key, value)| {
            match ParamKey::parse(key, known_processes) {
                ParamKey::Scoped { process: p, param } if p == process && param == *name => {
                    Some(value.clone())
                }
                _ => None,
            }
        });

        let value = scoped.or_else(|| {
            merged.iter().find_map(|(key, value)| {
                match ParamKey::parse(key, known_processes) {
                    ParamKey::Global(n) if n == *name => Some(value.clone()),
                    _ => None,
                }
            })
        });

        if let Some(value) = value {
            params.insert((*name).to_owned(), value);
        }
    }

    params
}

/// Build the dependency graph for one sub-plan and return a topological
/// order of process names, producers before consumers. Insertion order
/// (here: the `BTreeMap`'s alphabetical order, which is deterministic
/// across identical configs) is the tie-break.
fn topological_order(
    experiment: &str,
    structure: &BTreeMap<String, ProcessConfig>,
) -> Result<Vec<String>> {
    let mut graph = DiGraph::<String, ()>::new();
    let mut nodes = BTreeMap::new();

    for name in structure.keys() {
        nodes.insert(name.clone(), graph.add_node(name.clone()));
    }

    // A source label may name either a declared source or the result
    // label of another process in this structure; only the latter
    // contributes an edge to the dependency graph.
    let mut label_to_producer = BTreeMap::new();
    for (name, proc_config) in structure {
        for result in &proc_config.results {
            label_to_producer.insert(result.clone(), name.clone());
        }
    }

    // producer -> consumer, so that a toposort visits producers first.
    for (consumer, proc_config) in structure {
        for source in &proc_config.sources {
            if let Some(producer) = label_to_producer.get(source) {
                graph.add_edge(nodes[producer], nodes[consumer], ());
            }
        }
    }

    let order = petgraph::algo::toposort(&graph, None).map_err(|_| PlannerError::Cyclic {
        experiment: experiment.to_owned(),
    })?;

    Ok(order.into_iter().map(|idx| graph[idx].clone()).collect())
}

/// Plan one `(experiment, trial)` sub-plan, appending its rows to `plan`
/// and its result hashes into the shared `label_map`.
#[allow(clippy::too_many_arguments)]
fn plan_trial(
    experiment_name: &str,
    trial_name: &str,
    experiment: &ExperimentConfig,
    trial_params: &BTreeMap<String, crate::value::Value>,
    registry: &ProcessRegistry,
    base_sources: &BTreeMap<String, Hash>,
    plan: &mut Plan,
    next_order: &mut usize,
) -> Result<()> {
    let mut structure = experiment.structure.clone();

    let mut merged_params = experiment.parameters.clone();
    merged_params.extend(trial_params.clone());

    apply_structure_overrides(&mut structure, &merged_params);

    let known_processes: BTreeSet<String> = structure.keys().cloned().collect();
    let order = topological_order(experiment_name, &structure)?;

    let mut label_map: BTreeMap<String, Hash> = base_sources.clone();

    for process_name in &order {
        let proc_config = &structure[process_name];

        let function = proc_config.function.clone().unwrap_or_else(|| process_name.clone());
        let entry = atry!(
            registry.get(&function);
            ["process `{}` (experiment `{}`, trial `{}`) could not be resolved", process_name, experiment_name, trial_name]
        );

        let params = specialize_params(process_name, entry.params, &merged_params, &known_processes);

        let mut source_hashes = Vec::with_capacity(proc_config.sources.len());
        for label in &proc_config.sources {
            let hash = *label_map
                .get(label)
                .ok_or_else(|| PlannerError::SourceNotFound(label.clone()))?;
            source_hashes.push(hash);
        }

        let mut base_digest = DigestComputer::new();
        function.update_digest(&mut base_digest);
        source_hashes.as_slice().update_digest(&mut base_digest);
        base_digest.update(canonical_params_bytes(&params));

        let mut result_hashes = Vec::with_capacity(proc_config.results.len());
        for result_name in &proc_config.results {
            let mut dc = base_digest.clone();
            result_name.update_digest(&mut dc);
            let hash = Hash::finalize(dc);
            label_map.insert(result_name.clone(), hash);
            result_hashes.push(hash);
        }

        let results_flags = proc_config
            .results
            .iter()
            .map(|r| experiment.results.contains(r))
            .collect();

        plan.push(ProcessInstance {
            experiment: experiment_name.to_owned(),
            trial: trial_name.to_owned(),
            name: process_name.clone(),
            function,
            params,
            source_names: proc_config.sources.clone(),
            source_hashes,
            result_names: proc_config.results.clone(),
            result_hashes,
            results_flags,
            order: *next_order,
        });
        *next_order += 1;
    }

    Ok(())
}

/// Plan every experiment and trial in `config` into a flat plan table.
pub fn plan(config: &Config, registry: &ProcessRegistry, cache: &mut CacheStore) -> Result<Plan> {
    let base_sources = resolve_sources(config, cache)?;
    let mut result = Plan::new();

    for (experiment_name, experiment) in &config.experiments {
        let mut next_order = 0usize;

        // The synthetic "control" trial always exists and never carries
        // overrides, even if the config names a trial "control".
        plan_trial(
            experiment_name,
            "control",
            experiment,
            &BTreeMap::new(),
            registry,
            &base_sources,
            &mut result,
            &mut next_order,
        )?;

        for (trial_name, trial_params) in &experiment.trials {
            if trial_name == "control" {
                continue;
            }
            plan_trial(
                experiment_name,
                trial_name,
                experiment,
                trial_params,
                registry,
                &base_sources,
                &mut result,
                &mut next_order,
            )?;
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ProcessOutput, ProcessRegistry};
    use crate::value::Value;
    use tectonic_status_base::plain::PlainStatusBackend;

    fn neg(inputs: &[Value], _params: &Params) -> Result<ProcessOutput> {
        Ok(ProcessOutput::Single(serde_json::json!(-inputs[0].as_i64().unwrap())))
    }

    fn registry() -> ProcessRegistry {
        let mut reg = ProcessRegistry::new();
        reg.register("return_inverse", &[], neg);
        reg
    }

    fn config_s1() -> Config {
        toml::from_str(
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
        .unwrap()
    }

    #[test]
    fn plans_a_single_trial_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = CacheStore::open(dir.path(), &mut PlainStatusBackend::default()).unwrap();
        let reg = registry();
        let config = config_s1();

        let rows = plan(&config, &reg, &mut cache).unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].trial, "control");
        assert_eq!(rows[0].name, "neg");
        assert_eq!(rows[0].results_flags, vec![true]);
    }

    #[test]
    fn determinism_across_repeated_planning() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = CacheStore::open(dir.path(), &mut PlainStatusBackend::default()).unwrap();
        let reg = registry();
        let config = config_s1();

        let a = plan(&config, &reg, &mut cache).unwrap();
        let b = plan(&config, &reg, &mut cache).unwrap();

        assert_eq!(a[0].result_hashes, b[0].result_hashes);
    }

    #[test]
    fn cyclic_structure_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = CacheStore::open(dir.path(), &mut PlainStatusBackend::default()).unwrap();
        let reg = registry();

        let config: Config = toml::from_str(
            r#"
            [experiments.exp1]
            results = []

            [experiments.exp1.structure.a]
            sources = ["b_out"]
            results = ["a_out"]

            [experiments.exp1.structure.b]
            sources = ["a_out"]
            results = ["b_out"]
            "#,
        )
        .unwrap();

        let err = plan(&config, &reg, &mut cache).unwrap_err();
        assert!(err.downcast_ref::<PlannerError>().is_some());
    }
}
