// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 flowline contributors

//! The scheduler: drives a [`DependencyGraph`] to completion, computing the
//! next ready set each iteration, fanning out parallel levels, merging
//! their results, propagating halts, and processing optional-step
//! activations.

use std::collections::{HashMap, HashSet};

use tracing::{debug, instrument, warn};

use crate::errors::{FlowError, FlowResult};
use crate::flow::Flow;
use crate::graph::DependencyGraph;
use crate::parallel::{self, ConcurrencyPolicy};
use crate::step::{StepFn, StepName};

/// Run `graph` to completion starting from `initial`, using `policy` to
/// fan out any level with more than one ready member.
#[instrument(skip_all)]
pub async fn run(
    graph: &DependencyGraph,
    policy: ConcurrencyPolicy,
    initial: Flow,
) -> FlowResult<Flow> {
    let mut executed: HashSet<StepName> = HashSet::new();
    let mut activated: HashSet<StepName> = HashSet::new();
    let mut current = initial;

    loop {
        let active_deps = compute_active_deps(graph, &activated);
        let ready = compute_ready(graph, &active_deps, &executed);

        if ready.is_empty() {
            debug!("no more ready steps, terminating");
            return Ok(current);
        }

        if ready.len() == 1 {
            let name = &ready[0];
            debug!(step = %name, "running sequentially");
            let callable = graph
                .callable(name)
                .expect("ready step must be declared in the graph");
            let output = callable(current.clone()).await;
            executed.insert(name.clone());

            if !output.is_continuing() {
                warn!(step = %name, "step halted, terminating without processing its activations");
                return Ok(output);
            }

            process_activations(graph, &mut activated, output.activated_steps(), name)?;
            current = output;
        } else {
            debug!(level = ?ready, "fanning out parallel level");
            let callables: Vec<StepFn> = ready
                .iter()
                .map(|n| graph.callable(n).expect("ready step must be declared").clone())
                .collect();
            let outputs = parallel::run_level(policy, &callables, &current).await;

            if let Some(halted) = outputs.iter().find(|o| !o.is_continuing()) {
                warn!("a parallel sibling halted, discarding the rest of the level's merge");
                return Ok(halted.clone());
            }

            for (name, output) in ready.iter().zip(outputs.iter()) {
                process_activations(graph, &mut activated, output.activated_steps(), name)?;
            }

            executed.extend(ready.iter().cloned());
            current = Flow::merge_level(outputs.iter());
        }
    }
}

/// Restrict the dependency map to every non-optional step plus every
/// activated optional step, then exclude any step (of either kind) whose
/// dependency set still contains an optional name that hasn't been
/// activated yet — such a step is deferred, not merely missing one
/// dependency, because that dependency may activate on a later iteration.
fn compute_active_deps(
    graph: &DependencyGraph,
    activated: &HashSet<StepName>,
) -> HashMap<StepName, HashSet<StepName>> {
    let mut active = HashMap::new();

    for name in graph.step_names() {
        if graph.is_optional(name) && !activated.contains(name) {
            continue;
        }

        let deps = graph.static_depends_on(name);
        let blocked_on_optional = deps
            .iter()
            .any(|d| graph.is_optional(d) && !activated.contains(d));
        if blocked_on_optional {
            continue;
        }

        active.insert(name.clone(), deps);
    }

    active
}

/// Steps in `active_deps` whose deps are all in `executed` and which are
/// not themselves already executed. Returned in declared order so parallel
/// merges are deterministic.
fn compute_ready(
    graph: &DependencyGraph,
    active_deps: &HashMap<StepName, HashSet<StepName>>,
    executed: &HashSet<StepName>,
) -> Vec<StepName> {
    graph
        .step_names()
        .filter(|name| {
            !executed.contains(*name)
                && active_deps
                    .get(*name)
                    .is_some_and(|deps| deps.iter().all(|d| executed.contains(d)))
        })
        .cloned()
        .collect()
}

/// Validate and record each requested activation. Idempotent: an already
/// activated or already executed step is silently skipped.
fn process_activations(
    graph: &DependencyGraph,
    activated: &mut HashSet<StepName>,
    requested: &[String],
    requested_by: &StepName,
) -> FlowResult<()> {
    for raw_name in requested {
        let name = match StepName::new(raw_name.clone()) {
            Ok(n) => n,
            Err(_) => {
                return Err(FlowError::UnknownStep {
                    requested: raw_name.clone(),
                    requested_by: requested_by.to_string(),
                })
            }
        };

        if activated.contains(&name) {
            continue;
        }

        if !graph.contains_step(&name) {
            return Err(FlowError::UnknownStep {
                requested: name.to_string(),
                requested_by: requested_by.to_string(),
            });
        }

        if !graph.is_optional(&name) {
            return Err(FlowError::NotOptional {
                requested: name.to_string(),
                requested_by: requested_by.to_string(),
            });
        }

        activated.insert(name);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{step_fn, DependsOn};
    use serde_json::json;

    fn name(s: &str) -> StepName {
        StepName::new(s).unwrap()
    }

    /// Marks its own presence under a context key equal to its own name and
    /// carries its name forward as the value. Each step gets a *distinct*
    /// context key, so parallel siblings' marks survive the level merge's
    /// last-write-wins-per-key rule instead of clobbering each other —
    /// unlike a single shared "trace" key would.
    fn mark(tag: &'static str) -> StepFn {
        step_fn(move |flow: Flow| async move {
            flow.with_context(tag, json!(true)).continue_with(json!(tag))
        })
    }

    #[tokio::test]
    async fn diamond_fan_out_merges_parallel_siblings() {
        let mut g = DependencyGraph::new();
        g.add_step(name("a"), mark("a"), DependsOn::None).unwrap();
        g.add_step(name("b"), mark("b"), vec!["a"].into()).unwrap();
        g.add_step(name("c"), mark("c"), vec!["a"].into()).unwrap();
        g.add_step(name("d"), mark("d"), vec!["b", "c"].into())
            .unwrap();
        g.finalize().unwrap();

        let result = run(&g, ConcurrencyPolicy::Cooperative, Flow::new(0))
            .await
            .unwrap();

        assert_eq!(result.get_context("a"), Some(&json!(true)));
        assert_eq!(result.get_context("b"), Some(&json!(true)));
        assert_eq!(result.get_context("c"), Some(&json!(true)));
        assert_eq!(result.get_context("d"), Some(&json!(true)));
        // d ran last (sequentially, after the b/c level merged), so its
        // own value is what the pipeline returns.
        assert_eq!(result.value(), &json!("d"));
    }

    #[tokio::test]
    async fn router_via_optional_steps() {
        let mut g = DependencyGraph::new();
        g.add_step(
            name("route"),
            step_fn(|flow: Flow| async move {
                let kind = flow.get_context("kind").cloned().unwrap_or(json!("generic"));
                flow.activate([kind.as_str().unwrap().to_string()])
            }),
            DependsOn::None,
        )
        .unwrap();
        for handler in ["pdf", "image", "generic"] {
            g.add_step(
                name(handler),
                step_fn(move |flow: Flow| async move {
                    flow.with_context("processor", json!(handler))
                }),
                DependsOn::Optional,
            )
            .unwrap();
        }
        g.finalize().unwrap();

        let input = Flow::new(0).with_context("kind", json!("image"));
        let result = run(&g, ConcurrencyPolicy::Cooperative, input).await.unwrap();

        assert_eq!(result.get_context("processor"), Some(&json!("image")));
    }

    #[tokio::test]
    async fn activating_non_optional_is_rejected() {
        let mut g = DependencyGraph::new();
        g.add_step(
            name("start"),
            step_fn(|flow: Flow| async move { flow.activate(["finalize"]) }),
            DependsOn::None,
        )
        .unwrap();
        g.add_step(
            name("finalize"),
            step_fn(|flow: Flow| async move { flow }),
            DependsOn::None,
        )
        .unwrap();
        g.finalize().unwrap();

        let err = run(&g, ConcurrencyPolicy::Cooperative, Flow::new(0))
            .await
            .unwrap_err();

        match err {
            FlowError::NotOptional {
                requested,
                requested_by,
            } => {
                assert_eq!(requested, "finalize");
                assert_eq!(requested_by, "start");
            }
            other => panic!("expected NotOptional, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn halt_preempts_siblings_merge() {
        let mut g = DependencyGraph::new();
        g.add_step(name("s1"), mark("s1"), DependsOn::None)
            .unwrap();
        g.add_step(
            name("s2"),
            step_fn(|flow: Flow| async move {
                flow.with_error("db", "down").halt(Some(json!("halted")))
            }),
            DependsOn::None,
        )
        .unwrap();
        g.add_step(name("s3"), mark("s3"), DependsOn::None)
            .unwrap();
        g.add_step(name("d"), mark("d"), vec!["s1", "s2", "s3"].into())
            .unwrap();
        g.finalize().unwrap();

        let result = run(&g, ConcurrencyPolicy::Cooperative, Flow::new(0))
            .await
            .unwrap();

        assert!(!result.is_continuing());
        assert_eq!(result.value(), &json!("halted"));
        assert_eq!(result.errors().get("db").unwrap(), &vec!["down".to_string()]);
        assert!(result.context().is_empty());
    }

    #[tokio::test]
    async fn repeated_activation_requests_are_idempotent() {
        let mut g = DependencyGraph::new();
        g.add_step(
            name("start"),
            step_fn(|flow: Flow| async move { flow.activate(["cleanup", "cleanup"]) }),
            DependsOn::None,
        )
        .unwrap();
        g.add_step(
            name("cleanup"),
            step_fn(|flow: Flow| async move { flow.with_context("cleaned", json!(true)) }),
            DependsOn::Optional,
        )
        .unwrap();
        g.finalize().unwrap();

        let result = run(&g, ConcurrencyPolicy::Cooperative, Flow::new(0))
            .await
            .unwrap();
        assert_eq!(result.get_context("cleaned"), Some(&json!(true)));
    }
}
