// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 flowline contributors

//! The parallel executor: abstracts concurrent invocation of a set of
//! step callables over one [`Flow`], returning a vector of `Flow`s in
//! input order.
//!
//! Two concrete strategies are provided, matching the distilled spec's
//! `threads | cooperative | auto` concurrency policy:
//!
//! - [`ConcurrencyPolicy::Threads`] spawns one OS thread per callable (each
//!   driving its async callable to completion on a small current-thread
//!   Tokio runtime), joined at the level boundary.
//! - [`ConcurrencyPolicy::Cooperative`] spawns one [`tokio::task::JoinSet`]
//!   task per callable on the ambient Tokio runtime — the async-fiber
//!   equivalent, grounded in the pack's own `JoinSet`/`FuturesUnordered`
//!   fan-out idiom (e.g. `stencila`'s `attractor::handlers::parallel`).
//! - [`ConcurrencyPolicy::Auto`] picks `Cooperative` when invoked from
//!   inside a Tokio runtime context, else falls back to `Threads`.

use crate::flow::Flow;
use crate::step::StepFn;

/// How a parallel level's member steps are invoked concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConcurrencyPolicy {
    /// Cooperative tasks if a Tokio runtime is available, else threads.
    #[default]
    Auto,
    /// One OS thread per member, joined at the level boundary.
    Threads,
    /// One lightweight Tokio task per member, awaited at the level boundary.
    Cooperative,
}

/// Invoke every callable in `members` against a clone of `input`,
/// concurrently, returning their outputs in the same order as `members`.
///
/// A callable that panics propagates that panic out of this function —
/// the scheduler treats it as a programmer error distinct from `halt`.
pub async fn run_level(
    policy: ConcurrencyPolicy,
    members: &[StepFn],
    input: &Flow,
) -> Vec<Flow> {
    let effective = match policy {
        ConcurrencyPolicy::Auto => {
            if tokio::runtime::Handle::try_current().is_ok() {
                ConcurrencyPolicy::Cooperative
            } else {
                ConcurrencyPolicy::Threads
            }
        }
        other => other,
    };

    match effective {
        ConcurrencyPolicy::Cooperative | ConcurrencyPolicy::Auto => {
            run_cooperative(members, input).await
        }
        ConcurrencyPolicy::Threads => run_threads(members, input),
    }
}

async fn run_cooperative(members: &[StepFn], input: &Flow) -> Vec<Flow> {
    let mut set = tokio::task::JoinSet::new();
    for (idx, step) in members.iter().enumerate() {
        let step = step.clone();
        let flow = input.clone();
        set.spawn(async move { (idx, step(flow).await) });
    }

    let mut slots: Vec<Option<Flow>> = (0..members.len()).map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((idx, flow)) => slots[idx] = Some(flow),
            Err(join_err) => {
                if join_err.is_panic() {
                    std::panic::resume_unwind(join_err.into_panic());
                }
                panic!("parallel level task was cancelled unexpectedly: {join_err}");
            }
        }
    }

    slots
        .into_iter()
        .map(|slot| slot.expect("every spawned task reports exactly once"))
        .collect()
}

fn run_threads(members: &[StepFn], input: &Flow) -> Vec<Flow> {
    std::thread::scope(|scope| {
        let handles: Vec<_> = members
            .iter()
            .map(|step| {
                let step = step.clone();
                let flow = input.clone();
                scope.spawn(move || {
                    let rt = tokio::runtime::Builder::new_current_thread()
                        .enable_time()
                        .build()
                        .expect("building a current-thread runtime for a parallel step");
                    rt.block_on(step(flow))
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::step_fn;
    use serde_json::json;

    fn echo(tag: &'static str) -> StepFn {
        step_fn(move |flow: Flow| async move { flow.with_context(tag, json!(true)) })
    }

    #[tokio::test]
    async fn cooperative_preserves_input_order() {
        let members = vec![echo("a"), echo("b"), echo("c")];
        let out = run_level(ConcurrencyPolicy::Cooperative, &members, &Flow::new(0)).await;
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].get_context("a"), Some(&json!(true)));
        assert_eq!(out[1].get_context("b"), Some(&json!(true)));
        assert_eq!(out[2].get_context("c"), Some(&json!(true)));
    }

    #[test]
    fn threads_preserves_input_order_outside_a_runtime() {
        let members = vec![echo("a"), echo("b")];
        let out = run_threads(&members, &Flow::new(0));
        assert_eq!(out[0].get_context("a"), Some(&json!(true)));
        assert_eq!(out[1].get_context("b"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn auto_picks_cooperative_inside_a_runtime() {
        let members = vec![echo("a")];
        let out = run_level(ConcurrencyPolicy::Auto, &members, &Flow::new(0)).await;
        assert_eq!(out[0].get_context("a"), Some(&json!(true)));
    }

    #[tokio::test]
    #[should_panic(expected = "boom")]
    async fn panics_propagate_out_of_cooperative_level() {
        let panics: StepFn = step_fn(|_flow: Flow| async move { panic!("boom") });
        let members = vec![panics];
        run_level(ConcurrencyPolicy::Cooperative, &members, &Flow::new(0)).await;
    }
}
