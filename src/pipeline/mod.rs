// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 flowline contributors

//! The pipeline facade: combines the dependency graph, middleware chain,
//! and concurrency policy built by [`PipelineBuilder`] and dispatches each
//! invocation to the [`scheduler`] (named-mode) or to the linear runner
//! (unnamed-mode fallback).

mod builder;
mod scheduler;

pub use builder::{ParallelGroupBuilder, PipelineBuilder};

use std::sync::Arc;

use tracing::instrument;

use crate::errors::FlowResult;
use crate::flow::Flow;
use crate::graph::DependencyGraph;
use crate::parallel::ConcurrencyPolicy;
use crate::step::{StepFn, StepName};

/// An immutable, cheaply-cloneable pipeline: a dependency graph, a
/// concurrency policy, and (in unnamed-mode) a sequential step list.
///
/// A pipeline is either *named-mode* (graph non-empty) or *linear-mode*
/// (graph empty, sequential list non-empty); the two are not mixed at the
/// scheduler level — named steps defined alongside unnamed ones are
/// permitted at build time, but only named steps enter the scheduler.
#[derive(Clone)]
pub struct Pipeline {
    pub(crate) graph: Arc<DependencyGraph>,
    pub(crate) policy: ConcurrencyPolicy,
    pub(crate) linear: Arc<Vec<StepFn>>,
}

impl Pipeline {
    /// Start building a pipeline under the given concurrency policy.
    pub fn builder(policy: ConcurrencyPolicy) -> PipelineBuilder {
        PipelineBuilder::new(policy)
    }

    /// Run the pipeline. If the dependency graph is non-empty, hands off to
    /// the scheduler; otherwise runs the sequential fallback list in order.
    #[instrument(skip_all)]
    pub async fn call(&self, initial: Flow) -> FlowResult<Flow> {
        if self.graph.is_empty() {
            Ok(self.run_linear(initial).await)
        } else {
            scheduler::run(&self.graph, self.policy, initial).await
        }
    }

    /// Alias for named-mode execution. When the graph is empty this
    /// degrades to the same sequential fallback `call` uses.
    pub async fn call_parallel(&self, initial: Flow) -> FlowResult<Flow> {
        self.call(initial).await
    }

    async fn run_linear(&self, initial: Flow) -> Flow {
        let mut current = initial;
        for step in self.linear.iter() {
            let output = step(current).await;
            if !output.is_continuing() {
                return output;
            }
            current = output;
        }
        current
    }

    /// The underlying dependency graph, for introspection.
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Level partition: `parallel_order()[i]` is the set of steps eligible
    /// to run concurrently at level `i`. Optional steps are excluded until
    /// activated at runtime.
    pub fn parallel_order(&self) -> Vec<Vec<StepName>> {
        self.graph.parallel_order()
    }

    /// Any linear extension of the graph consistent with its levels.
    pub fn topological_order(&self) -> FlowResult<Vec<StepName>> {
        self.graph.topological_order()
    }
}
