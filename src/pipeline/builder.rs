// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 flowline contributors

//! The builder DSL: an explicit builder object whose methods accumulate
//! steps and middleware, replacing the source's dynamic configuration
//! block. `parallel_group` returns a sub-builder scoped to the group.

use std::sync::Arc;

use crate::errors::FlowResult;
use crate::graph::DependencyGraph;
use crate::middleware::fold_chain;
use crate::parallel::ConcurrencyPolicy;
use crate::pipeline::Pipeline;
use crate::step::{DependsOn, Middleware, StepFn, StepName};

/// Builds a [`Pipeline`]: a dependency graph plus a middleware chain plus a
/// concurrency policy, or — if no named step is ever declared — a simple
/// sequential list run by the linear fallback runner.
pub struct PipelineBuilder {
    graph: DependencyGraph,
    middleware: Vec<Middleware>,
    policy: ConcurrencyPolicy,
    linear: Vec<StepFn>,
}

impl PipelineBuilder {
    pub fn new(policy: ConcurrencyPolicy) -> Self {
        Self {
            graph: DependencyGraph::new(),
            middleware: Vec::new(),
            policy,
            linear: Vec::new(),
        }
    }

    /// Register a middleware. Only affects steps added *after* this call
    /// (declaration-order semantics) — middleware declared later wraps
    /// earlier (innermost), per the crate's composition rule.
    pub fn use_middleware(mut self, middleware: Middleware) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Declare a named step. `depends_on` accepts `DependsOn::None`,
    /// `DependsOn::Named(vec![...])`, or `DependsOn::Optional`.
    pub fn step(
        mut self,
        name: impl Into<String>,
        callable: StepFn,
        depends_on: impl Into<DependsOn>,
    ) -> FlowResult<Self> {
        let name = StepName::new(name)?;
        let wrapped = fold_chain(&self.middleware, callable);
        self.graph.add_step(name, wrapped, depends_on.into())?;
        Ok(self)
    }

    /// Declare a named parallel group. The closure receives a
    /// [`ParallelGroupBuilder`] scoped to this group, declares its members
    /// on it, and returns it. The group's own `depends_on` is injected onto
    /// every member (union with whatever each member already declares).
    pub fn parallel_group(
        mut self,
        name: impl Into<String>,
        depends_on: impl Into<DependsOn>,
        build: impl FnOnce(ParallelGroupBuilder) -> FlowResult<ParallelGroupBuilder>,
    ) -> FlowResult<Self> {
        let name = StepName::new(name)?;
        let depends_on = depends_on.into();
        let sub = build(ParallelGroupBuilder {
            members: Vec::new(),
        })?;

        let mut member_names = Vec::with_capacity(sub.members.len());
        for (member_name, callable, member_deps) in sub.members {
            let wrapped = fold_chain(&self.middleware, callable);
            self.graph.add_step(member_name.clone(), wrapped, member_deps)?;
            member_names.push(member_name);
        }

        self.graph
            .add_parallel_group(name, member_names, depends_on.names().to_vec())?;
        Ok(self)
    }

    /// Append an unnamed step to the sequential fallback list, used by the
    /// linear runner when no named step has been declared.
    pub fn then(mut self, callable: StepFn) -> Self {
        let wrapped = fold_chain(&self.middleware, callable);
        self.linear.push(wrapped);
        self
    }

    /// Finalize the graph (validating dependencies and acyclicity) and
    /// produce an immutable, cheaply-cloneable [`Pipeline`].
    pub fn build(mut self) -> FlowResult<Pipeline> {
        if !self.graph.is_empty() {
            self.graph.finalize()?;
        }
        Ok(Pipeline {
            graph: Arc::new(self.graph),
            policy: self.policy,
            linear: Arc::new(self.linear),
        })
    }
}

/// Scoped builder for the members of a single parallel group. Each member
/// may carry its own additional dependencies beyond the group's; the
/// group's `depends_on` is unioned onto every member at `build()` time.
pub struct ParallelGroupBuilder {
    members: Vec<(StepName, StepFn, DependsOn)>,
}

impl ParallelGroupBuilder {
    /// Add a member step with no dependencies of its own beyond the
    /// group's.
    pub fn step(mut self, name: impl Into<String>, callable: StepFn) -> FlowResult<Self> {
        let name = StepName::new(name)?;
        self.members.push((name, callable, DependsOn::None));
        Ok(self)
    }

    /// Add a member step with additional dependencies beyond the group's.
    pub fn step_depending_on(
        mut self,
        name: impl Into<String>,
        callable: StepFn,
        depends_on: impl Into<DependsOn>,
    ) -> FlowResult<Self> {
        let name = StepName::new(name)?;
        self.members.push((name, callable, depends_on.into()));
        Ok(self)
    }
}
