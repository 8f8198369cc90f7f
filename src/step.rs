// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 flowline contributors

//! Step identity and the callable type a step (or middleware) wraps.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::errors::FlowError;
use crate::flow::Flow;

/// Names that cannot be used for a step or parallel group.
///
/// `none`/`nothing` mean "no dependencies" when they appear in a
/// `depends_on` list; `optional` marks a step as optional. Allowing any of
/// them as a declared name would make the DSL ambiguous.
pub const RESERVED_NAMES: [&str; 3] = ["none", "nothing", "optional"];

/// A validated step or parallel-group identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepName(String);

impl StepName {
    /// Validate `name` against the reserved-name set and wrap it.
    pub fn new(name: impl Into<String>) -> Result<Self, FlowError> {
        let name = name.into();
        if RESERVED_NAMES.contains(&name.as_str()) {
            return Err(FlowError::ReservedName { name });
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<StepName> for String {
    fn from(n: StepName) -> Self {
        n.0
    }
}

impl AsRef<str> for StepName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A boxed, pinned future returning a [`Flow`] — the shape every step
/// callable and every middleware-wrapped callable has after construction.
pub type BoxFlowFuture = Pin<Box<dyn Future<Output = Flow> + Send>>;

/// A step's callable: a function from [`Flow`] to a future of [`Flow`],
/// after middleware wrapping. Async because steps model I/O-bound work.
pub type StepFn = Arc<dyn Fn(Flow) -> BoxFlowFuture + Send + Sync>;

/// A step-wrapping decorator: `Fn(StepFn) -> StepFn`. Folded at build time
/// over the registered middleware chain, never recomputed per call.
pub type Middleware = Arc<dyn Fn(StepFn) -> StepFn + Send + Sync>;

/// Wrap a plain async function as a [`StepFn`].
///
/// ```
/// use flowline::{step_fn, Flow};
///
/// let step = step_fn(|flow: Flow| async move { flow.with_context("seen", true) });
/// ```
pub fn step_fn<F, Fut>(f: F) -> StepFn
where
    F: Fn(Flow) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Flow> + Send + 'static,
{
    Arc::new(move |flow| Box::pin(f(flow)))
}

/// The static dependency declaration for a step, as it appears in the
/// builder DSL: `depends_on = [] | :none | [names...] | :optional`.
#[derive(Debug, Clone)]
pub enum DependsOn {
    /// No static dependencies (`none`/`nothing` in the distilled spec).
    None,
    /// Depends on the named steps and/or parallel groups.
    Named(Vec<String>),
    /// The step is optional: excluded from the initial plan, dormant until
    /// activated at runtime. An optional step's static dependency set is
    /// always empty.
    Optional,
}

impl DependsOn {
    pub fn names(&self) -> &[String] {
        match self {
            DependsOn::None | DependsOn::Optional => &[],
            DependsOn::Named(names) => names,
        }
    }

    pub fn is_optional(&self) -> bool {
        matches!(self, DependsOn::Optional)
    }
}

impl From<Vec<&str>> for DependsOn {
    fn from(names: Vec<&str>) -> Self {
        if names.is_empty() {
            DependsOn::None
        } else {
            DependsOn::Named(names.into_iter().map(String::from).collect())
        }
    }
}
