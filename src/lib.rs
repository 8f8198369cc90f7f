// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 flowline contributors

//! # flowline - Composable Dataflow Pipeline Engine
//!
//! `flowline` runs a declarative collection of named *steps* with explicit
//! dependencies: it computes a correct execution schedule, runs
//! mutually-independent steps concurrently, threads an immutable [`Flow`]
//! value through them, and merges their context/error contributions.
//! Optional steps allow runtime-activated branches — router patterns,
//! soft-failure cleanup paths — without being part of the initial plan.
//!
//! ## Quick start
//!
//! ```
//! use flowline::{ConcurrencyPolicy, DependsOn, Flow, Pipeline, step_fn};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> flowline::FlowResult<()> {
//! let pipeline = Pipeline::builder(ConcurrencyPolicy::Auto)
//!     .step(
//!         "validate",
//!         step_fn(|flow: Flow| async move { flow.with_context("validated", true) }),
//!         DependsOn::None,
//!     )?
//!     .build()?;
//!
//! let result = pipeline.call(Flow::new(0)).await?;
//! assert_eq!(result.get_context("validated"), Some(&serde_json::json!(true)));
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`flow`] — the immutable [`Flow`] value and its algebra.
//! - [`step`] — step identity, the callable type, and middleware type.
//! - [`graph`] — the dependency graph: steps, parallel groups, validation.
//! - [`parallel`] — the parallel executor (threads / cooperative / auto).
//! - [`pipeline`] — the builder DSL and the scheduler that drives a graph.
//! - [`errors`] — engine-level errors (build-time and activation-time).

pub mod errors;
pub mod flow;
pub mod graph;
pub mod middleware;
pub mod parallel;
pub mod pipeline;
pub mod step;

pub use errors::{FlowError, FlowResult};
pub use flow::Flow;
pub use graph::{DependencyGraph, ParallelGroupInfo};
pub use parallel::ConcurrencyPolicy;
pub use pipeline::{ParallelGroupBuilder, Pipeline, PipelineBuilder};
pub use step::{step_fn, DependsOn, Middleware, StepFn, StepName, RESERVED_NAMES};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
