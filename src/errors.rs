// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 flowline contributors

//! Engine-level error types.
//!
//! These are the errors raised by pipeline construction and by the
//! scheduler's activation handling — bugs or misuse, not domain errors.
//! Domain errors belong in [`crate::Flow`]'s `errors` map instead; see the
//! crate-level docs for the distinction.

use miette::Diagnostic;
use thiserror::Error;

/// Result type for flowline's own fallible operations.
pub type FlowResult<T> = Result<T, FlowError>;

/// Engine-level error type.
///
/// Unlike domain errors (accumulated in [`crate::Flow::errors`]), every
/// variant here aborts the operation that raised it: a cycle aborts
/// `PipelineBuilder::build`, an unknown activation aborts `Pipeline::call`.
#[derive(Error, Debug, Diagnostic)]
pub enum FlowError {
    #[error("circular dependency detected among steps: {steps:?}")]
    #[diagnostic(
        code(flowline::cyclic_dependency),
        help("review the depends_on lists of the listed steps to remove the cycle")
    )]
    CyclicDependency { steps: Vec<String> },

    #[error("step '{name}' depends on unknown step or group '{dependency}'")]
    #[diagnostic(
        code(flowline::unknown_dependency),
        help("declare '{dependency}' as a step or parallel group before referencing it")
    )]
    UnknownDependency { name: String, dependency: String },

    #[error("'{requested}' was activated but is not a declared step")]
    #[diagnostic(
        code(flowline::unknown_step),
        help("activation requested by '{requested_by}'; check the step name for typos")
    )]
    UnknownStep {
        requested: String,
        requested_by: String,
    },

    #[error("'{requested}' was activated but is not declared optional")]
    #[diagnostic(
        code(flowline::not_optional),
        help(
            "only steps declared with DependsOn::Optional can be activated at runtime; \
             requested by '{requested_by}'"
        )
    )]
    NotOptional {
        requested: String,
        requested_by: String,
    },

    #[error("'{name}' is a reserved name and cannot be used for a step or parallel group")]
    #[diagnostic(
        code(flowline::reserved_name),
        help("'none', 'nothing', and 'optional' are reserved; pick another name")
    )]
    ReservedName { name: String },

    #[error("step '{name}' was already declared")]
    #[diagnostic(code(flowline::duplicate_step))]
    DuplicateStep { name: String },

    #[error("invalid concurrency policy: {reason}")]
    #[diagnostic(code(flowline::invalid_concurrency))]
    InvalidConcurrency { reason: String },

    #[error("step '{name}' is not callable: {reason}")]
    #[diagnostic(code(flowline::step_not_callable))]
    StepNotCallable { name: String, reason: String },
}
