// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 flowline contributors

//! The [`Flow`] value: the immutable carrier threaded through every step.
//!
//! A `Flow` holds a payload value, an accumulated context map, a categorized
//! error log, a continue/halt flag, and a list of requested optional-step
//! activations. Every mutator returns a fresh `Flow`; none mutate in place.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The immutable data carrier threaded through a pipeline's steps.
///
/// Construct one with [`Flow::new`], then thread it through steps via
/// [`Pipeline::call`](crate::Pipeline::call). Every transformation method
/// below returns a new `Flow`; `self` is left untouched.
///
/// `Flow` derives `Serialize`/`Deserialize` so a logger or instrumenter
/// middleware can snapshot it to JSON without engine-side support — the
/// engine itself never serializes a `Flow`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    value: Value,
    context: IndexMap<String, Value>,
    errors: IndexMap<String, Vec<String>>,
    continuing: bool,
    activated_steps: Vec<String>,
}

impl Flow {
    /// Start a fresh, continuing `Flow` carrying `value`.
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            context: IndexMap::new(),
            errors: IndexMap::new(),
            continuing: true,
            activated_steps: Vec::new(),
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn context(&self) -> &IndexMap<String, Value> {
        &self.context
    }

    pub fn get_context(&self, key: &str) -> Option<&Value> {
        self.context.get(key)
    }

    pub fn errors(&self) -> &IndexMap<String, Vec<String>> {
        &self.errors
    }

    pub fn is_continuing(&self) -> bool {
        self.continuing
    }

    pub fn activated_steps(&self) -> &[String] {
        &self.activated_steps
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Copy with `key = value` added or overwritten in the context.
    pub fn with_context(&self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut next = self.clone();
        next.context.insert(key.into(), value.into());
        next
    }

    /// Copy with `message` appended to the error sequence under `category`.
    pub fn with_error(&self, category: impl Into<String>, message: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.errors
            .entry(category.into())
            .or_default()
            .push(message.into());
        next
    }

    /// Copy with the value replaced. The continue flag is preserved: a
    /// halted `Flow` stays halted — `continue_with` alone never resurrects
    /// it (see the crate's halt-stickiness invariant).
    pub fn continue_with(&self, value: impl Into<Value>) -> Self {
        let mut next = self.clone();
        next.value = value.into();
        next
    }

    /// Copy with `continuing` set to `false`. If `value` is `Some`, the
    /// value is replaced as well; otherwise the current value is kept.
    pub fn halt(&self, value: Option<Value>) -> Self {
        let mut next = self.clone();
        next.continuing = false;
        if let Some(v) = value {
            next.value = v;
        }
        next
    }

    /// Copy with `names` appended to `activated_steps`. Duplicates are
    /// tolerated here; the scheduler deduplicates against already-activated
    /// steps when processing activations.
    pub fn activate<I, S>(&self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut next = self.clone();
        next.activated_steps.extend(names.into_iter().map(Into::into));
        next
    }

    /// Merge a parallel level's outputs per the engine's merge rules:
    /// value = last member's value, context merges last-write-wins in
    /// order, errors concatenate per category in order, activated_steps
    /// union with first-occurrence order preserved, continuing = true
    /// (callers must have already checked no member halted).
    pub(crate) fn merge_level<'a>(outputs: impl IntoIterator<Item = &'a Flow>) -> Flow {
        let mut iter = outputs.into_iter().peekable();
        let mut merged = Flow::new(Value::Null);
        let mut seen_activation = std::collections::HashSet::new();
        let mut last_value = Value::Null;
        let mut any = false;

        while let Some(r) = iter.next() {
            any = true;
            last_value = r.value.clone();
            for (k, v) in &r.context {
                merged.context.insert(k.clone(), v.clone());
            }
            for (category, messages) in &r.errors {
                merged
                    .errors
                    .entry(category.clone())
                    .or_default()
                    .extend(messages.iter().cloned());
            }
            for name in &r.activated_steps {
                if seen_activation.insert(name.clone()) {
                    merged.activated_steps.push(name.clone());
                }
            }
        }

        if any {
            merged.value = last_value;
        }
        merged.continuing = true;
        merged
    }
}
