// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 flowline contributors

//! Middleware chain composition.
//!
//! A middleware is a step-wrapping decorator: `Fn(StepFn) -> StepFn`.
//! Registration order defines *application* order: middleware declared
//! later wraps earlier (innermost). `fold_chain` applies the chain by
//! folding right-to-left over the registered list, so that for
//! middlewares `M1` then `M2` registered in that order, the effective
//! callable is `M1(M2(step))`.

use crate::step::{Middleware, StepFn};

/// Apply `chain` to `callable`, folding right-to-left so earlier-registered
/// middleware wraps outermost.
pub(crate) fn fold_chain(chain: &[Middleware], callable: StepFn) -> StepFn {
    chain.iter().rev().fold(callable, |acc, mw| mw(acc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::Flow;
    use crate::step::step_fn;
    use std::sync::Arc;

    fn tag_middleware(tag: &'static str) -> Middleware {
        Arc::new(move |inner: StepFn| -> StepFn {
            Arc::new(move |flow: Flow| {
                let inner = inner.clone();
                Box::pin(async move {
                    let out = inner(flow).await;
                    out.activate([tag])
                })
            })
        })
    }

    #[tokio::test]
    async fn middleware_order_is_m1_wraps_m2_wraps_step() {
        // M1 then M2 registered in that order => M1(M2(step)).
        // Our tag middleware appends its tag *after* calling inner, so the
        // outermost middleware's tag is appended last: order is [inner's
        // appends..., m2's tag, m1's tag].
        let base = step_fn(|flow: Flow| async move { flow });
        let chain = vec![tag_middleware("m1"), tag_middleware("m2")];
        let wrapped = fold_chain(&chain, base);
        let out = wrapped(Flow::new(0)).await;
        assert_eq!(out.activated_steps(), &["m2", "m1"]);
    }

    #[tokio::test]
    async fn empty_chain_is_identity() {
        let base = step_fn(|flow: Flow| async move { flow.with_context("base", true) });
        let wrapped = fold_chain(&[], base);
        let out = wrapped(Flow::new(0)).await;
        assert_eq!(out.get_context("base"), Some(&serde_json::json!(true)));
    }
}
