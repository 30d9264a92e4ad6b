use std::sync::Arc;

use async_trait::async_trait;

use super::{Middleware, Next, Outcome, RequestContext};
use crate::applier::ResponseApplier;
use crate::error::RequestError;

/// Terminal stage: applies the outcome to the store.
///
/// A response applies server updates and then exactly one set of outcome
/// instructions. A one-shot request that got no response applies its
/// failure (or finally) instructions, since nothing will retry it. Queued
/// writes that got no response are left to the queue, which decides
/// between retry and giving up.
pub struct ResponseApplication {
    applier: Arc<ResponseApplier>,
}

impl ResponseApplication {
    pub fn new(applier: Arc<ResponseApplier>) -> Self {
        ResponseApplication { applier }
    }
}

#[async_trait]
impl Middleware for ResponseApplication {
    fn name(&self) -> &'static str {
        "ResponseApplier"
    }

    async fn intercept(&self, ctx: &RequestContext, next: Next<'_>) -> Outcome {
        let outcome = next.run(ctx).await;
        match &outcome {
            Ok(response) => self.applier.apply_response(&ctx.request, response).await,
            Err(RequestError::Conflict { .. }) => {}
            Err(_) if !ctx.from_queue() => self.applier.apply_outcome(&ctx.request, false),
            Err(_) => {}
        }
        outcome
    }
}
