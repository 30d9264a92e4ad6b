use std::sync::Arc;

use async_trait::async_trait;

use super::{Middleware, Next, Outcome, RequestContext};
use crate::pagination::{collection_updates, merge_items, stored_items};
use crate::store::ReactiveStore;

/// Merges a fetched page into its stored collection.
///
/// The merged collection and its ID order are appended to the response's
/// `onyxData` as `set` instructions, so they are applied together with the
/// rest of the response by the ResponseApplier.
pub struct PaginationMerge {
    store: Arc<dyn ReactiveStore>,
}

impl PaginationMerge {
    pub fn new(store: Arc<dyn ReactiveStore>) -> Self {
        PaginationMerge { store }
    }
}

#[async_trait]
impl Middleware for PaginationMerge {
    fn name(&self) -> &'static str {
        "Pagination"
    }

    async fn intercept(&self, ctx: &RequestContext, next: Next<'_>) -> Outcome {
        let outcome = next.run(ctx).await;
        let Some(page) = &ctx.pagination else {
            return outcome;
        };

        let mut response = outcome?;
        if response.is_success() {
            let items = page.pager.extract_items(&response);
            let existing = stored_items(self.store.get(&page.resource_key));
            let merged = merge_items(
                page.pager.as_ref(),
                existing,
                items,
                page.is_initial_request,
            );
            tracing::debug!(
                resource = %page.resource_key,
                count = merged.len(),
                initial = page.is_initial_request,
                "merged page"
            );
            response.onyx_data.extend(collection_updates(page, &merged));
        }
        Ok(response)
    }
}
