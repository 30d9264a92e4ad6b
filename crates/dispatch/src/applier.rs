//! Application of terminal outcomes to the store.

use std::sync::Arc;

use courier_interchange::{Request, Response};

use crate::sequencer::UpdateSequencer;
use crate::store::ReactiveStore;

/// Applies server updates and the request's outcome instructions.
///
/// For every request exactly one of `successData`, `failureData` or
/// `finallyData` is applied, once.
pub struct ResponseApplier {
    store: Arc<dyn ReactiveStore>,
    sequencer: Arc<UpdateSequencer>,
}

impl ResponseApplier {
    pub fn new(store: Arc<dyn ReactiveStore>, sequencer: Arc<UpdateSequencer>) -> Self {
        ResponseApplier { store, sequencer }
    }

    pub fn sequencer(&self) -> &Arc<UpdateSequencer> {
        &self.sequencer
    }

    /// Server `onyxData` first, then the request's own instructions.
    pub async fn apply_response(&self, request: &Request, response: &Response) {
        self.sequencer
            .apply(
                &response.onyx_data,
                response.previous_update_id,
                response.last_update_id,
            )
            .await;
        self.apply_outcome(request, response.is_success());
    }

    /// Apply `finallyData`, or `successData`/`failureData` by outcome.
    pub fn apply_outcome(&self, request: &Request, success: bool) {
        let updates = request.outcome_updates(success);
        if !updates.is_empty() {
            tracing::debug!(
                command = %request.command,
                success,
                count = updates.len(),
                "applying outcome data"
            );
            self.store.update(updates);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use crate::store::MemoryStore;
    use crate::testing::ScriptedTransport;
    use crate::transport::TransportSender;
    use courier_interchange::{RequestType, StoreData, StoreUpdate};
    use serde_json::{json, Map};

    fn applier() -> (Arc<MemoryStore>, ResponseApplier) {
        let store = Arc::new(MemoryStore::new());
        let sender = TransportSender::new(
            Arc::new(ScriptedTransport::new()),
            Arc::new(Session::new()),
        );
        let sequencer = Arc::new(UpdateSequencer::new(store.clone(), sender));
        (store.clone(), ResponseApplier::new(store, sequencer))
    }

    #[tokio::test]
    async fn server_data_precedes_success_data() {
        let (store, applier) = applier();
        let (request, _) = Request::new(
            "SetBalance",
            Map::new(),
            RequestType::Write,
            StoreData::new().on_success(StoreUpdate::set("balance", json!(90)).unwrap()),
        )
        .unwrap();
        let mut response = Response::success();
        response.onyx_data = vec![StoreUpdate::set("balance", json!(80)).unwrap()];

        applier.apply_response(&request, &response).await;
        assert_eq!(store.get("balance"), Some(json!(90)));
    }

    #[tokio::test]
    async fn business_failure_applies_failure_data() {
        let (store, applier) = applier();
        let (request, _) = Request::new(
            "SetBalance",
            Map::new(),
            RequestType::Write,
            StoreData::new()
                .on_success(StoreUpdate::set("balance", json!(90)).unwrap())
                .on_failure(StoreUpdate::set("balance", json!(100)).unwrap()),
        )
        .unwrap();

        applier.apply_response(&request, &Response::with_code(402)).await;
        assert_eq!(store.get("balance"), Some(json!(100)));
    }

    #[tokio::test]
    async fn finally_data_applies_on_both_outcomes() {
        let (store, applier) = applier();
        let (request, _) = Request::new(
            "OpenReport",
            Map::new(),
            RequestType::Read,
            StoreData::new().finally(StoreUpdate::merge("report_1", json!({"isLoading": false})).unwrap()),
        )
        .unwrap();

        applier.apply_outcome(&request, false);
        assert_eq!(store.get("report_1"), Some(json!({"isLoading": false})));
        assert_eq!(store.applied().len(), 1);
    }
}
