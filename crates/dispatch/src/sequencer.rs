//! Ordering of server-produced update batches.
//!
//! Responses and push events can carry `previousUpdateID`/`lastUpdateID`.
//! The last applied ID is kept in the store; a batch whose predecessor is
//! newer than that ID means updates were missed, and they are fetched before
//! the batch is applied.

use std::sync::Arc;

use courier_interchange::StoreUpdate;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::store::ReactiveStore;
use crate::transport::TransportSender;

/// Store key holding the last server update ID applied locally.
pub const LAST_UPDATE_ID_KEY: &str = "lastUpdateIDAppliedToClient";

/// Command that returns the updates in `(updateIDFrom, updateIDTo]`.
pub const GET_MISSING_UPDATES_COMMAND: &str = "GetMissingOnyxMessages";

pub struct UpdateSequencer {
    store: Arc<dyn ReactiveStore>,
    sender: TransportSender,
    lock: Mutex<()>,
}

impl UpdateSequencer {
    pub fn new(store: Arc<dyn ReactiveStore>, sender: TransportSender) -> Self {
        UpdateSequencer {
            store,
            sender,
            lock: Mutex::new(()),
        }
    }

    pub fn last_applied(&self) -> Option<u64> {
        self.store.get(LAST_UPDATE_ID_KEY).and_then(|v| v.as_u64())
    }

    /// Apply a server batch, filling any gap first.
    pub async fn apply(
        &self,
        updates: &[StoreUpdate],
        previous_update_id: Option<u64>,
        last_update_id: Option<u64>,
    ) {
        let _guard = self.lock.lock().await;

        let Some(last) = last_update_id else {
            self.apply_valid(updates);
            return;
        };

        if let Some(applied) = self.last_applied() {
            if last <= applied {
                tracing::debug!(last, applied, "skipping stale update batch");
                return;
            }
            if let Some(previous) = previous_update_id.filter(|p| *p > applied) {
                self.fetch_missing(applied, previous).await;
            }
        }

        self.apply_valid(updates);
        match StoreUpdate::set(LAST_UPDATE_ID_KEY, Value::from(last)) {
            Ok(update) => self.store.update(&[update]),
            Err(e) => tracing::error!(error = %e, "could not record last update ID"),
        }
    }

    async fn fetch_missing(&self, from: u64, to: u64) {
        tracing::info!(from, to, "fetching missing server updates");
        let mut data = Map::new();
        data.insert("updateIDFrom".to_string(), Value::from(from));
        data.insert("updateIDTo".to_string(), Value::from(to));

        match self.sender.send(GET_MISSING_UPDATES_COMMAND, &data).await {
            Ok(response) if response.is_success() => self.apply_valid(&response.onyx_data),
            Ok(response) => {
                tracing::warn!(json_code = response.json_code, "fetching missing updates failed");
            }
            Err(e) => tracing::warn!(error = %e, "fetching missing updates failed"),
        }
    }

    /// Forward `updates` to the store, skipping malformed ones.
    pub fn apply_valid(&self, updates: &[StoreUpdate]) {
        let valid: Vec<StoreUpdate> = updates
            .iter()
            .filter(|update| match update.validate() {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(key = update.key(), error = %e, "skipping invalid server update");
                    false
                }
            })
            .cloned()
            .collect();
        self.store.update(&valid);
    }
}
