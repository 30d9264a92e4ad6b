//! The caller-facing request dispatcher.
//!
//! - [`Api::write`]: durable. Applies optimistic data, appends to the write
//!   log and returns. The outcome reaches the caller only through the store.
//! - [`Api::read`], [`Api::paginate`] and
//!   [`Api::make_request_with_side_effects`]: one-shot. They wait until the
//!   write log is empty, so a read response can never overwrite optimistic
//!   state of a write that has not been confirmed yet.

use std::sync::Arc;

use courier_interchange::{EnvelopeError, Request, RequestType, Response, StoreData, StoreUpdate};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::applier::ResponseApplier;
use crate::conflict::ConflictTracker;
use crate::error::RequestError;
use crate::middleware::{MiddlewareChain, RequestContext};
use crate::network::NetworkState;
use crate::pagination::PageRequest;
use crate::persisted::PersistedRequests;
use crate::queue::SequentialQueue;
use crate::store::ReactiveStore;

/// The push channel the host is subscribed to.
pub trait EventChannel: Send + Sync + 'static {
    /// Identifier of this client's socket, sent with writes so the server
    /// does not echo their events back to us.
    fn socket_id(&self) -> Option<String>;
}

/// An out-of-band batch of server updates.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEvent {
    #[serde(default)]
    pub updates: Vec<StoreUpdate>,
    #[serde(default, rename = "previousUpdateID")]
    pub previous_update_id: Option<u64>,
    #[serde(default, rename = "lastUpdateID")]
    pub last_update_id: Option<u64>,
}

#[derive(Clone)]
pub struct Api {
    pub(crate) store: Arc<dyn ReactiveStore>,
    pub(crate) queue: SequentialQueue,
    pub(crate) chain: Arc<MiddlewareChain>,
    pub(crate) persisted: Arc<PersistedRequests>,
    pub(crate) network: Arc<NetworkState>,
    pub(crate) conflicts: Arc<ConflictTracker>,
    pub(crate) applier: Arc<ResponseApplier>,
    pub(crate) events: Option<Arc<dyn EventChannel>>,
}

impl Api {
    /// Queue a durable write. Returns its write-log sequence number.
    ///
    /// Optimistic data is in the store when this returns. Only malformed
    /// input is reported here.
    pub fn write(
        &self,
        command: &str,
        params: Map<String, Value>,
        store_data: StoreData,
    ) -> Result<u64, EnvelopeError> {
        self.write_with_optimistic_ids(command, params, store_data, Vec::<String>::new())
    }

    /// Queue a durable write that introduces temporary identifiers.
    ///
    /// Later writes referencing one of `optimistic_ids` are held back until
    /// this one completes.
    pub fn write_with_optimistic_ids<I, S>(
        &self,
        command: &str,
        params: Map<String, Value>,
        store_data: StoreData,
        optimistic_ids: I,
    ) -> Result<u64, EnvelopeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (request, optimistic) = Request::new(command, params, RequestType::Write, store_data)?;
        let mut request = request.with_optimistic_ids(optimistic_ids);
        if let Some(socket_id) = self.events.as_ref().and_then(|e| e.socket_id()) {
            request
                .data
                .insert("pusherSocketID".to_string(), Value::String(socket_id));
        }
        request
            .data
            .insert("shouldRetry".to_string(), Value::Bool(true));
        request
            .data
            .insert("canCancel".to_string(), Value::Bool(true));

        tracing::info!(command, "called API write");
        self.store.update(&optimistic);
        Ok(self.queue.push(request))
    }

    /// A read. Waits for the write log to drain first.
    pub async fn read(
        &self,
        command: &str,
        params: Map<String, Value>,
        store_data: StoreData,
    ) -> Result<Response, RequestError> {
        tracing::info!(command, "called API read");
        let (request, optimistic) = Request::new(command, params, RequestType::Read, store_data)?;
        self.dispatch_one_shot(RequestContext::one_shot(request), optimistic)
            .await
    }

    /// A request whose response the caller needs directly.
    ///
    /// With `RequestType::Write` the request takes the durable path instead
    /// and `None` is returned.
    pub async fn make_request_with_side_effects(
        &self,
        command: &str,
        params: Map<String, Value>,
        store_data: StoreData,
        request_type: RequestType,
    ) -> Result<Option<Response>, RequestError> {
        if request_type == RequestType::Write {
            self.write(command, params, store_data)?;
            return Ok(None);
        }
        tracing::info!(command, "called API makeRequestWithSideEffects");
        let (request, optimistic) = Request::new(command, params, request_type, store_data)?;
        self.dispatch_one_shot(RequestContext::one_shot(request), optimistic)
            .await
            .map(Some)
    }

    /// A read whose items are merged into a keyed, sorted collection.
    pub async fn paginate(
        &self,
        command: &str,
        params: Map<String, Value>,
        page: PageRequest,
        store_data: StoreData,
    ) -> Result<Response, RequestError> {
        tracing::info!(command, resource = %page.resource_key, "called API paginate");
        let (request, optimistic) = Request::new(command, params, RequestType::Read, store_data)?;
        self.dispatch_one_shot(RequestContext::one_shot(request).with_pagination(page), optimistic)
            .await
    }

    /// Mark an identifier created outside the write path as unresolved.
    pub fn reserve_optimistic_id(&self, id: impl Into<String>) {
        self.conflicts.reserve(id);
    }

    /// Resolve a temporary identifier. With an authoritative ID, queued
    /// writes still referencing the temporary one are rewritten first.
    pub fn resolve_optimistic_id(&self, temporary: &str, authoritative: Option<&str>) {
        if let Some(real) = authoritative.filter(|real| *real != temporary) {
            let rewritten = self.persisted.rewrite_id(temporary, real);
            tracing::info!(temporary, authoritative = real, rewritten, "optimistic id resolved");
        }
        self.conflicts.resolve(temporary);
    }

    /// Apply an out-of-band update batch in server order.
    pub async fn receive_push_event(&self, event: PushEvent) {
        self.applier
            .sequencer()
            .apply(&event.updates, event.previous_update_id, event.last_update_id)
            .await;
    }

    async fn wait_ready_to_read(&self, command: &str) {
        let pending = self.persisted.len();
        if pending > 0 {
            tracing::info!("'{command}' is waiting on {pending} write commands");
        }
        self.queue.wait_for_idle().await;
    }

    async fn dispatch_one_shot(
        &self,
        ctx: RequestContext,
        optimistic: Vec<StoreUpdate>,
    ) -> Result<Response, RequestError> {
        self.wait_ready_to_read(&ctx.request.command).await;
        self.store.update(&optimistic);

        if !self.network.is_online() {
            tracing::info!(command = %ctx.request.command, "network is offline, dropping request");
            self.applier.apply_outcome(&ctx.request, false);
            return Err(RequestError::Offline);
        }
        self.chain.process(&ctx).await
    }
}
