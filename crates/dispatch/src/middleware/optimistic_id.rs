use std::sync::Arc;

use async_trait::async_trait;

use super::{Middleware, Next, Outcome, RequestContext};
use crate::conflict::ConflictTracker;
use crate::error::RequestError;
use crate::persisted::PersistedRequests;

/// Keeps queued writes consistent with server-assigned identifiers.
///
/// Before sending, a queued write that references a temporary ID introduced
/// by a request that has not completed is deferred with
/// [`RequestError::Conflict`]. After a response, every temporary ID the
/// server replaced is rewritten in place in the entries still waiting in
/// the write log, and the request's own temporary IDs are marked resolved.
pub struct OptimisticIdReconciliation {
    conflicts: Arc<ConflictTracker>,
    persisted: Arc<PersistedRequests>,
}

impl OptimisticIdReconciliation {
    pub fn new(conflicts: Arc<ConflictTracker>, persisted: Arc<PersistedRequests>) -> Self {
        OptimisticIdReconciliation {
            conflicts,
            persisted,
        }
    }
}

#[async_trait]
impl Middleware for OptimisticIdReconciliation {
    fn name(&self) -> &'static str {
        "OptimisticIDReconciliation"
    }

    async fn intercept(&self, ctx: &RequestContext, next: Next<'_>) -> Outcome {
        if ctx.from_queue() {
            if let Some(id) = self.conflicts.first_unresolved(&ctx.request) {
                tracing::debug!(command = %ctx.request.command, id = %id, "deferring write on unresolved id");
                return Err(RequestError::Conflict { id });
            }
        }

        let outcome = next.run(ctx).await;
        if let Ok(response) = &outcome {
            for (temporary, authoritative) in response.resolved_ids(&ctx.request) {
                let rewritten = self.persisted.rewrite_id(&temporary, &authoritative);
                tracing::info!(
                    temporary = %temporary,
                    authoritative = %authoritative,
                    rewritten,
                    "server replaced optimistic id"
                );
                self.conflicts.resolve(&temporary);
            }
            self.conflicts
                .resolve_all(ctx.request.optimistic_ids.iter().map(String::as_str));
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::MiddlewareChain;
    use crate::session::Session;
    use crate::testing::ScriptedTransport;
    use crate::transport::TransportSender;
    use courier_interchange::{Request, RequestType, Response, StoreData};
    use courier_storage::MemoryWriteLog;
    use serde_json::{json, Map};

    fn write(command: &str, report_id: &str) -> Request {
        let mut params = Map::new();
        params.insert("reportID".to_string(), json!(report_id));
        Request::new(command, params, RequestType::Write, StoreData::new())
            .unwrap()
            .0
    }

    struct Fixture {
        transport: Arc<ScriptedTransport>,
        conflicts: Arc<ConflictTracker>,
        persisted: Arc<PersistedRequests>,
        chain: MiddlewareChain,
    }

    async fn fixture() -> Fixture {
        let transport = Arc::new(ScriptedTransport::new());
        let conflicts = Arc::new(ConflictTracker::new());
        let persisted = PersistedRequests::load(Arc::new(MemoryWriteLog::new())).await;
        let chain = MiddlewareChain::new(TransportSender::new(
            transport.clone(),
            Arc::new(Session::new()),
        ))
        .wrap(OptimisticIdReconciliation::new(
            conflicts.clone(),
            persisted.clone(),
        ));
        Fixture {
            transport,
            conflicts,
            persisted,
            chain,
        }
    }

    #[tokio::test]
    async fn preexisting_report_rewrites_later_entries() {
        let f = fixture().await;
        let create = write("OpenReport", "tmp_1").with_optimistic_ids(["tmp_1"]);
        f.conflicts.reserve("tmp_1");
        let first = f.persisted.push(create.clone());
        let second = f.persisted.push(write("AddComment", "tmp_1"));

        let mut response = Response::success();
        response.preexisting_report_id = Some("real_42".to_string());
        f.transport.reply_to("OpenReport", Ok(response));

        f.persisted.claim_next(|_| false);
        f.chain
            .process(&RequestContext::queued(first, create))
            .await
            .unwrap();

        assert_eq!(
            f.persisted.get(second).unwrap().request.data["reportID"],
            json!("real_42")
        );
        assert!(!f.conflicts.is_pending("tmp_1"));
    }

    #[tokio::test]
    async fn queued_write_on_pending_id_is_a_conflict() {
        let f = fixture().await;
        f.conflicts.reserve("tmp_1");

        let outcome = f
            .chain
            .process(&RequestContext::queued(7, write("AddComment", "tmp_1")))
            .await;

        assert_eq!(
            outcome,
            Err(RequestError::Conflict {
                id: "tmp_1".to_string()
            })
        );
        assert!(f.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn one_shot_requests_are_not_deferred() {
        let f = fixture().await;
        f.conflicts.reserve("tmp_1");
        let (read, _) = Request::new(
            "OpenReport",
            [("reportID".to_string(), json!("tmp_1"))].into_iter().collect(),
            RequestType::Read,
            StoreData::new(),
        )
        .unwrap();

        assert!(f.chain.process(&RequestContext::one_shot(read)).await.is_ok());
        assert!(f.conflicts.is_pending("tmp_1"));
    }
}
