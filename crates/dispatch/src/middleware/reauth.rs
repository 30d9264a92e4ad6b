use std::sync::Arc;

use async_trait::async_trait;

use super::{Middleware, Next, Outcome, RequestContext};
use crate::error::RequestError;
use crate::session::{AuthGate, Authenticator, Session};

/// Refreshes an expired token (`jsonCode` 407) and replays the request once.
///
/// Requests wait on the [`AuthGate`] before going out, so nothing races
/// ahead with a stale token while a refresh runs. Concurrent 407s for the
/// same token generation cause a single refresh.
pub struct Reauthentication {
    session: Arc<Session>,
    gate: Arc<AuthGate>,
    authenticator: Option<Arc<dyn Authenticator>>,
}

impl Reauthentication {
    pub fn new(
        session: Arc<Session>,
        gate: Arc<AuthGate>,
        authenticator: Option<Arc<dyn Authenticator>>,
    ) -> Self {
        Reauthentication {
            session,
            gate,
            authenticator,
        }
    }
}

#[async_trait]
impl Middleware for Reauthentication {
    fn name(&self) -> &'static str {
        "Reauthentication"
    }

    async fn intercept(&self, ctx: &RequestContext, next: Next<'_>) -> Outcome {
        self.gate.wait_until_open().await;
        let generation = self.session.generation();
        let outcome = next.run(ctx).await;

        let Some(authenticator) = &self.authenticator else {
            return outcome;
        };
        match outcome {
            Ok(response) if response.requires_reauthentication() => {
                self.gate
                    .refresh(&self.session, authenticator.as_ref(), generation)
                    .await
                    .map_err(|e| RequestError::AuthFailed(e.to_string()))?;

                tracing::info!(command = %ctx.request.command, "replaying request with refreshed token");
                let retried = next.run(ctx).await?;
                if retried.requires_reauthentication() {
                    return Err(RequestError::AuthFailed(
                        "token rejected right after refresh".to_string(),
                    ));
                }
                Ok(retried)
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::MiddlewareChain;
    use crate::testing::{FakeAuthenticator, ScriptedTransport};
    use crate::transport::TransportSender;
    use courier_interchange::{json_code, Request, RequestType, Response, StoreData};
    use serde_json::{json, Map};

    fn ctx() -> RequestContext {
        let (request, _) =
            Request::new("OpenReport", Map::new(), RequestType::Read, StoreData::new()).unwrap();
        RequestContext::one_shot(request)
    }

    fn chain(
        transport: Arc<ScriptedTransport>,
        session: Arc<Session>,
        auth: Arc<FakeAuthenticator>,
    ) -> MiddlewareChain {
        MiddlewareChain::new(TransportSender::new(transport, session.clone())).wrap(
            Reauthentication::new(session, Arc::new(AuthGate::new()), Some(auth)),
        )
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_and_request_replayed_once() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.reply_to("OpenReport", Ok(Response::with_code(json_code::NOT_AUTHENTICATED)));
        transport.reply_to("OpenReport", Ok(Response::success()));
        let session = Arc::new(Session::new().with_token("old"));
        let auth = Arc::new(FakeAuthenticator::succeeding("new"));

        let outcome = chain(transport.clone(), session, auth.clone())
            .process(&ctx())
            .await;

        assert!(outcome.unwrap().is_success());
        assert_eq!(auth.calls(), 1);
        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].1["authToken"], json!("old"));
        assert_eq!(sent[1].1["authToken"], json!("new"));
    }

    #[tokio::test]
    async fn failed_refresh_is_auth_failed() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.reply_to("OpenReport", Ok(Response::with_code(json_code::NOT_AUTHENTICATED)));
        let session = Arc::new(Session::new().with_token("old"));
        let auth = Arc::new(FakeAuthenticator::failing());

        let outcome = chain(transport.clone(), session, auth).process(&ctx()).await;

        assert!(matches!(outcome, Err(RequestError::AuthFailed(_))));
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn without_authenticator_407_passes_through() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.reply_to("OpenReport", Ok(Response::with_code(json_code::NOT_AUTHENTICATED)));
        let session = Arc::new(Session::new());
        let chain = MiddlewareChain::new(TransportSender::new(transport, session.clone()))
            .wrap(Reauthentication::new(session, Arc::new(AuthGate::new()), None));

        let response = chain.process(&ctx()).await.unwrap();
        assert!(response.requires_reauthentication());
    }
}
