//! The transport seam and its HTTP implementation.
//!
//! `HttpTransport` uses `ureq` (sync) wrapped in
//! `tokio::task::spawn_blocking` so the async runtime never blocks on
//! network I/O.

use std::sync::Arc;

use async_trait::async_trait;
use courier_interchange::Response;
use serde_json::{Map, Value};

use crate::error::TransportError;
use crate::session::Session;

/// Sends one command and returns the structured response.
///
/// Any decoded response, including business failures and 407, is `Ok`.
/// `Err` means no usable response arrived.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(
        &self,
        command: &str,
        data: &Map<String, Value>,
    ) -> Result<Response, TransportError>;
}

/// POSTs JSON to `{base_url}/api/{command}`.
pub struct HttpTransport {
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        HttpTransport {
            base_url: base_url.into(),
        }
    }

    pub fn command_url(&self, command: &str) -> String {
        format!("{}/api/{}", self.base_url.trim_end_matches('/'), command)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        command: &str,
        data: &Map<String, Value>,
    ) -> Result<Response, TransportError> {
        let url = self.command_url(command);
        let body = Value::Object(data.clone());

        tokio::task::spawn_blocking(move || {
            let agent = ureq::Agent::new_with_defaults();
            let response = agent.post(&url).send_json(&body).map_err(map_ureq_error)?;
            response
                .into_body()
                .read_json::<Response>()
                .map_err(|e| TransportError::Decode(e.to_string()))
        })
        .await
        .map_err(|e| TransportError::Unreachable(format!("task join error: {e}")))?
    }
}

fn map_ureq_error(error: ureq::Error) -> TransportError {
    match error {
        ureq::Error::StatusCode(status) => TransportError::Http { status },
        ureq::Error::Timeout(_) => TransportError::Timeout,
        other => TransportError::Unreachable(other.to_string()),
    }
}

/// The terminal step of the middleware chain.
///
/// Injects the session's current `authToken` into the parameters at send
/// time, so a request retried after reauthentication carries the new token.
#[derive(Clone)]
pub struct TransportSender {
    transport: Arc<dyn Transport>,
    session: Arc<Session>,
}

impl TransportSender {
    pub fn new(transport: Arc<dyn Transport>, session: Arc<Session>) -> Self {
        TransportSender { transport, session }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub async fn send(
        &self,
        command: &str,
        data: &Map<String, Value>,
    ) -> Result<Response, TransportError> {
        match self.session.token() {
            Some(token) => {
                let mut data = data.clone();
                data.insert("authToken".to_string(), Value::String(token));
                self.transport.send(command, &data).await
            }
            None => self.transport.send(command, data).await,
        }
    }
}
