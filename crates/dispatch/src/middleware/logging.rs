use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{Middleware, Next, Outcome, RequestContext};

/// Logs every request and its outcome. Never alters control flow.
pub struct RequestLogger {
    redacted_params: Vec<String>,
}

impl RequestLogger {
    pub fn new(redacted_params: Vec<String>) -> Self {
        RequestLogger { redacted_params }
    }

    /// Parameters with sensitive values masked.
    pub fn redact(&self, data: &Map<String, Value>) -> Map<String, Value> {
        data.iter()
            .map(|(k, v)| {
                if self.redacted_params.iter().any(|p| p == k) {
                    (k.clone(), Value::String("<redacted>".to_string()))
                } else {
                    (k.clone(), v.clone())
                }
            })
            .collect()
    }
}

#[async_trait]
impl Middleware for RequestLogger {
    fn name(&self) -> &'static str {
        "Logging"
    }

    async fn intercept(&self, ctx: &RequestContext, next: Next<'_>) -> Outcome {
        let command = ctx.request.command.as_str();
        let params = Value::Object(self.redact(&ctx.request.data));
        tracing::info!(command, seq = ?ctx.seq, params = %params, "making API request");

        let outcome = next.run(ctx).await;
        match &outcome {
            Ok(response) if response.is_success() => {
                tracing::info!(command, json_code = response.json_code, "finished API request");
            }
            Ok(response) => tracing::warn!(
                command,
                json_code = response.json_code,
                message = response.message.as_deref().unwrap_or(""),
                "API request returned an error code"
            ),
            Err(e) => tracing::warn!(command, error = %e, "API request failed"),
        }
        outcome
    }
}
