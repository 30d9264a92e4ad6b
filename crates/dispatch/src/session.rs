//! Auth session and token refresh.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tokio::sync::{watch, Mutex};

use crate::error::AuthError;
use crate::transport::Transport;

/// Stored login credentials used to mint a new auth token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub partner_user_id: String,
    pub partner_user_secret: String,
}

/// The current auth token and the credentials to refresh it.
///
/// Every token change bumps a generation counter. Requests remember the
/// generation they were sent with, so a refresh triggered by a stale 407
/// can tell that someone else already refreshed.
#[derive(Debug, Default)]
pub struct Session {
    token: RwLock<Option<String>>,
    credentials: RwLock<Option<Credentials>>,
    generation: AtomicU64,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(self, token: impl Into<String>) -> Self {
        *self.token.write() = Some(token.into());
        self
    }

    pub fn with_credentials(self, credentials: Credentials) -> Self {
        *self.credentials.write() = Some(credentials);
        self
    }

    pub fn token(&self) -> Option<String> {
        self.token.read().clone()
    }

    pub fn credentials(&self) -> Option<Credentials> {
        self.credentials.read().clone()
    }

    pub fn set_credentials(&self, credentials: Option<Credentials>) {
        *self.credentials.write() = credentials;
    }

    /// Replace the token and start a new generation.
    pub fn set_token(&self, token: Option<String>) {
        *self.token.write() = token;
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

/// Exchanges stored credentials for a fresh auth token.
///
/// ## Thread Safety
///
/// Called from whichever task hit the expired token; implementations must be
/// `Send + Sync`. The [`AuthGate`] guarantees at most one call at a time.
#[async_trait]
pub trait Authenticator: Send + Sync + 'static {
    /// Return a new auth token. The caller installs it in the session.
    async fn reauthenticate(&self, session: &Session) -> Result<String, AuthError>;
}

/// Sends the `Authenticate` command straight to the transport, outside the
/// middleware chain, and reads `authToken` from the response.
pub struct CredentialsAuthenticator {
    transport: Arc<dyn Transport>,
}

impl CredentialsAuthenticator {
    pub const COMMAND: &'static str = "Authenticate";

    pub fn new(transport: Arc<dyn Transport>) -> Self {
        CredentialsAuthenticator { transport }
    }
}

#[async_trait]
impl Authenticator for CredentialsAuthenticator {
    async fn reauthenticate(&self, session: &Session) -> Result<String, AuthError> {
        let credentials = session.credentials().ok_or(AuthError::MissingCredentials)?;

        let mut data = Map::new();
        data.insert(
            "partnerUserID".to_string(),
            Value::String(credentials.partner_user_id),
        );
        data.insert(
            "partnerUserSecret".to_string(),
            Value::String(credentials.partner_user_secret),
        );
        data.insert("shouldRetry".to_string(), Value::Bool(false));

        let response = self.transport.send(Self::COMMAND, &data).await?;
        if !response.is_success() {
            return Err(AuthError::Rejected {
                json_code: response.json_code,
                message: response.message.unwrap_or_default(),
            });
        }
        response
            .get("authToken")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AuthError::Rejected {
                json_code: response.json_code,
                message: "response carried no authToken".to_string(),
            })
    }
}

// ── Auth gate ────────────────────────────────────────────────────────────────

/// Serializes token refreshes and holds the queue back while one runs.
///
/// The gate is open unless a refresh is in progress. The sequential queue
/// waits on [`AuthGate::wait_until_open`] before taking the next entry.
#[derive(Debug)]
pub struct AuthGate {
    open: watch::Sender<bool>,
    refresh_lock: Mutex<()>,
}

impl Default for AuthGate {
    fn default() -> Self {
        AuthGate {
            open: watch::Sender::new(true),
            refresh_lock: Mutex::new(()),
        }
    }
}

impl AuthGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        *self.open.borrow()
    }

    /// Wait until no refresh is in progress.
    pub async fn wait_until_open(&self) {
        let mut rx = self.open.subscribe();
        // The sender lives in self, so wait_for only fails after drop.
        let _ = rx.wait_for(|open| *open).await;
    }

    /// Refresh the session token unless it already changed since
    /// `seen_generation`.
    pub async fn refresh(
        &self,
        session: &Session,
        authenticator: &dyn Authenticator,
        seen_generation: u64,
    ) -> Result<(), AuthError> {
        let _guard = self.refresh_lock.lock().await;
        if session.generation() != seen_generation {
            tracing::debug!("auth token already refreshed by another request");
            return Ok(());
        }

        self.open.send_replace(false);
        let _reopen = Reopen(&self.open);
        tracing::info!("auth token expired, reauthenticating");
        match authenticator.reauthenticate(session).await {
            Ok(token) => {
                session.set_token(Some(token));
                tracing::info!("reauthenticated");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "reauthentication failed");
                Err(e)
            }
        }
    }
}

/// Reopens the gate when a refresh ends, including when it is cancelled.
struct Reopen<'a>(&'a watch::Sender<bool>);

impl Drop for Reopen<'_> {
    fn drop(&mut self) {
        self.0.send_replace(true);
    }
}
