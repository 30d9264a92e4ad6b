//! In-process fakes for the dispatcher seams.
//!
//! Used by this crate's tests and available to hosts that want to exercise
//! their own code against a dispatcher without a network.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use courier_interchange::Response;
use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::api::EventChannel;
use crate::error::{AuthError, TransportError};
use crate::network::ConnectivityProbe;
use crate::session::{Authenticator, Session};
use crate::transport::Transport;

type Reply = Result<Response, TransportError>;

/// A transport that answers from per-command scripts.
///
/// Replies queued with [`ScriptedTransport::reply_to`] are consumed in
/// order; once a command's script is empty it gets `jsonCode` 200.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    sent: Mutex<Vec<(String, Map<String, Value>)>>,
    latency: Mutex<Option<Duration>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next reply for `command`.
    pub fn reply_to(&self, command: &str, reply: Reply) {
        self.scripts
            .lock()
            .entry(command.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Queue `times` copies of a reply.
    pub fn reply_times(&self, command: &str, times: usize, reply: Reply) {
        for _ in 0..times {
            self.reply_to(command, reply.clone());
        }
    }

    /// Delay every reply.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    /// Every request received, in order, with the parameters it carried.
    pub fn sent(&self) -> Vec<(String, Map<String, Value>)> {
        self.sent.lock().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(c, _)| c.clone()).collect()
    }

    pub fn count(&self, command: &str) -> usize {
        self.sent.lock().iter().filter(|(c, _)| c == command).count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, command: &str, data: &Map<String, Value>) -> Reply {
        self.sent.lock().push((command.to_string(), data.clone()));
        let reply = self
            .scripts
            .lock()
            .get_mut(command)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(Response::success()));
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        reply
    }
}

/// An authenticator that returns a fixed token, or always fails.
pub struct FakeAuthenticator {
    token: Option<String>,
    calls: AtomicUsize,
}

impl FakeAuthenticator {
    pub fn succeeding(token: impl Into<String>) -> Self {
        FakeAuthenticator {
            token: Some(token.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        FakeAuthenticator {
            token: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authenticator for FakeAuthenticator {
    async fn reauthenticate(&self, _session: &Session) -> Result<String, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.token.clone().ok_or(AuthError::MissingCredentials)
    }
}

/// A probe whose answer the test controls.
pub struct FakeProbe {
    reachable: AtomicBool,
    calls: AtomicUsize,
}

impl FakeProbe {
    pub fn new(reachable: bool) -> Self {
        FakeProbe {
            reachable: AtomicBool::new(reachable),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectivityProbe for FakeProbe {
    async fn probe(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reachable.load(Ordering::SeqCst)
    }
}

/// An event channel with a fixed socket ID.
pub struct StaticEventChannel(pub Option<String>);

impl EventChannel for StaticEventChannel {
    fn socket_id(&self) -> Option<String> {
        self.0.clone()
    }
}
