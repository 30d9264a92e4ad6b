//! The sequential write queue.
//!
//! A single worker drains the write log through the middleware chain, one
//! entry at a time, strictly in insertion order. An entry leaves the log
//! only after its terminal outcome was applied to the store.
//!
//! ## States
//!
//! - `Idle`: nothing to send.
//! - `Running`: an entry is going through the chain.
//! - `Paused`: entries are waiting, because of a manual pause, lost
//!   connectivity, a retry backoff, or because every remaining entry is
//!   deferred on an unresolved identifier.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use courier_interchange::Request;
use courier_storage::PersistedEntry;
use serde::Serialize;
use tokio::sync::{watch, Notify};

use crate::applier::ResponseApplier;
use crate::config::RetryConfig;
use crate::conflict::ConflictTracker;
use crate::error::RequestError;
use crate::middleware::{Interrupt, MiddlewareChain, Outcome, RequestContext};
use crate::network::NetworkState;
use crate::persisted::PersistedRequests;
use crate::session::AuthGate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueState {
    Idle,
    Running,
    Paused,
}

/// Handle to the queue. Cheap to clone; all clones drive the same worker.
#[derive(Clone)]
pub struct SequentialQueue {
    inner: Arc<QueueInner>,
}

pub(crate) struct QueueParts {
    pub persisted: Arc<PersistedRequests>,
    pub chain: Arc<MiddlewareChain>,
    pub applier: Arc<ResponseApplier>,
    pub network: Arc<NetworkState>,
    pub conflicts: Arc<ConflictTracker>,
    pub gate: Arc<AuthGate>,
    pub retry: RetryConfig,
    /// Client-wide stop signal; also ends connectivity probing.
    pub shutdown: watch::Sender<bool>,
}

struct QueueInner {
    parts: QueueParts,
    state: watch::Sender<QueueState>,
    paused: AtomicBool,
    wake: Notify,
}

/// Worker-local bookkeeping.
#[derive(Default)]
struct Progress {
    /// Entries deferred on an unresolved identifier.
    deferred: HashSet<u64>,
    /// Resolution generation the deferred set was computed against.
    resolved_generation: u64,
    /// Failed attempts per entry.
    attempts: HashMap<u64, u32>,
}

impl SequentialQueue {
    pub(crate) fn new(parts: QueueParts) -> Self {
        let initial = if parts.persisted.is_empty() {
            QueueState::Idle
        } else {
            QueueState::Paused
        };
        SequentialQueue {
            inner: Arc::new(QueueInner {
                parts,
                state: watch::Sender::new(initial),
                paused: AtomicBool::new(false),
                wake: Notify::new(),
            }),
        }
    }

    /// Append a write and wake the worker. Returns its sequence number.
    ///
    /// Temporary IDs the request introduces are marked unresolved until it
    /// completes.
    pub fn push(&self, request: Request) -> u64 {
        for id in &request.optimistic_ids {
            self.inner.parts.conflicts.reserve(id.clone());
        }
        let seq = self.inner.parts.persisted.push(request);
        self.inner.wake.notify_one();
        seq
    }

    /// Stop taking new entries. The one in flight, if any, completes.
    pub fn pause(&self) {
        if !self.inner.paused.swap(true, Ordering::SeqCst) {
            tracing::info!("write queue paused");
        }
        self.set_state(QueueState::Paused);
        self.inner.wake.notify_one();
    }

    pub fn resume(&self) {
        if self.inner.paused.swap(false, Ordering::SeqCst) {
            tracing::info!("write queue resumed");
        }
        self.inner.wake.notify_one();
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> QueueState {
        *self.inner.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<QueueState> {
        self.inner.state.subscribe()
    }

    /// Number of writes not yet confirmed.
    pub fn len(&self) -> usize {
        self.inner.parts.persisted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entries(&self) -> Vec<PersistedEntry> {
        self.inner.parts.persisted.entries()
    }

    /// Wait until every queued write reached a terminal outcome.
    pub async fn wait_for_idle(&self) {
        self.inner.parts.persisted.wait_until_empty().await;
    }

    /// Ask the worker to stop.
    ///
    /// An entry still waiting for its response is released and resent on the
    /// next start. One whose response already arrived is settled first.
    pub fn shutdown(&self) {
        self.inner.parts.shutdown.send_replace(true);
        self.inner.wake.notify_one();
    }

    fn set_state(&self, state: QueueState) {
        self.inner.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                tracing::debug!(from = ?*current, to = ?state, "write queue state");
                *current = state;
                true
            }
        });
    }

    /// The worker loop. Runs until [`SequentialQueue::shutdown`].
    pub async fn run(self) {
        let parts = &self.inner.parts;
        let mut online = parts.network.subscribe();
        let mut resolved = parts.conflicts.subscribe();
        let mut shutdown = self.inner.parts.shutdown.subscribe();
        let mut progress = Progress::default();

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            let generation = *resolved.borrow_and_update();
            if generation != progress.resolved_generation {
                progress.resolved_generation = generation;
                progress.deferred.clear();
            }
            online.borrow_and_update();

            let next = if self.is_paused() {
                None
            } else if !parts.network.is_online() {
                None
            } else if !parts.gate.is_open() {
                tokio::select! {
                    _ = parts.gate.wait_until_open() => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            } else {
                parts
                    .persisted
                    .claim_next(|entry| progress.deferred.contains(&entry.seq))
            };

            let Some(entry) = next else {
                self.set_state(if parts.persisted.is_empty() && !self.is_paused() {
                    QueueState::Idle
                } else {
                    QueueState::Paused
                });
                tokio::select! {
                    _ = self.inner.wake.notified() => {}
                    _ = online.changed() => {}
                    _ = resolved.changed() => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            };

            self.set_state(QueueState::Running);
            let ctx = RequestContext::queued(entry.seq, entry.request).with_interrupt(
                Interrupt::new(parts.network.subscribe(), self.inner.parts.shutdown.subscribe()),
            );
            let outcome = parts.chain.process(&ctx).await;
            self.settle(&ctx, outcome, &mut progress, &mut shutdown).await;
        }

        self.set_state(if self.inner.parts.persisted.is_empty() {
            QueueState::Idle
        } else {
            QueueState::Paused
        });
        tracing::debug!("write queue worker stopped");
    }

    async fn settle(
        &self,
        ctx: &RequestContext,
        outcome: Outcome,
        progress: &mut Progress,
        shutdown: &mut watch::Receiver<bool>,
    ) {
        let parts = &self.inner.parts;
        let Some(seq) = ctx.seq else {
            return;
        };
        let command = ctx.request.command.as_str();

        match outcome {
            Ok(_) => {
                progress.attempts.remove(&seq);
                parts.persisted.remove(seq);
            }
            Err(RequestError::Conflict { id }) => {
                tracing::debug!(seq, command, id = %id, "write deferred");
                parts.persisted.release(seq);
                progress.deferred.insert(seq);
            }
            Err(e @ (RequestError::Offline | RequestError::Shutdown)) => {
                tracing::info!(seq, command, reason = %e, "write interrupted before a response, will resend");
                parts.persisted.release(seq);
            }
            Err(RequestError::AuthFailed(message)) => {
                tracing::error!(seq, command, error = %message, "reauthentication failed, pausing write queue");
                parts.persisted.release(seq);
                self.pause();
            }
            Err(RequestError::Transport(e)) if e.is_transient() => {
                let attempts = progress.attempts.entry(seq).or_insert(0);
                *attempts += 1;
                let attempt = *attempts;
                if attempt >= parts.retry.max_attempts {
                    tracing::warn!(seq, command, attempts = attempt, error = %e, "write failed too many times, giving up");
                    progress.attempts.remove(&seq);
                    self.give_up(seq);
                    return;
                }

                parts.persisted.release(seq);
                self.set_state(QueueState::Paused);
                let delay = parts.retry.delay(attempt);
                tracing::info!(seq, command, attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying write after backoff");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => {}
                }
            }
            Err(e) => {
                tracing::warn!(seq, command, error = %e, "write failed permanently");
                progress.attempts.remove(&seq);
                self.give_up(seq);
            }
        }
    }

    /// Apply failure instructions and drop the entry.
    fn give_up(&self, seq: u64) {
        let parts = &self.inner.parts;
        let Some(entry) = parts.persisted.get(seq) else {
            return;
        };
        parts.applier.apply_outcome(&entry.request, false);
        parts
            .conflicts
            .resolve_all(entry.request.optimistic_ids.iter().map(String::as_str));
        parts.persisted.remove(seq);
    }
}
