//! Wiring: builds the middleware chain and the queue, starts the worker.

use std::sync::Arc;

use courier_storage::{MemoryWriteLog, WriteLog};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::api::{Api, EventChannel};
use crate::applier::ResponseApplier;
use crate::config::{ClientConfig, RetryConfig};
use crate::conflict::ConflictTracker;
use crate::error::ConfigError;
use crate::middleware::{
    ConnectivityRecheck, MiddlewareChain, OptimisticIdReconciliation, PaginationMerge,
    Reauthentication, RequestLogger, ResponseApplication,
};
use crate::network::{ConnectivityProbe, HttpProbe, NetworkState};
use crate::persisted::PersistedRequests;
use crate::queue::{QueueParts, SequentialQueue};
use crate::sequencer::UpdateSequencer;
use crate::session::{AuthGate, Authenticator, CredentialsAuthenticator, Session};
use crate::store::ReactiveStore;
use crate::transport::{HttpTransport, Transport, TransportSender};

/// Builder for a [`Client`].
///
/// Only the transport and the store are required. Defaults: a volatile
/// write log, no reauthentication, no connectivity probe, online.
pub struct ClientBuilder {
    transport: Arc<dyn Transport>,
    store: Arc<dyn ReactiveStore>,
    write_log: Option<Arc<dyn WriteLog>>,
    authenticator: Option<Arc<dyn Authenticator>>,
    probe: Option<Arc<dyn ConnectivityProbe>>,
    events: Option<Arc<dyn EventChannel>>,
    session: Option<Arc<Session>>,
    network: Option<Arc<NetworkState>>,
    config: ClientConfig,
}

impl ClientBuilder {
    pub fn new(transport: Arc<dyn Transport>, store: Arc<dyn ReactiveStore>) -> Self {
        ClientBuilder {
            transport,
            store,
            write_log: None,
            authenticator: None,
            probe: None,
            events: None,
            session: None,
            network: None,
            config: ClientConfig::default(),
        }
    }

    /// HTTP transport, probe and credential authenticator from `config`.
    pub fn http(config: ClientConfig, store: Arc<dyn ReactiveStore>) -> Result<Self, ConfigError> {
        let base_url = config
            .transport
            .base_url
            .clone()
            .ok_or_else(|| ConfigError::Invalid("transport.base_url is not set".to_string()))?;
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(base_url));
        let mut builder = ClientBuilder::new(transport.clone(), store)
            .authenticator(Arc::new(CredentialsAuthenticator::new(transport)));
        if let Some(ping_url) = config.transport.ping_url.clone() {
            builder = builder.probe(Arc::new(HttpProbe::new(ping_url)));
        }
        Ok(builder.config(config))
    }

    pub fn write_log(mut self, log: Arc<dyn WriteLog>) -> Self {
        self.write_log = Some(log);
        self
    }

    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn probe(mut self, probe: Arc<dyn ConnectivityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn event_channel(mut self, events: Arc<dyn EventChannel>) -> Self {
        self.events = Some(events);
        self
    }

    /// Use an existing session instead of one built from the config token.
    pub fn session(mut self, session: Arc<Session>) -> Self {
        self.session = Some(session);
        self
    }

    /// Share a network state owned by the host.
    pub fn network(mut self, network: Arc<NetworkState>) -> Self {
        self.network = Some(network);
        self
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Load the write log and start the queue worker.
    pub async fn start(self) -> Result<Client, ConfigError> {
        let config = self.config;
        config.validate()?;

        let session = self.session.unwrap_or_else(|| {
            let session = Session::new();
            Arc::new(match config.transport.auth_token.clone() {
                Some(token) => session.with_token(token),
                None => session,
            })
        });
        let network = self
            .network
            .unwrap_or_else(|| Arc::new(NetworkState::default()));
        let log = self
            .write_log
            .unwrap_or_else(|| Arc::new(MemoryWriteLog::new()));
        let persisted = PersistedRequests::load(log).await;

        let conflicts = Arc::new(ConflictTracker::new());
        for entry in persisted.entries() {
            for id in &entry.request.optimistic_ids {
                conflicts.reserve(id.clone());
            }
        }

        let sender = TransportSender::new(self.transport, session.clone());
        let sequencer = Arc::new(UpdateSequencer::new(self.store.clone(), sender.clone()));
        let applier = Arc::new(ResponseApplier::new(self.store.clone(), sequencer));
        let gate = Arc::new(AuthGate::new());
        let shutdown = watch::Sender::new(false);

        let chain = Arc::new(
            MiddlewareChain::new(sender)
                .wrap(RequestLogger::new(config.logging.redacted_params.clone()))
                .wrap(
                    ConnectivityRecheck::new(
                        network.clone(),
                        self.probe,
                        config.connectivity.recheck_deadline(),
                    )
                    .stop_on(shutdown.subscribe()),
                )
                .wrap(Reauthentication::new(
                    session.clone(),
                    gate.clone(),
                    self.authenticator,
                ))
                .wrap(OptimisticIdReconciliation::new(
                    conflicts.clone(),
                    persisted.clone(),
                ))
                .wrap(PaginationMerge::new(self.store.clone()))
                .wrap(ResponseApplication::new(applier.clone())),
        );

        let queue = SequentialQueue::new(QueueParts {
            persisted: persisted.clone(),
            chain: chain.clone(),
            applier: applier.clone(),
            network: network.clone(),
            conflicts: conflicts.clone(),
            gate,
            retry: config.retry.clone(),
            shutdown,
        });
        let worker = tokio::spawn(queue.clone().run());
        tracing::debug!(middlewares = ?chain.names(), pending = persisted.len(), "client started");

        Ok(Client {
            api: Api {
                store: self.store,
                queue: queue.clone(),
                chain,
                persisted: persisted.clone(),
                network: network.clone(),
                conflicts,
                applier,
                events: self.events,
            },
            queue,
            network,
            session,
            persisted,
            worker: Mutex::new(Some(worker)),
        })
    }
}

/// A running dispatcher.
pub struct Client {
    api: Api,
    queue: SequentialQueue,
    network: Arc<NetworkState>,
    session: Arc<Session>,
    persisted: Arc<PersistedRequests>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    pub fn api(&self) -> &Api {
        &self.api
    }

    pub fn queue(&self) -> SequentialQueue {
        self.queue.clone()
    }

    pub fn network(&self) -> &Arc<NetworkState> {
        &self.network
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Wait until every write-log change made so far is durable.
    pub async fn flush_persistence(&self) {
        self.persisted.flush().await;
    }

    /// Stop the worker and flush the write log. Unsent writes stay in the
    /// log for the next start.
    pub async fn shutdown(&self) {
        self.queue.shutdown();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "write queue worker ended abnormally");
            }
        }
        self.persisted.flush().await;
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.queue.shutdown();
    }
}
