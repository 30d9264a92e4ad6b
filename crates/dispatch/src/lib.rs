//! courier-dispatch: the request dispatch subsystem.
//!
//! Mutating requests ("writes") are persisted to a durable [`WriteLog`]
//! and drained strictly in order by the [`SequentialQueue`]; reads and
//! side-effect requests go out immediately once the log is empty. Every
//! request, whatever its path, runs through the same [`MiddlewareChain`]:
//!
//! Logging → ConnectivityRecheck → Reauthentication →
//! OptimisticIdReconciliation → Pagination → ResponseApplier
//!
//! The [`Api`] is the caller-facing surface; [`ClientBuilder`] wires the
//! pieces together and starts the queue worker.
//!
//! [`WriteLog`]: courier_storage::WriteLog

pub mod api;
pub mod applier;
pub mod client;
pub mod config;
pub mod conflict;
pub mod error;
pub mod middleware;
pub mod network;
pub mod pagination;
pub mod persisted;
pub mod queue;
pub mod sequencer;
pub mod session;
pub mod store;
pub mod testing;
pub mod transport;

pub use api::{Api, EventChannel, PushEvent};
pub use client::{Client, ClientBuilder};
pub use config::ClientConfig;
pub use error::{AuthError, ConfigError, RequestError, TransportError};
pub use middleware::{Interrupt, Middleware, MiddlewareChain, Next, Outcome, RequestContext};
pub use network::{ConnectivityProbe, HttpProbe, NetworkState};
pub use pagination::{FnPager, PageRequest, Pager};
pub use queue::{QueueState, SequentialQueue};
pub use session::{Authenticator, Credentials, CredentialsAuthenticator, Session};
pub use store::{MemoryStore, ReactiveStore};
pub use transport::{HttpTransport, Transport, TransportSender};
