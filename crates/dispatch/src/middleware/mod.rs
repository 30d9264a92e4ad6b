//! The request middleware chain.
//!
//! Every request, queued or one-shot, goes through the same ordered list of
//! interceptors. Each one receives the request context and a [`Next`]
//! handle; it may act before calling `next.run`, inspect or transform the
//! outcome afterwards, or run `next` again (reauthentication does).
//!
//! The list is stored innermost first: the first middleware wraps the
//! transport result directly and the last one observes the final outcome.
//! The standard order is
//!
//! Logging → ConnectivityRecheck → Reauthentication →
//! OptimisticIDReconciliation → Pagination → ResponseApplier
//!
//! so the ResponseApplier is always the terminal stage and an error raised
//! anywhere below it flows outwards through every later stage.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use courier_interchange::{Request, Response};
use tokio::sync::watch;

use crate::error::RequestError;
use crate::pagination::PageRequest;
use crate::transport::TransportSender;

mod apply;
mod logging;
mod optimistic_id;
mod pagination;
mod reauth;
mod recheck;

pub use apply::ResponseApplication;
pub use logging::RequestLogger;
pub use optimistic_id::OptimisticIdReconciliation;
pub use pagination::PaginationMerge;
pub use reauth::Reauthentication;
pub use recheck::ConnectivityRecheck;

/// What a request resolves to after the chain.
pub type Outcome = Result<Response, RequestError>;

/// A request on its way through the chain.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request: Request,
    /// Write-log sequence number when the request comes from the queue.
    pub seq: Option<u64>,
    pub pagination: Option<PageRequest>,
    /// Abandons the transport send, and only the send.
    pub interrupt: Option<Interrupt>,
}

/// Signals that abandon a request still waiting for its response.
///
/// Checked only by the terminal transport step. Once a response exists the
/// outer stages always run to completion, so a confirmed write is never
/// half-applied and sent again.
#[derive(Debug, Clone)]
pub struct Interrupt {
    online: watch::Receiver<bool>,
    shutdown: watch::Receiver<bool>,
}

impl Interrupt {
    pub fn new(online: watch::Receiver<bool>, shutdown: watch::Receiver<bool>) -> Self {
        Interrupt { online, shutdown }
    }

    /// Resolves when the network goes offline or shutdown is requested.
    pub async fn triggered(&self) -> RequestError {
        let mut online = self.online.clone();
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            Ok(()) = async { online.wait_for(|online| !*online).await.map(|_| ()) } => RequestError::Offline,
            Ok(()) = async { shutdown.wait_for(|stop| *stop).await.map(|_| ()) } => RequestError::Shutdown,
            else => std::future::pending().await,
        }
    }
}

impl RequestContext {
    /// A one-shot request.
    pub fn one_shot(request: Request) -> Self {
        RequestContext {
            request,
            seq: None,
            pagination: None,
            interrupt: None,
        }
    }

    /// A request drained from the write log.
    pub fn queued(seq: u64, request: Request) -> Self {
        RequestContext {
            request,
            seq: Some(seq),
            pagination: None,
            interrupt: None,
        }
    }

    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    pub fn with_pagination(mut self, page: PageRequest) -> Self {
        self.pagination = Some(page);
        self
    }

    pub fn from_queue(&self) -> bool {
        self.seq.is_some()
    }
}

/// One interceptor.
///
/// ## Thread Safety
///
/// Middlewares are shared by the queue worker and every concurrent one-shot
/// request, so they must be `Send + Sync` and keep their state behind
/// synchronization.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn intercept(&self, ctx: &RequestContext, next: Next<'_>) -> Outcome;
}

/// The rest of the chain below a middleware.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    inner: &'a [Arc<dyn Middleware>],
    sender: &'a TransportSender,
}

impl<'a> Next<'a> {
    /// Run the remaining middlewares and finally the transport.
    pub fn run(self, ctx: &'a RequestContext) -> Pin<Box<dyn Future<Output = Outcome> + Send + 'a>> {
        match self.inner.split_last() {
            Some((middleware, rest)) => middleware.intercept(
                ctx,
                Next {
                    inner: rest,
                    sender: self.sender,
                },
            ),
            None => Box::pin(async move {
                let send = self.sender.send(&ctx.request.command, &ctx.request.data);
                match &ctx.interrupt {
                    Some(interrupt) => tokio::select! {
                        biased;
                        outcome = send => outcome.map_err(RequestError::from),
                        reason = interrupt.triggered() => Err(reason),
                    },
                    None => send.await.map_err(RequestError::from),
                }
            }),
        }
    }
}

/// An ordered list of middlewares over a transport.
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn Middleware>>,
    sender: TransportSender,
}

impl MiddlewareChain {
    /// An empty chain: requests go straight to the transport.
    pub fn new(sender: TransportSender) -> Self {
        MiddlewareChain {
            middlewares: Vec::new(),
            sender,
        }
    }

    /// Wrap the chain built so far in `middleware`.
    pub fn wrap(mut self, middleware: impl Middleware) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Middleware names, innermost first.
    pub fn names(&self) -> Vec<&'static str> {
        self.middlewares.iter().map(|m| m.name()).collect()
    }

    pub fn sender(&self) -> &TransportSender {
        &self.sender
    }

    pub async fn process(&self, ctx: &RequestContext) -> Outcome {
        Next {
            inner: &self.middlewares,
            sender: &self.sender,
        }
        .run(ctx)
        .await
    }
}
