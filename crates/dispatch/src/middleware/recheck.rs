use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use super::{Middleware, Next, Outcome, RequestContext};
use crate::error::RequestError;
use crate::network::{ConnectivityProbe, NetworkState};

/// Re-probes connectivity when a request is slow or fails at the transport.
///
/// The request itself is never failed or abandoned here; the probe result
/// only updates [`NetworkState`]. While the probe keeps reporting offline it
/// is repeated every deadline until the network is back or the stop signal
/// fires. At most one probe loop runs at a time.
pub struct ConnectivityRecheck {
    network: Arc<NetworkState>,
    probe: Option<Arc<dyn ConnectivityProbe>>,
    deadline: Duration,
    probing: Arc<AtomicBool>,
    stop: Option<watch::Receiver<bool>>,
}

impl ConnectivityRecheck {
    pub fn new(
        network: Arc<NetworkState>,
        probe: Option<Arc<dyn ConnectivityProbe>>,
        deadline: Duration,
    ) -> Self {
        ConnectivityRecheck {
            network,
            probe,
            deadline,
            probing: Arc::new(AtomicBool::new(false)),
            stop: None,
        }
    }

    /// End any probe loop once `stop` turns true.
    pub fn stop_on(mut self, stop: watch::Receiver<bool>) -> Self {
        self.stop = Some(stop);
        self
    }

    fn recheck(&self) {
        let Some(probe) = self.probe.clone() else {
            return;
        };
        if self.probing.swap(true, Ordering::SeqCst) {
            return;
        }
        let network = self.network.clone();
        let probing = self.probing.clone();
        let interval = self.deadline;
        let mut stop = self.stop.clone();
        tokio::spawn(async move {
            let probing_loop = async {
                loop {
                    let online = probe.probe().await;
                    network.set_online(online);
                    if online {
                        break;
                    }
                    tokio::time::sleep(interval).await;
                }
            };
            tokio::select! {
                _ = probing_loop => {}
                _ = stopped(stop.as_mut()) => {
                    tracing::debug!("connectivity probing stopped");
                }
            }
            probing.store(false, Ordering::SeqCst);
        });
    }
}

async fn stopped(stop: Option<&mut watch::Receiver<bool>>) {
    match stop {
        Some(stop) => {
            if stop.wait_for(|stop| *stop).await.is_err() {
                std::future::pending::<()>().await;
            }
        }
        None => std::future::pending::<()>().await,
    }
}

#[async_trait]
impl Middleware for ConnectivityRecheck {
    fn name(&self) -> &'static str {
        "ConnectivityRecheck"
    }

    async fn intercept(&self, ctx: &RequestContext, next: Next<'_>) -> Outcome {
        let request = next.run(ctx);
        tokio::pin!(request);

        let outcome = tokio::select! {
            outcome = &mut request => outcome,
            _ = tokio::time::sleep(self.deadline) => {
                tracing::info!(command = %ctx.request.command, "request exceeded deadline, rechecking connectivity");
                self.recheck();
                request.await
            }
        };

        if let Err(RequestError::Transport(e)) = &outcome {
            tracing::debug!(command = %ctx.request.command, error = %e, "transport error, rechecking connectivity");
            self.recheck();
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::middleware::MiddlewareChain;
    use crate::session::Session;
    use crate::testing::{FakeProbe, ScriptedTransport};
    use crate::transport::TransportSender;
    use courier_interchange::{Request, RequestType, StoreData};
    use serde_json::Map;

    fn ctx() -> RequestContext {
        let (request, _) =
            Request::new("Ping", Map::new(), RequestType::Read, StoreData::new()).unwrap();
        RequestContext::one_shot(request)
    }

    #[tokio::test]
    async fn transport_error_probes_and_updates_state() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.reply_to("Ping", Err(TransportError::Unreachable("down".into())));
        let network = Arc::new(NetworkState::new(true));
        let probe = Arc::new(FakeProbe::new(true));
        probe.set_reachable(false);

        let chain = MiddlewareChain::new(TransportSender::new(transport, Arc::new(Session::new())))
            .wrap(ConnectivityRecheck::new(
                network.clone(),
                Some(probe.clone()),
                Duration::from_millis(20),
            ));

        let outcome = chain.process(&ctx()).await;
        assert!(matches!(outcome, Err(RequestError::Transport(_))));

        let mut rx = network.subscribe();
        tokio::time::timeout(Duration::from_secs(1), rx.wait_for(|online| !*online))
            .await
            .unwrap()
            .unwrap();

        probe.set_reachable(true);
        tokio::time::timeout(Duration::from_secs(1), network.wait_online())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn recheck_loop_ends_on_stop_signal() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.reply_to("Ping", Err(TransportError::Unreachable("down".into())));
        let network = Arc::new(NetworkState::new(true));
        let checker = Arc::new(FakeProbe::new(false));
        let stop = watch::Sender::new(false);

        let chain = MiddlewareChain::new(TransportSender::new(transport, Arc::new(Session::new())))
            .wrap(
                ConnectivityRecheck::new(
                    network.clone(),
                    Some(checker.clone()),
                    Duration::from_millis(10),
                )
                .stop_on(stop.subscribe()),
            );

        let _ = chain.process(&ctx()).await;
        let mut rx = network.subscribe();
        tokio::time::timeout(Duration::from_secs(1), rx.wait_for(|online| !*online))
            .await
            .unwrap()
            .unwrap();

        stop.send_replace(true);
        tokio::time::sleep(Duration::from_millis(30)).await;
        let after_stop = checker.calls();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(checker.calls(), after_stop);
        assert!(!network.is_online());
    }

    #[tokio::test]
    async fn slow_request_triggers_probe_but_completes() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.set_latency(Duration::from_millis(60));
        let network = Arc::new(NetworkState::new(true));
        let probe = Arc::new(FakeProbe::new(true));

        let chain = MiddlewareChain::new(TransportSender::new(transport, Arc::new(Session::new())))
            .wrap(ConnectivityRecheck::new(
                network.clone(),
                Some(probe.clone()),
                Duration::from_millis(10),
            ));

        assert!(chain.process(&ctx()).await.unwrap().is_success());
        assert!(probe.calls() >= 1);
        assert!(network.is_online());
    }
}
