//! Connectivity state and probing.

use async_trait::async_trait;
use tokio::sync::watch;

/// The online/offline flag, with change notification.
///
/// Set by the host (OS reachability callbacks) and by connectivity probes.
#[derive(Debug)]
pub struct NetworkState {
    online: watch::Sender<bool>,
}

impl NetworkState {
    pub fn new(online: bool) -> Self {
        NetworkState {
            online: watch::Sender::new(online),
        }
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    /// Record a connectivity change. Setting the current value is a no-op.
    pub fn set_online(&self, online: bool) {
        let changed = self.online.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            if online {
                tracing::info!("network is back online");
            } else {
                tracing::warn!("network went offline");
            }
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }

    /// Wait until the network is online.
    pub async fn wait_online(&self) {
        let mut rx = self.subscribe();
        let _ = rx.wait_for(|online| *online).await;
    }
}

impl Default for NetworkState {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Actively checks whether the API is reachable.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync + 'static {
    async fn probe(&self) -> bool;
}

/// Probes with an HTTP GET. Any HTTP status counts as reachable; only a
/// failure to get a response counts as offline.
pub struct HttpProbe {
    url: String,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>) -> Self {
        HttpProbe { url: url.into() }
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn probe(&self) -> bool {
        let url = self.url.clone();
        tokio::task::spawn_blocking(move || {
            let agent = ureq::Agent::new_with_defaults();
            match agent.get(&url).call() {
                Ok(_) | Err(ureq::Error::StatusCode(_)) => true,
                Err(e) => {
                    tracing::debug!(url = %url, error = %e, "connectivity probe failed");
                    false
                }
            }
        })
        .await
        .unwrap_or(false)
    }
}
