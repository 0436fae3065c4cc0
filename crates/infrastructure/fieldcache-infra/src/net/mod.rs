use std::sync::Arc;
use std::time::Duration;

use fieldcache_config::{CONNECTIVITY_PROBE_TIMEOUT, HTTP_REQUEST_TIMEOUT};
use fieldcache_core::ports::ConnectivityProbe;
use reqwest::Client;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const USER_AGENT: &str = concat!("fieldcache/", env!("CARGO_PKG_VERSION"));

/// Shared client for every remote call: rustls, bounded timeouts, a stable user agent.
pub fn default_http_client() -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(CONNECTIVITY_PROBE_TIMEOUT)
        .timeout(HTTP_REQUEST_TIMEOUT)
        .build()
}

/// Reachability of a well-known URL stands in for "the device is online".
/// Any HTTP response counts as connected; only transport failures count as offline.
pub struct HttpConnectivityProbe {
    client: Client,
    probe_url: String,
    state: watch::Sender<bool>,
}

impl HttpConnectivityProbe {
    pub fn new(client: Client, probe_url: impl Into<String>) -> Self {
        let (state, _) = watch::channel(false);
        Self {
            client,
            probe_url: probe_url.into(),
            state,
        }
    }

    pub async fn check(&self) -> bool {
        let connected = match self
            .client
            .head(&self.probe_url)
            .timeout(CONNECTIVITY_PROBE_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => {
                debug!(url = %self.probe_url, status = %resp.status(), "connectivity probe answered");
                true
            }
            Err(e) => {
                debug!(url = %self.probe_url, "connectivity probe failed: {e}");
                false
            }
        };
        self.state.send_if_modified(|current| {
            let changed = *current != connected;
            *current = connected;
            changed
        });
        connected
    }

    /// Re-checks every `interval` until `cancel` fires, publishing changes to subscribers.
    pub fn spawn_monitor(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut last = None;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let now = self.check().await;
                        if last != Some(now) {
                            info!(connected = now, "connectivity changed");
                            last = Some(now);
                        }
                    }
                }
            }
        })
    }
}

#[async_trait::async_trait]
impl ConnectivityProbe for HttpConnectivityProbe {
    async fn is_currently_connected(&self) -> bool {
        self.check().await
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}
