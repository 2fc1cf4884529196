//! Periodic usage reports posted to the backend's `/ping` endpoint
//!
//! Delivery is best effort: a failed post is dropped and only shows up in
//! the log when `logging.debug` is on. Nothing is retried.

use crate::config::{ConfigHandle, GatekeeperConfig};
use crate::context::{GatekeeperContext, HostInfo};
use crate::http::{HttpTransport, Timeouts};
use gatekeeper_shared::{get_timestamp, HeartbeatSnapshot};
use log::{debug, info, warn};
use reqwest::header::CONTENT_TYPE;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("failed to encode heartbeat: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("heartbeat request timed out: {0}")]
    Timeout(#[source] reqwest::Error),
    #[error("heartbeat request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("backend answered with HTTP {0}")]
    Status(u16),
}

impl From<reqwest::Error> for DeliveryError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            DeliveryError::Timeout(e)
        } else {
            DeliveryError::Transport(e)
        }
    }
}

#[derive(Clone)]
pub struct HeartbeatReporter {
    transport: Arc<HttpTransport>,
    host: Arc<dyn HostInfo>,
}

impl HeartbeatReporter {
    pub fn new(ctx: &GatekeeperContext) -> Self {
        Self {
            transport: Arc::clone(&ctx.transport),
            host: Arc::clone(&ctx.host),
        }
    }

    pub async fn snapshot(&self, config: &GatekeeperConfig) -> HeartbeatSnapshot {
        let configured = config.stats.server_id.trim();
        let server_id = if configured.is_empty() {
            self.host.name()
        } else {
            configured.to_string()
        };

        HeartbeatSnapshot {
            server_id,
            timestamp: get_timestamp(),
            online_players: self.host.online_players().await,
            max_players: self.host.max_players().await,
            version: self.host.version(),
        }
    }

    /// Posts one snapshot. Returns `Ok(None)` when reporting is disabled or
    /// no backend is configured, otherwise the response status.
    pub async fn send(&self, config: &GatekeeperConfig) -> Result<Option<u16>, DeliveryError> {
        if !config.stats.enabled {
            return Ok(None);
        }
        let Ok(base_url) = config.base_url() else {
            return Ok(None);
        };

        let snapshot = self.snapshot(config).await;
        let payload = serde_json::to_vec(&snapshot)?;

        let client = self.transport.client(Timeouts {
            connect: config.connect_timeout(),
            read: config.read_timeout(),
        })?;
        let response = client
            .post(HttpTransport::endpoint(base_url, "ping"))
            .header(CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await?;

        let status = response.status();
        if config.logging.debug {
            debug!("Stats ping sent ({}) for {}", status.as_u16(), snapshot.server_id);
        }
        if !status.is_success() {
            return Err(DeliveryError::Status(status.as_u16()));
        }
        Ok(Some(status.as_u16()))
    }

    /// One timer tick. Never fails: delivery errors are logged when
    /// `logging.debug` is on and dropped otherwise.
    pub async fn tick(&self, config: &GatekeeperConfig) {
        if let Err(e) = self.send(config).await {
            if config.logging.debug {
                warn!("Stats ping failed: {}", e);
            }
        }
    }

    /// Starts the timer. The first tick fires immediately; the period is
    /// fixed at spawn time, while every tick reads a fresh snapshot.
    pub fn spawn(self, config: ConfigHandle, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = config.snapshot().await.heartbeat_interval();
            let mut timer = interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("Heartbeat reporter started ({}s interval)", period.as_secs());

            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        let snapshot = config.snapshot().await;
                        self.tick(&snapshot).await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Heartbeat reporter stopped");
                            break;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::tests::StaticHost;
    use crate::reputation::tests::spawn_stub_backend;
    use std::time::Duration;
    use tokio_test::assert_ok;

    fn reporter() -> HeartbeatReporter {
        let ctx = GatekeeperContext::new(
            ConfigHandle::new("unused.toml", GatekeeperConfig::default()),
            Arc::new(StaticHost),
        );
        HeartbeatReporter::new(&ctx)
    }

    fn configured(base_url: &str) -> GatekeeperConfig {
        let mut config = GatekeeperConfig::default();
        config.api.base_url = base_url.to_string();
        config.api.connect_timeout_ms = 300;
        config.api.read_timeout_ms = 300;
        config.logging.debug = true;
        config
    }

    async fn refused_url() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_snapshot_payload() {
        let mut config = configured("http://unused");
        config.stats.server_id = "srv1".to_string();

        let payload = serde_json::to_string(&reporter().snapshot(&config).await).unwrap();
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();

        assert_eq!(value["serverId"], "srv1");
        assert_eq!(value["onlinePlayers"], 3);
        assert_eq!(value["maxPlayers"], 20);
        assert_eq!(value["version"], "1.0");
        assert!(value["timestamp"].as_u64().is_some());
    }

    #[tokio::test]
    async fn test_snapshot_falls_back_to_host_name() {
        let mut config = configured("http://unused");
        config.stats.server_id = "  ".to_string();

        assert_eq!(reporter().snapshot(&config).await.server_id, "test-host");
    }

    #[tokio::test]
    async fn test_send_posts_snapshot() {
        let (base_url, mut requests) = spawn_stub_backend(200, r#"{"status":"ok"}"#, Duration::ZERO).await;

        let status = reporter().send(&configured(&base_url)).await.unwrap();

        assert_eq!(status, Some(200));
        assert_eq!(requests.recv().await.unwrap(), "POST /ping HTTP/1.1");
    }

    #[tokio::test]
    async fn test_send_skipped_when_disabled_or_unconfigured() {
        let mut disabled = configured("http://unused");
        disabled.stats.enabled = false;
        assert_eq!(assert_ok!(reporter().send(&disabled).await), None);

        assert_eq!(assert_ok!(reporter().send(&GatekeeperConfig::default()).await), None);
    }

    #[tokio::test]
    async fn test_send_reports_error_status() {
        let (base_url, _requests) =
            spawn_stub_backend(400, r#"{"error":"serverId is required"}"#, Duration::ZERO).await;

        let result = reporter().send(&configured(&base_url)).await;
        assert!(matches!(result, Err(DeliveryError::Status(400))));
    }

    #[tokio::test]
    async fn test_tick_swallows_failures() {
        let reporter = reporter();

        let refused = configured(&refused_url().await);
        assert!(matches!(
            reporter.send(&refused).await,
            Err(DeliveryError::Transport(_))
        ));
        reporter.tick(&refused).await;

        let (slow, _requests) = spawn_stub_backend(200, "{}", Duration::from_secs(3)).await;
        reporter.tick(&configured(&slow)).await;

        let (failing, _requests) = spawn_stub_backend(500, "{}", Duration::ZERO).await;
        let mut quiet = configured(&failing);
        quiet.logging.debug = false;
        reporter.tick(&quiet).await;
    }

    #[tokio::test]
    async fn test_spawned_timer_ticks_immediately_and_stops() {
        let (base_url, mut requests) = spawn_stub_backend(200, "{}", Duration::ZERO).await;
        let handle = ConfigHandle::new("unused.toml", configured(&base_url));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = reporter().spawn(handle, shutdown_rx);

        let first = tokio::time::timeout(Duration::from_secs(2), requests.recv()).await;
        assert_eq!(first.unwrap().unwrap(), "POST /ping HTTP/1.1");

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }
}
