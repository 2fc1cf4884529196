//! Address reputation lookups against the backend's `/check` endpoint
//!
//! A lookup is a single bounded GET. There are no retries and no caching:
//! each call goes to the network and a failure is reported to the caller
//! as a [`QueryError`] straight away.

use crate::config::{ConfigError, GatekeeperConfig, VerdictParsing};
use crate::http::{HttpTransport, Timeouts};
use async_trait::async_trait;
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::Arc;

const FLAGGED_MARKER: &str = "\"isVPN\":true";

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("API base URL not configured")]
    NotConfigured,
    #[error("request timed out: {0}")]
    Timeout(#[source] reqwest::Error),
    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("backend answered with HTTP {0}")]
    Status(u16),
    #[error("unparsable response body: {0}")]
    InvalidBody(String),
}

impl From<reqwest::Error> for QueryError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            QueryError::Timeout(e)
        } else {
            QueryError::Transport(e)
        }
    }
}

impl From<ConfigError> for QueryError {
    fn from(_: ConfigError) -> Self {
        QueryError::NotConfigured
    }
}

/// One outbound lookup, built right before the call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReputationQuery {
    pub base_url: String,
    pub address: IpAddr,
    pub timeouts: Timeouts,
    pub parsing: VerdictParsing,
}

impl ReputationQuery {
    pub fn from_config(address: IpAddr, config: &GatekeeperConfig) -> Result<Self, QueryError> {
        Ok(Self {
            base_url: config.base_url()?.to_string(),
            address,
            timeouts: Timeouts {
                connect: config.connect_timeout(),
                read: config.read_timeout(),
            },
            parsing: config.api.verdict_parsing,
        })
    }

    pub fn url(&self) -> String {
        HttpTransport::endpoint(&self.base_url, &format!("check/{}", self.address))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReputationResult {
    pub flagged: bool,
    /// Raw response body, kept for diagnostics
    pub body: String,
}

#[derive(Debug, Deserialize)]
struct CheckResponse {
    #[serde(rename = "isVPN")]
    is_vpn: bool,
}

impl ReputationResult {
    pub fn parse(body: String, parsing: VerdictParsing) -> Result<Self, QueryError> {
        let flagged = match parsing {
            VerdictParsing::Strict => {
                let response: CheckResponse = serde_json::from_str(&body)
                    .map_err(|e| QueryError::InvalidBody(e.to_string()))?;
                response.is_vpn
            }
            VerdictParsing::Substring => body.contains(FLAGGED_MARKER),
        };
        Ok(Self { flagged, body })
    }
}

/// Anything that can classify an address; the seam admission decisions
/// and operator checks are written against.
#[async_trait]
pub trait ReputationLookup: Send + Sync {
    async fn query(&self, query: &ReputationQuery) -> Result<ReputationResult, QueryError>;
}

/// The HTTP implementation of [`ReputationLookup`]
#[derive(Debug, Clone)]
pub struct ReputationClient {
    transport: Arc<HttpTransport>,
}

impl ReputationClient {
    pub fn new(transport: Arc<HttpTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl ReputationLookup for ReputationClient {
    async fn query(&self, query: &ReputationQuery) -> Result<ReputationResult, QueryError> {
        let client = self.transport.client(query.timeouts)?;
        let response = client.get(query.url()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(QueryError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        ReputationResult::parse(body, query.parsing)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio_test::assert_err;

    /// Serves `status`/`body` to every connection after `delay`, returning
    /// the base URL and a receiver yielding each request line.
    pub(crate) async fn spawn_stub_backend(
        status: u16,
        body: &'static str,
        delay: Duration,
    ) -> (String, tokio::sync::mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let tx = tx.clone();
                tokio::spawn(async move {
                    let request = read_request(&mut stream).await;
                    let _ = tx.send(request.lines().next().unwrap_or_default().to_string());

                    tokio::time::sleep(delay).await;
                    let response = format!(
                        "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status,
                        body.len(),
                        body
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        (format!("http://{}", addr), rx)
    }

    /// Reads headers and any body announced by Content-Length
    async fn read_request(stream: &mut tokio::net::TcpStream) -> String {
        let mut raw = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let len = stream.read(&mut buf).await.unwrap_or(0);
            if len == 0 {
                break;
            }
            raw.extend_from_slice(&buf[..len]);

            let text = String::from_utf8_lossy(&raw);
            if let Some(end) = text.find("\r\n\r\n") {
                let body_len = text[..end]
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if raw.len() >= end + 4 + body_len {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&raw).to_string()
    }

    fn query_for(base_url: &str, parsing: VerdictParsing) -> ReputationQuery {
        ReputationQuery {
            base_url: base_url.to_string(),
            address: IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7)),
            timeouts: Timeouts {
                connect: Duration::from_millis(500),
                read: Duration::from_millis(500),
            },
            parsing,
        }
    }

    fn client() -> ReputationClient {
        ReputationClient::new(Arc::new(HttpTransport::new()))
    }

    #[test]
    fn test_strict_parsing() {
        let flagged =
            ReputationResult::parse(r#"{"ip":"1.2.3.4","isVPN":true}"#.into(), VerdictParsing::Strict)
                .unwrap();
        assert!(flagged.flagged);

        let clean = ReputationResult::parse(
            r#"{ "ip": "1.2.3.4", "isVPN": false }"#.into(),
            VerdictParsing::Strict,
        )
        .unwrap();
        assert!(!clean.flagged);
    }

    #[test]
    fn test_strict_parsing_ignores_marker_in_other_fields() {
        let body = r#"{"isVPN":false,"note":{"isVPN":true}}"#;

        let strict = ReputationResult::parse(body.into(), VerdictParsing::Strict).unwrap();
        assert!(!strict.flagged);

        let substring = ReputationResult::parse(body.into(), VerdictParsing::Substring).unwrap();
        assert!(substring.flagged);
    }

    #[test]
    fn test_strict_parsing_rejects_garbage() {
        assert!(matches!(
            ReputationResult::parse("<html>oops</html>".into(), VerdictParsing::Strict),
            Err(QueryError::InvalidBody(_))
        ));
        assert!(matches!(
            ReputationResult::parse(r#"{"ip":"1.2.3.4"}"#.into(), VerdictParsing::Strict),
            Err(QueryError::InvalidBody(_))
        ));
    }

    #[test]
    fn test_substring_parsing_never_fails() {
        let result =
            ReputationResult::parse("<html>oops</html>".into(), VerdictParsing::Substring).unwrap();
        assert!(!result.flagged);
        assert_eq!(result.body, "<html>oops</html>");
    }

    #[test]
    fn test_query_from_config() {
        let mut config = GatekeeperConfig::default();
        let address = IpAddr::V4(Ipv4Addr::new(198, 51, 100, 1));
        assert!(matches!(
            ReputationQuery::from_config(address, &config),
            Err(QueryError::NotConfigured)
        ));

        config.api.base_url = "https://vpn.example.com/".to_string();
        config.api.connect_timeout_ms = 1234;
        let query = ReputationQuery::from_config(address, &config).unwrap();
        assert_eq!(query.url(), "https://vpn.example.com/check/198.51.100.1");
        assert_eq!(query.timeouts.connect, Duration::from_millis(1234));
        assert_eq!(query.timeouts.read, Duration::from_millis(5000));
    }

    #[test]
    fn test_ipv6_url() {
        let mut query = query_for("http://h", VerdictParsing::Strict);
        query.address = "2001:db8::1".parse().unwrap();
        assert_eq!(query.url(), "http://h/check/2001:db8::1");
    }

    #[tokio::test]
    async fn test_query_flagged_address() {
        let (base_url, mut requests) =
            spawn_stub_backend(200, r#"{"ip":"203.0.113.7","isVPN":true}"#, Duration::ZERO).await;

        let result = client()
            .query(&query_for(&base_url, VerdictParsing::Strict))
            .await
            .unwrap();

        assert!(result.flagged);
        assert_eq!(
            requests.recv().await.unwrap(),
            "GET /check/203.0.113.7 HTTP/1.1"
        );
    }

    #[tokio::test]
    async fn test_query_clean_address() {
        let (base_url, _requests) =
            spawn_stub_backend(200, r#"{"ip":"203.0.113.7","isVPN":false}"#, Duration::ZERO).await;

        let result = client()
            .query(&query_for(&base_url, VerdictParsing::Strict))
            .await
            .unwrap();
        assert!(!result.flagged);
    }

    #[tokio::test]
    async fn test_query_error_status() {
        let (base_url, _requests) =
            spawn_stub_backend(503, r#"{"error":"Service not initialized"}"#, Duration::ZERO).await;

        let result = client()
            .query(&query_for(&base_url, VerdictParsing::Substring))
            .await;
        assert!(matches!(result, Err(QueryError::Status(503))));
    }

    #[tokio::test]
    async fn test_query_read_timeout() {
        let (base_url, _requests) =
            spawn_stub_backend(200, r#"{"isVPN":true}"#, Duration::from_secs(5)).await;

        let started = std::time::Instant::now();
        let result = client()
            .query(&query_for(&base_url, VerdictParsing::Strict))
            .await;

        assert_err!(&result);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_query_connection_refused() {
        // Bind then drop to get a port nothing listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = client()
            .query(&query_for(&format!("http://{}", addr), VerdictParsing::Strict))
            .await;
        assert!(matches!(result, Err(QueryError::Transport(_))));
    }
}
