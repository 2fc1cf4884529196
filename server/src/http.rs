//! HTTP machinery shared by the reputation client and the heartbeat reporter

use reqwest::Client;
use std::sync::Mutex;
use std::time::Duration;

const USER_AGENT: &str = concat!("gatekeeper/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub read: Duration,
}

/// Hands out `reqwest` clients built for a given pair of timeouts.
///
/// The last client is reused while the timeouts stay the same; a reload
/// that changes them gets a fresh client on the next call.
#[derive(Debug, Default)]
pub struct HttpTransport {
    cached: Mutex<Option<(Timeouts, Client)>>,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client(&self, timeouts: Timeouts) -> Result<Client, reqwest::Error> {
        let mut cached = match self.cached.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some((built_for, client)) = cached.as_ref() {
            if *built_for == timeouts {
                return Ok(client.clone());
            }
        }

        let client = Client::builder()
            .connect_timeout(timeouts.connect)
            .read_timeout(timeouts.read)
            .user_agent(USER_AGENT)
            .build()?;
        *cached = Some((timeouts, client.clone()));
        Ok(client)
    }

    /// Joins `base_url` and `path`, ignoring a trailing `/` on the base.
    pub fn endpoint(base_url: &str, path: &str) -> String {
        format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
