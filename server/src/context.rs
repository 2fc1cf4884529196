//! Process-wide collaborators, built once at start-up and handed to the
//! admission controller, heartbeat reporter and operator commands.

use crate::config::ConfigHandle;
use crate::http::HttpTransport;
use crate::reputation::{ReputationClient, ReputationLookup};
use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;

/// What the heartbeat reporter and the `check` command need to know about
/// the game server hosting the gatekeeper.
#[async_trait]
pub trait HostInfo: Send + Sync {
    /// Host name, used as the heartbeat server id when none is configured
    fn name(&self) -> String;
    fn version(&self) -> String;
    async fn online_players(&self) -> u32;
    async fn max_players(&self) -> u32;
    /// Address of a connected player, if one goes by `name`
    async fn player_address(&self, name: &str) -> Option<IpAddr>;
}

#[derive(Clone)]
pub struct GatekeeperContext {
    pub config: ConfigHandle,
    pub transport: Arc<HttpTransport>,
    pub lookup: Arc<dyn ReputationLookup>,
    pub host: Arc<dyn HostInfo>,
}

impl GatekeeperContext {
    /// Context backed by the HTTP reputation client
    pub fn new(config: ConfigHandle, host: Arc<dyn HostInfo>) -> Self {
        let transport = Arc::new(HttpTransport::new());
        let lookup = Arc::new(ReputationClient::new(Arc::clone(&transport)));
        Self {
            config,
            transport,
            lookup,
            host,
        }
    }

    /// Swaps the reputation backend, e.g. for an in-memory stub
    pub fn with_lookup(mut self, lookup: Arc<dyn ReputationLookup>) -> Self {
        self.lookup = lookup;
        self
    }
}
