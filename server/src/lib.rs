//! # Gatekeeper
//!
//! Connection-admission gatekeeper for a multiplayer game server. When a
//! client attempts to connect, the gatekeeper asks an external reputation
//! service whether the connecting address is a VPN or proxy and decides
//! whether to admit or reject the connection before any session state is
//! created. A periodic heartbeat reports liveness and usage to the same
//! backend.
//!
//! ## Core Responsibilities
//!
//! ### Admission
//! Every connection attempt yields exactly one [`AdmissionDecision`]. The
//! decision is computed on its own task, never on the server's main loop,
//! and every failure path falls back to Allow unless the operator has opted
//! into fail-closed behaviour with `checks.kick-on-error`.
//!
//! ### Reputation Lookups
//! A single bounded GET against `{base-url}/check/{address}` with separate
//! connect and read timeouts. No retries, no caching.
//!
//! ### Heartbeat
//! A fixed-period POST of a usage snapshot to `{base-url}/ping`. Failures are
//! swallowed, and logged only when `logging.debug` is on.
//!
//! ## Module Organization
//!
//! ### Configuration (`config`)
//! TOML configuration with defaults for every key and a reloadable,
//! snapshot-based handle shared by all operations.
//!
//! ### HTTP Transport (`http`)
//! The `reqwest` client machinery shared by lookups and heartbeats.
//!
//! ### Reputation (`reputation`)
//! The [`reputation::ReputationLookup`] seam and its HTTP implementation.
//!
//! ### Admission (`admission`)
//! The fail-open/fail-closed policy mapping lookups to decisions.
//!
//! ### Heartbeat (`heartbeat`)
//! Snapshot building, delivery and the background timer.
//!
//! ### Context (`context`)
//! The collaborators built once at start-up and handed to everything else.
//!
//! ### Commands (`commands`)
//! Operator `reload` and `check` commands.
//!
//! ### Client Manager / Network (`client_manager`, `network`)
//! The UDP game-session server hosting the gatekeeper: roster, timeouts and
//! the connection handshake where admission is enforced.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use gatekeeper::config::{ConfigHandle, GatekeeperConfig};
//! use gatekeeper::context::GatekeeperContext;
//! use gatekeeper::heartbeat::HeartbeatReporter;
//! use gatekeeper::network::Server;
//! use std::path::Path;
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let path = Path::new("gatekeeper.toml");
//!     let config = GatekeeperConfig::load_or_create(path)?;
//!
//!     let mut server = Server::bind("127.0.0.1:8080", 32).await?;
//!     let ctx = GatekeeperContext::new(ConfigHandle::new(path, config), server.host_info("lobby"));
//!
//!     let (_shutdown_tx, shutdown_rx) = watch::channel(false);
//!     HeartbeatReporter::new(&ctx).spawn(ctx.config.clone(), shutdown_rx.clone());
//!
//!     // Runs until the shutdown signal flips
//!     server.run(&ctx, shutdown_rx).await?;
//!     Ok(())
//! }
//! ```

pub mod admission;
pub mod client_manager;
pub mod commands;
pub mod config;
pub mod context;
pub mod heartbeat;
pub mod http;
pub mod network;
pub mod reputation;

pub use gatekeeper_shared::{AdmissionDecision, ConnectionAttempt, HeartbeatSnapshot};
