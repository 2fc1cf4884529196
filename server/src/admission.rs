//! Admission decisions for inbound connection attempts
//!
//! `decide` walks a fixed sequence for every attempt:
//! 1. checks disabled → allow
//! 2. no resolved address → allow (warning)
//! 3. no backend URL → allow (warning)
//! 4. query the reputation backend
//!    - flagged and kicking enabled → reject with the flagged message
//!    - query failed, fail-closed and kicking enabled → reject with the error message
//!    - anything else → allow
//!
//! Every path ends in exactly one decision and nothing escapes as an error.

use crate::config::GatekeeperConfig;
use crate::context::GatekeeperContext;
use crate::reputation::{ReputationLookup, ReputationQuery};
use gatekeeper_shared::{translate_color_codes, AdmissionDecision, ConnectionAttempt, ALT_COLOR_CHAR};
use log::{debug, warn};
use std::sync::Arc;

#[derive(Clone)]
pub struct AdmissionController {
    lookup: Arc<dyn ReputationLookup>,
}

impl AdmissionController {
    pub fn new(ctx: &GatekeeperContext) -> Self {
        Self {
            lookup: Arc::clone(&ctx.lookup),
        }
    }

    pub async fn decide(
        &self,
        attempt: &ConnectionAttempt,
        config: &GatekeeperConfig,
    ) -> AdmissionDecision {
        if !config.checks_enabled() {
            return AdmissionDecision::Allow;
        }

        let Some(address) = attempt.address else {
            warn!("Could not resolve IP for {}", attempt.name);
            return AdmissionDecision::Allow;
        };

        let query = match ReputationQuery::from_config(address, config) {
            Ok(query) => query,
            Err(_) => {
                warn!("api.base-url is not configured, admitting {} unchecked", attempt.name);
                return AdmissionDecision::Allow;
            }
        };

        match self.lookup.query(&query).await {
            Ok(result) => {
                if config.logging.debug {
                    debug!("VPN check for {} ({}) -> {}", attempt.name, address, result.body);
                }

                if result.flagged && config.kick.enabled {
                    reject_with(&config.kick_message())
                } else {
                    AdmissionDecision::Allow
                }
            }
            Err(e) => {
                warn!("VPN check failed for IP {} ({}): {}", address, attempt.name, e);

                if config.checks.kick_on_error && config.kick.enabled {
                    reject_with(&config.kick_error_message())
                } else {
                    AdmissionDecision::Allow
                }
            }
        }
    }
}

fn reject_with(message: &str) -> AdmissionDecision {
    AdmissionDecision::reject(translate_color_codes(ALT_COLOR_CHAR, message))
}
