//! Operator commands: `gatekeeper reload` and `gatekeeper check <player|ip>`
//!
//! Lines typed on the console are split on whitespace and parsed with clap.
//! Replies are plain text lines for the caller to print.

use crate::context::GatekeeperContext;
use crate::reputation::ReputationQuery;
use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use std::collections::HashSet;
use std::net::IpAddr;

const NO_PERMISSION: &str = "You don't have permission to use this command.";
const CHECK_USAGE: &str = "Usage: /gatekeeper check <player|ip>";

#[derive(Parser, Debug)]
#[command(name = "gatekeeper", disable_help_flag = true, disable_version_flag = true)]
struct OperatorCommand {
    #[command(subcommand)]
    action: Option<Action>,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Reload configuration
    Reload,
    /// Check if a player or IP is a VPN
    Check { target: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    Reload,
    Check,
}

/// Whoever issued a command, with the permissions they hold
#[derive(Debug, Clone)]
pub struct Operator {
    pub name: String,
    permissions: HashSet<Permission>,
}

impl Operator {
    pub fn new(name: impl Into<String>, permissions: impl IntoIterator<Item = Permission>) -> Self {
        Self {
            name: name.into(),
            permissions: permissions.into_iter().collect(),
        }
    }

    /// The server console holds every permission
    pub fn console() -> Self {
        Self::new("CONSOLE", [Permission::Reload, Permission::Check])
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }
}

pub fn help() -> Vec<String> {
    vec![
        "=== Gatekeeper Commands ===".to_string(),
        "/gatekeeper reload - Reload configuration".to_string(),
        "/gatekeeper check <player|ip> - Check if a player or IP is a VPN".to_string(),
    ]
}

#[derive(Clone)]
pub struct CommandHandler {
    ctx: GatekeeperContext,
}

impl CommandHandler {
    pub fn new(ctx: &GatekeeperContext) -> Self {
        Self { ctx: ctx.clone() }
    }

    /// Whether `line` is addressed to the gatekeeper at all
    pub fn accepts(line: &str) -> bool {
        line.split_whitespace()
            .next()
            .map(|word| {
                let word = word.trim_start_matches('/');
                word.eq_ignore_ascii_case("gatekeeper") || word.eq_ignore_ascii_case("vpnblocker")
            })
            .unwrap_or(false)
    }

    pub async fn execute(&self, sender: &Operator, line: &str) -> Vec<String> {
        let mut words: Vec<String> = line.split_whitespace().map(str::to_string).collect();
        if let Some(subcommand) = words.get_mut(1) {
            *subcommand = subcommand.to_lowercase();
        }
        // Words past the ones a subcommand reads are ignored
        match words.get(1).map(String::as_str) {
            Some("reload") => words.truncate(2),
            Some("check") => words.truncate(3),
            _ => {}
        }

        match OperatorCommand::try_parse_from(&words) {
            Ok(OperatorCommand {
                action: Some(Action::Reload),
            }) => self.reload(sender).await,
            Ok(OperatorCommand {
                action: Some(Action::Check { target }),
            }) => self.check(sender, &target).await,
            Ok(OperatorCommand { action: None }) => help(),
            Err(e) if e.kind() == ErrorKind::MissingRequiredArgument => {
                if sender.has_permission(Permission::Check) {
                    vec![CHECK_USAGE.to_string()]
                } else {
                    vec![NO_PERMISSION.to_string()]
                }
            }
            Err(_) => help(),
        }
    }

    async fn reload(&self, sender: &Operator) -> Vec<String> {
        if !sender.has_permission(Permission::Reload) {
            return vec![NO_PERMISSION.to_string()];
        }

        match self.ctx.config.reload().await {
            Ok(_) => vec!["Gatekeeper configuration reloaded successfully.".to_string()],
            Err(e) => vec![format!("Failed to reload configuration: {}", e)],
        }
    }

    async fn check(&self, sender: &Operator, target: &str) -> Vec<String> {
        if !sender.has_permission(Permission::Check) {
            return vec![NO_PERMISSION.to_string()];
        }

        let mut lines = Vec::new();
        let address = match self.ctx.host.player_address(target).await {
            Some(address) => {
                lines.push(format!("Checking player: {}", target));
                address
            }
            None => {
                lines.push(format!("Checking IP: {}", target));
                match target.parse::<IpAddr>() {
                    Ok(address) => address,
                    Err(_) => {
                        lines.push(format!("Check failed: invalid IP address '{}'", target));
                        return lines;
                    }
                }
            }
        };

        let config = self.ctx.config.snapshot().await;
        let outcome = match ReputationQuery::from_config(address, &config) {
            Ok(query) => self.ctx.lookup.query(&query).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(result) if result.flagged => lines.push("Result: VPN/PROXY DETECTED".to_string()),
            Ok(_) => lines.push("Result: Not a VPN".to_string()),
            Err(e) => lines.push(format!("Check failed: {}", e)),
        }
        lines
    }
}
