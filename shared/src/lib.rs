use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const PROTOCOL_VERSION: u32 = 1;
pub const COLOR_CHAR: char = '§';
pub const ALT_COLOR_CHAR: char = '&';

const COLOR_CODES: &str = "0123456789AaBbCcDdEeFfKkLlMmNnOoRrXx";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    Connect { client_version: u32, name: String },
    KeepAlive,
    Disconnect,

    Connected { client_id: u32 },
    Disconnected { reason: String },
}

/// One inbound connection request, as seen at the interception point.
///
/// The address is optional: a host that cannot resolve the peer still
/// produces an attempt so the admission path can decide on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionAttempt {
    pub name: String,
    pub address: Option<IpAddr>,
}

impl ConnectionAttempt {
    pub fn new(name: impl Into<String>, address: Option<IpAddr>) -> Self {
        Self {
            name: name.into(),
            address,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    Allow,
    Reject { message: String },
}

impl AdmissionDecision {
    pub fn reject(message: impl Into<String>) -> Self {
        AdmissionDecision::Reject {
            message: message.into(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, AdmissionDecision::Allow)
    }

    pub fn rejection_message(&self) -> Option<&str> {
        match self {
            AdmissionDecision::Allow => None,
            AdmissionDecision::Reject { message } => Some(message),
        }
    }
}

/// Point-in-time usage report posted to the backend's `/ping` endpoint.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatSnapshot {
    pub server_id: String,
    pub timestamp: u64,
    pub online_players: u32,
    pub max_players: u32,
    pub version: String,
}

// Get current timestamp in milliseconds
pub fn get_timestamp() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis();
    (millis.min(u64::MAX as u128)) as u64
}

/// Expands `alt_char` markup (e.g. `&c`) into display color codes (`§c`).
///
/// Only recognised codes are rewritten; any other occurrence of `alt_char`
/// is kept verbatim.
pub fn translate_color_codes(alt_char: char, text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c == alt_char {
            if let Some(&code) = chars.peek() {
                if COLOR_CODES.contains(code) {
                    out.push(COLOR_CHAR);
                    out.push(code.to_ascii_lowercase());
                    chars.next();
                    continue;
                }
            }
        }
        out.push(c);
    }

    out
}

/// Removes display color codes, for surfaces that cannot render them.
pub fn strip_color_codes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c == COLOR_CHAR && chars.peek().is_some_and(|code| COLOR_CODES.contains(*code)) {
            chars.next();
            continue;
        }
        out.push(c);
    }

    out
}
