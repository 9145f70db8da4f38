// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device identity, tokens, and configured tool servers.
//!
//! [`store::CredentialStore`] is the single owner of persisted state. The
//! device flow ([`device_code`]) creates it, [`refresh`] keeps the token set
//! fresh, and [`devices`] manages the account's other devices.

pub mod device_code;
pub mod devices;
pub mod oauth;
pub mod persist;
pub mod refresh;
pub mod store;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Identity of this device as issued by the device authorization grant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub refresh_token: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub user_email: String,
}

/// Access token plus the refresh token that renews it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub refresh_token: String,
    /// Expiry as epoch seconds. Zero means unknown and is treated as expired.
    #[serde(default)]
    pub expires_at: u64,
}

impl TokenSet {
    /// Build a token set that expires `expires_in` seconds from now.
    pub fn expiring_in(access_token: String, refresh_token: String, expires_in: u64) -> Self {
        Self { access_token, refresh_token, expires_at: epoch_secs().saturating_add(expires_in) }
    }

    /// True when the token expires within `buffer_secs` of `now`.
    pub fn needs_refresh(&self, now: u64, buffer_secs: u64) -> bool {
        self.expires_at == 0 || now.saturating_add(buffer_secs) >= self.expires_at
    }
}

/// How the companion talks to a tool server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    #[default]
    Stdio,
    Sse,
}

impl std::fmt::Display for TransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdio => f.write_str("stdio"),
            Self::Sse => f.write_str("sse"),
        }
    }
}

impl std::str::FromStr for TransportType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stdio" => Ok(Self::Stdio),
            "sse" => Ok(Self::Sse),
            other => anyhow::bail!("invalid transport type: {other}"),
        }
    }
}

/// A user-configured MCP tool server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolServerSpec {
    /// Unique key across the server list.
    pub name: String,
    /// Executable path, used when `command` is empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// SSE endpoint for `sse` servers.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(rename = "type", default)]
    pub transport_type: TransportType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl ToolServerSpec {
    /// A stdio server launched as `command args...`.
    pub fn stdio(name: &str, command: &str, args: &[&str]) -> Self {
        Self {
            name: name.to_owned(),
            path: String::new(),
            command: command.to_owned(),
            args: args.iter().map(|a| (*a).to_owned()).collect(),
            url: String::new(),
            transport_type: TransportType::Stdio,
            description: String::new(),
            enabled: true,
        }
    }

    /// The program to launch: `command`, falling back to `path`.
    pub fn program(&self) -> Option<&str> {
        if !self.command.is_empty() {
            Some(&self.command)
        } else if !self.path.is_empty() {
            Some(&self.path)
        } else {
            None
        }
    }
}

pub fn default_true() -> bool {
    true
}

/// Resolve the configuration directory.
///
/// Checks `COMPANION_CONFIG_DIR`, then `$XDG_CONFIG_HOME/companion`,
/// then `$HOME/.config/companion`.
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("COMPANION_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("companion");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".config/companion");
    }
    PathBuf::from(".companion")
}

/// Current time as epoch seconds.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
