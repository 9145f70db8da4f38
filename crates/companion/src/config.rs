// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command-line flags and environment, resolved against persisted state.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::credential::persist::STATE_FILE;
use crate::credential::store::CredentialStore;
use crate::credential::{config_dir, oauth};

/// Bridge endpoint used when neither a flag nor a stored value names one.
pub const DEFAULT_BACKEND_URL: &str = "wss://claraverse.app/mcp/connect";

/// Run local MCP tool servers for a remote chat service.
#[derive(Debug, Parser)]
#[command(name = "companion", version, about)]
pub struct Cli {
    /// Bridge WebSocket URL. Overrides the URL saved at login.
    #[arg(long, global = true, env = "COMPANION_BACKEND_URL")]
    pub backend_url: Option<String>,

    /// Directory holding companion.json.
    #[arg(long, global = true, env = "COMPANION_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    /// Log filter (EnvFilter syntax, e.g. `info` or `companion=debug`).
    #[arg(long, global = true, env = "COMPANION_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format (text or json).
    #[arg(long, global = true, env = "COMPANION_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Do not open a browser during login.
    #[arg(long, global = true, env = "COMPANION_NO_BROWSER")]
    pub no_browser: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Authorize this device with your account.
    Login,
    /// Forget the stored tokens and device identity. Servers are kept.
    Logout,
    /// Show login state and configured servers.
    Status,
    /// Start enabled servers and serve tool calls until interrupted.
    Start,
    /// List configured servers.
    List,
    /// Add a tool server.
    Add(AddArgs),
    /// Remove a tool server.
    Remove {
        name: String,
    },
    /// Enable a tool server.
    Enable {
        name: String,
    },
    /// Disable a tool server.
    Disable {
        name: String,
    },
    /// Manage devices registered to your account.
    #[command(subcommand)]
    Devices(DevicesCommand),
}

#[derive(Debug, clap::Args)]
pub struct AddArgs {
    /// Unique server name.
    pub name: String,
    /// Program to launch.
    #[arg(long)]
    pub command: Option<String>,
    /// Program argument; repeat for several.
    #[arg(long = "arg", allow_hyphen_values = true)]
    pub args: Vec<String>,
    /// Transport (stdio or sse).
    #[arg(long = "type", default_value = "stdio")]
    pub transport: String,
    /// Endpoint for sse servers.
    #[arg(long)]
    pub url: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
    /// Save the server without enabling it.
    #[arg(long)]
    pub disabled: bool,
}

#[derive(Debug, Subcommand)]
pub enum DevicesCommand {
    /// List devices.
    List,
    /// Rename a device.
    Rename { device_id: String, name: String },
    /// Revoke a device. It must log in again to reconnect.
    Revoke { device_id: String },
}

impl Cli {
    pub fn config_dir(&self) -> PathBuf {
        self.config_dir.clone().unwrap_or_else(config_dir)
    }

    pub fn state_path(&self) -> PathBuf {
        self.config_dir().join(STATE_FILE)
    }

    pub fn open_store(&self) -> anyhow::Result<Arc<CredentialStore>> {
        CredentialStore::open(self.state_path())
    }

    /// Flag or env first, then the URL saved at login, then the default.
    pub fn backend_url(&self, store: &CredentialStore) -> String {
        self.backend_url
            .clone()
            .or_else(|| store.backend_url())
            .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_owned())
    }

    pub fn api_base(&self, store: &CredentialStore) -> String {
        oauth::api_base(&self.backend_url(store))
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
