// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persistent WebSocket link to the cloud peer.
//!
//! [`ConnectionBridge`] registers the tool set, receives `tool_call` frames
//! and answers them with `tool_result` frames. It reconnects on its own with
//! [`Backoff`], refreshing the access token before every attempt.

pub mod backoff;
pub mod connection;
pub mod frame;

use std::time::Duration;

use serde::Serialize;

use crate::error::BridgeError;
use crate::mcp::transport::BoxFuture;

pub use backoff::Backoff;
pub use connection::ConnectionBridge;
pub use frame::{Ack, Registration, ServerCommand, ToolCall, ToolResult};

/// Observable state of the bridge. Only the bridge writes it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    /// Registered and acknowledged by the peer.
    Connected,
    Reconnecting,
    /// Gave up; user action is required.
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timing and endpoint settings for [`ConnectionBridge`].
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// WebSocket endpoint, e.g. `wss://host/mcp/connect`.
    pub url: String,
    pub connect_timeout: Duration,
    /// How long `register_tools` waits for the peer's `ack`.
    pub ack_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub ping_interval: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    /// Bound on flushing queued frames during `close`.
    pub close_timeout: Duration,
}

impl BridgeConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_owned(),
            connect_timeout: Duration::from_secs(15),
            ack_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            ping_interval: Duration::from_secs(45),
            backoff_initial: backoff::BACKOFF_INITIAL,
            backoff_max: backoff::BACKOFF_MAX,
            close_timeout: Duration::from_secs(2),
        }
    }
}

// ── Handlers ────────────────────────────────────────────────────────────

/// Runs one tool call. Each call gets its own task; the handler is
/// responsible for answering with [`ConnectionBridge::send_tool_result`].
pub type ToolCallHandler =
    std::sync::Arc<dyn Fn(ConnectionBridge, ToolCall) -> BoxFuture<'static, ()> + Send + Sync>;

/// Called after every established connection. Must re-register the current
/// tool set; an error tears the connection down and backs off.
pub type ReconnectHandler = std::sync::Arc<
    dyn Fn(ConnectionBridge) -> BoxFuture<'static, Result<(), BridgeError>> + Send + Sync,
>;

/// Called as soon as a connection is lost, before any retry.
pub type DisconnectHandler = std::sync::Arc<dyn Fn() + Send + Sync>;

/// Applies a server command. The bridge answers with `server_command_ack`
/// and, on success, re-registers through the [`ReconnectHandler`].
pub type ServerCommandHandler = std::sync::Arc<
    dyn Fn(ConnectionBridge, ServerCommand) -> BoxFuture<'static, Result<(), String>> + Send + Sync,
>;
