// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed errors for the seams where callers branch on the failure kind.

use thiserror::Error;

/// Exit code for clean shutdown.
pub const EXIT_OK: i32 = 0;
/// Exit code for runtime failures.
pub const EXIT_FAILURE: i32 = 1;
/// Exit code when authentication is missing or cannot be recovered.
pub const EXIT_AUTH: i32 = 2;

/// Authentication failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("device code expired before authorization completed; run `companion login` again")]
    Expired,
    #[error("authorization was denied; run `companion login` to try again")]
    Denied,
    #[error("authorization failed: {0}")]
    Failed(String),
    #[error("access token expired and no refresh token is available; run `companion login`")]
    TokenExpired,
    #[error("device has been revoked, please log in again with `companion login`")]
    DeviceRevoked,
    #[error("not logged in; run `companion login`")]
    NotLoggedIn,
    #[error("auth request failed: {0}")]
    Network(String),
}

impl AuthError {
    /// True when retrying cannot succeed without user action.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Network(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Expired => "EXPIRED_TOKEN",
            Self::Denied => "ACCESS_DENIED",
            Self::Failed(_) => "AUTH_FAILED",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::DeviceRevoked => "DEVICE_REVOKED",
            Self::NotLoggedIn => "NOT_LOGGED_IN",
            Self::Network(_) => "NETWORK",
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(e.to_string())
    }
}

/// MCP transport and protocol failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum McpError {
    #[error("io: {0}")]
    Io(String),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("server connection closed")]
    Closed,
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("protocol: {0}")]
    Protocol(String),
}

impl From<std::io::Error> for McpError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for McpError {
    fn from(e: serde_json::Error) -> Self {
        Self::Protocol(e.to_string())
    }
}

impl From<reqwest::Error> for McpError {
    fn from(e: reqwest::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Errors surfaced by the server registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("server not found: {0}")]
    ServerNotFound(String),
    #[error("tool not found: {0}")]
    ToolNotFound(String),
    #[error("tool execution failed: {0}")]
    ExecutionFailed(String),
    #[error("failed to start server {name}: {detail}")]
    StartFailed { name: String, detail: String },
    #[error("startup of server {0} was cancelled")]
    Cancelled(String),
}

/// Failures of a single bridge connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("bridge rejected the access token")]
    Unauthorized,
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("tool registration was not acknowledged within {0:?}")]
    AckTimeout(std::time::Duration),
    #[error("tool registration rejected: {0}")]
    Rejected(String),
    #[error("bridge connection closed")]
    Closed,
    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl BridgeError {
    /// True when the reconnect loop must stop instead of backing off.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Auth(e) if e.is_terminal())
    }
}

/// Map an application error to a process exit code.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    let auth = err.downcast_ref::<AuthError>().or_else(|| match err.downcast_ref::<BridgeError>() {
        Some(BridgeError::Auth(a)) => Some(a),
        _ => None,
    });
    match auth {
        Some(a) if a.is_terminal() => EXIT_AUTH,
        _ => EXIT_FAILURE,
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
