// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device-grant wire types and URL helpers.

use serde::{Deserialize, Serialize};

/// Client identifier presented to the device authorization endpoints.
pub const CLIENT_ID: &str = "clara_companion";

/// Body of `POST /device/code`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCodeRequest {
    pub client_id: String,
    pub client_version: String,
    pub platform: String,
}

/// RFC 8628 device authorization response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCodeResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    #[serde(default)]
    pub verification_uri_complete: String,
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default = "default_interval")]
    pub interval: u64,
}

fn default_interval() -> u64 {
    5
}

/// User attached to a successful device token response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUser {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub email: String,
}

/// `GET /device/token` response: either a token or an RFC 8628 error.
///
/// Both shapes share one struct since the peer may answer either with any
/// status code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTokenResponse {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub user: Option<TokenUser>,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub error_description: String,
}

/// Body of `POST /device/refresh`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRefreshRequest {
    pub refresh_token: String,
    pub device_id: String,
}

/// Token refresh response shared by the device and legacy endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefreshResponse {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub error_description: String,
}

/// Derive the REST API base from the bridge WebSocket URL.
///
/// `wss://host/mcp/connect` becomes `https://host/api`.
pub fn api_base(backend_url: &str) -> String {
    let mut base = backend_url.trim_end_matches('/');
    for suffix in ["/mcp/connect", "/mcp"] {
        if let Some(stripped) = base.strip_suffix(suffix) {
            base = stripped;
            break;
        }
    }
    let http = if let Some(rest) = base.strip_prefix("wss://") {
        format!("https://{rest}")
    } else if let Some(rest) = base.strip_prefix("ws://") {
        format!("http://{rest}")
    } else {
        base.to_owned()
    };
    format!("{http}/api")
}

/// `<os>/<arch>` string reported to the peer.
pub fn platform() -> String {
    format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH)
}

/// Crate version reported to the peer.
pub fn client_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
#[path = "oauth_tests.rs"]
mod tests;
