// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

pub mod bridge;
pub mod command;
pub mod config;
pub mod credential;
pub mod daemon;
pub mod error;
pub mod events;
pub mod mcp;
pub mod tools;

use std::sync::Once;
use std::time::Duration;

/// Install the ring crypto provider for rustls once per process. Required
/// before any TLS connection since reqwest and tungstenite are built
/// without a provider.
pub fn install_crypto_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// HTTP client for request/response calls, bounded by `timeout`.
pub fn http_client(timeout: Duration) -> reqwest::Client {
    install_crypto_provider();
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(err = %e, "http client build failed, using defaults");
            reqwest::Client::new()
        })
}

/// HTTP client for long-lived streams: no overall timeout.
pub fn stream_client() -> reqwest::Client {
    install_crypto_provider();
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(err = %e, "stream client build failed, using defaults");
            reqwest::Client::new()
        })
}
