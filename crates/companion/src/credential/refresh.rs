// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Access token lifecycle: expiry checks and single-flight refresh.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::credential::oauth::{DeviceRefreshRequest, RefreshResponse};
use crate::credential::store::CredentialStore;
use crate::credential::{epoch_secs, DeviceIdentity, TokenSet};
use crate::error::AuthError;

/// Refresh when the token expires within this window.
pub const EXPIRY_BUFFER: Duration = Duration::from_secs(5 * 60);

/// Called with the new token set after every successful refresh.
pub type RefreshListener = Arc<dyn Fn(&TokenSet) + Send + Sync>;

/// Keeps the stored access token fresh.
///
/// Refreshes are serialized on an async mutex. A caller that waited on the
/// mutex re-reads the store first and returns without a network call when
/// the refresh it was waiting on already produced a fresh token.
pub struct TokenLifecycleManager {
    client: reqwest::Client,
    api_base: String,
    store: Arc<CredentialStore>,
    buffer: Duration,
    refresh_lock: tokio::sync::Mutex<()>,
    refreshes: AtomicU64,
    listener: parking_lot::Mutex<Option<RefreshListener>>,
}

impl TokenLifecycleManager {
    pub fn new(api_base: &str, store: Arc<CredentialStore>) -> Self {
        Self {
            client: crate::http_client(Duration::from_secs(30)),
            api_base: api_base.trim_end_matches('/').to_owned(),
            store,
            buffer: EXPIRY_BUFFER,
            refresh_lock: tokio::sync::Mutex::new(()),
            refreshes: AtomicU64::new(0),
            listener: parking_lot::Mutex::new(None),
        }
    }

    pub fn with_expiry_buffer(mut self, buffer: Duration) -> Self {
        self.buffer = buffer;
        self
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn set_refresh_listener(&self, listener: RefreshListener) {
        *self.listener.lock() = Some(listener);
    }

    /// Number of network refreshes performed so far.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    /// True when the stored token is missing or inside the expiry buffer.
    pub fn needs_refresh(&self) -> bool {
        match self.store.tokens() {
            Some(t) => t.needs_refresh(epoch_secs(), self.buffer.as_secs()),
            None => true,
        }
    }

    /// Return a token set that is valid beyond the expiry buffer, refreshing
    /// if needed.
    pub async fn ensure_fresh(&self) -> Result<TokenSet, AuthError> {
        let tokens = self.store.tokens().ok_or(AuthError::NotLoggedIn)?;
        if !tokens.needs_refresh(epoch_secs(), self.buffer.as_secs()) {
            return Ok(tokens);
        }

        let _guard = self.refresh_lock.lock().await;
        let tokens = self.store.tokens().ok_or(AuthError::NotLoggedIn)?;
        if !tokens.needs_refresh(epoch_secs(), self.buffer.as_secs()) {
            debug!("token refreshed by a concurrent caller");
            return Ok(tokens);
        }
        self.refresh_locked(&tokens).await
    }

    /// Refresh regardless of expiry, e.g. after the peer rejected the token.
    ///
    /// If another refresh replaced the rejected token while this call waited,
    /// the replacement is returned as is.
    pub async fn force_refresh(&self) -> Result<TokenSet, AuthError> {
        let rejected = self.store.tokens().ok_or(AuthError::NotLoggedIn)?;

        let _guard = self.refresh_lock.lock().await;
        let current = self.store.tokens().ok_or(AuthError::NotLoggedIn)?;
        if current.access_token != rejected.access_token {
            return Ok(current);
        }
        self.refresh_locked(&current).await
    }

    async fn refresh_locked(&self, tokens: &TokenSet) -> Result<TokenSet, AuthError> {
        let resp = match self.store.device() {
            Some(device) if !device.refresh_token.is_empty() => {
                self.device_refresh(&device).await?
            }
            _ if !tokens.refresh_token.is_empty() => {
                self.legacy_refresh(&tokens.refresh_token).await?
            }
            _ => return Err(AuthError::TokenExpired),
        };

        let refresh_token = if resp.refresh_token.is_empty() {
            tokens.refresh_token.clone()
        } else {
            resp.refresh_token
        };
        let fresh = TokenSet::expiring_in(resp.access_token, refresh_token, resp.expires_in);
        self.store
            .update_tokens(fresh.clone())
            .map_err(|e| AuthError::Failed(format!("failed to save refreshed token: {e:#}")))?;
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        info!(expires_at = fresh.expires_at, "access token refreshed");

        let listener = self.listener.lock().clone();
        if let Some(listener) = listener {
            listener(&fresh);
        }
        Ok(fresh)
    }

    async fn device_refresh(&self, device: &DeviceIdentity) -> Result<RefreshResponse, AuthError> {
        let body = DeviceRefreshRequest {
            refresh_token: device.refresh_token.clone(),
            device_id: device.device_id.clone(),
        };
        let resp = self
            .client
            .post(format!("{}/device/refresh", self.api_base))
            .json(&body)
            .send()
            .await?;
        parse_refresh(resp).await
    }

    async fn legacy_refresh(&self, refresh_token: &str) -> Result<RefreshResponse, AuthError> {
        warn!("no device identity, falling back to legacy token refresh");
        let resp = self
            .client
            .post(format!("{}/auth/refresh", self.api_base))
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await?;
        parse_refresh(resp).await
    }
}

async fn parse_refresh(resp: reqwest::Response) -> Result<RefreshResponse, AuthError> {
    let status = resp.status();
    let text = resp.text().await?;
    let parsed = serde_json::from_str::<RefreshResponse>(&text).unwrap_or_default();

    if !status.is_success() {
        if parsed.error == "invalid_grant" {
            return Err(AuthError::DeviceRevoked);
        }
        if status.is_server_error() {
            return Err(AuthError::Network(format!("refresh failed ({status}): {text}")));
        }
        return Err(AuthError::Failed(format!("refresh failed ({status}): {text}")));
    }
    if parsed.access_token.is_empty() {
        return Err(AuthError::Failed("refresh response did not include an access token".into()));
    }
    Ok(parsed)
}
