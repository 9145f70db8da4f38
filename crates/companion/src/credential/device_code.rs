// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! OAuth 2.0 Device Authorization Grant (RFC 8628).
//!
//! Polling is split in two: [`PollState`] is a pure `{interval, deadline}`
//! state machine advanced by classified responses, and [`poll_with`] drives
//! it on tokio time. Tests run the driver with paused time and a scripted
//! poll function.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::credential::oauth::{
    self, DeviceCodeRequest, DeviceCodeResponse, DeviceTokenResponse, CLIENT_ID,
};
use crate::credential::store::CredentialStore;
use crate::credential::{DeviceIdentity, TokenSet};
use crate::error::AuthError;

/// RFC 8628 minimum polling interval.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Added to the interval on every `slow_down`.
pub const SLOW_DOWN_INCREMENT: Duration = Duration::from_secs(5);
/// Ceiling for a peer-supplied polling interval.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(300);
/// Ceiling for a peer-supplied device code lifetime.
pub const MAX_CODE_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// A classified device token response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollResponse {
    Pending,
    SlowDown,
    Expired,
    Denied,
    Failed(String),
    Authorized(DeviceTokenResponse),
}

impl PollResponse {
    pub fn classify(mut resp: DeviceTokenResponse) -> Self {
        let error = std::mem::take(&mut resp.error);
        match error.as_str() {
            "" if !resp.access_token.is_empty() => Self::Authorized(resp),
            "" | "authorization_pending" => Self::Pending,
            "slow_down" => Self::SlowDown,
            "expired_token" => Self::Expired,
            "access_denied" => Self::Denied,
            other => {
                let detail = if resp.error_description.is_empty() {
                    other.to_owned()
                } else {
                    resp.error_description
                };
                Self::Failed(detail)
            }
        }
    }
}

/// What the poll loop does next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Continue,
    Authorized(DeviceTokenResponse),
    Failed(AuthError),
}

/// Device-code polling state: the current interval and the code's deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollState {
    interval: Duration,
    deadline: Instant,
    polls: u32,
}

impl PollState {
    pub fn new(interval_secs: u64, expires_in_secs: u64, now: Instant) -> Self {
        let interval =
            Duration::from_secs(interval_secs).clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL);
        let lifetime = Duration::from_secs(expires_in_secs).min(MAX_CODE_LIFETIME);
        Self { interval, deadline: now.checked_add(lifetime).unwrap_or(now), polls: 0 }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Number of responses consumed so far.
    pub fn polls(&self) -> u32 {
        self.polls
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    /// Apply one poll response.
    pub fn advance(&mut self, response: PollResponse) -> PollOutcome {
        self.polls += 1;
        match response {
            PollResponse::Pending => PollOutcome::Continue,
            PollResponse::SlowDown => {
                self.interval = (self.interval + SLOW_DOWN_INCREMENT).min(MAX_POLL_INTERVAL);
                PollOutcome::Continue
            }
            PollResponse::Expired => PollOutcome::Failed(AuthError::Expired),
            PollResponse::Denied => PollOutcome::Failed(AuthError::Denied),
            PollResponse::Failed(detail) => PollOutcome::Failed(AuthError::Failed(detail)),
            PollResponse::Authorized(token) => PollOutcome::Authorized(token),
        }
    }
}

/// Drive `state` until authorization, a terminal error, or the deadline.
///
/// Sleeps one interval before every poll. Network errors are logged and the
/// loop keeps polling until the deadline.
pub async fn poll_with<F, Fut>(
    mut state: PollState,
    mut poll: F,
) -> Result<DeviceTokenResponse, AuthError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<DeviceTokenResponse, AuthError>>,
{
    loop {
        tokio::time::sleep(state.interval()).await;

        if state.is_expired(Instant::now()) {
            return Err(AuthError::Expired);
        }

        let response = match poll().await {
            Ok(resp) => PollResponse::classify(resp),
            Err(AuthError::Network(e)) => {
                debug!(err = %e, "device token poll failed, retrying");
                continue;
            }
            Err(e) => return Err(e),
        };

        match state.advance(response) {
            PollOutcome::Continue => {
                debug!(
                    polls = state.polls(),
                    interval = ?state.interval(),
                    "authorization pending"
                );
            }
            PollOutcome::Authorized(token) => return Ok(token),
            PollOutcome::Failed(e) => return Err(e),
        }
    }
}

/// Result of a completed device authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    pub tokens: TokenSet,
    pub device: DeviceIdentity,
}

impl Authorization {
    pub fn from_response(resp: DeviceTokenResponse) -> Self {
        let user = resp.user.unwrap_or_default();
        Self {
            tokens: TokenSet::expiring_in(
                resp.access_token,
                resp.refresh_token.clone(),
                resp.expires_in,
            ),
            device: DeviceIdentity {
                device_id: resp.device_id,
                refresh_token: resp.refresh_token,
                user_id: user.id,
                user_email: user.email,
            },
        }
    }
}

/// Runs the device authorization grant against the companion API.
pub struct DeviceAuthenticator {
    client: reqwest::Client,
    api_base: String,
    store: Arc<CredentialStore>,
    open_browser: bool,
}

impl DeviceAuthenticator {
    pub fn new(api_base: &str, store: Arc<CredentialStore>) -> Self {
        Self {
            client: crate::http_client(Duration::from_secs(30)),
            api_base: api_base.trim_end_matches('/').to_owned(),
            store,
            open_browser: true,
        }
    }

    /// Whether to try opening the verification page in a browser.
    pub fn with_browser(mut self, open: bool) -> Self {
        self.open_browser = open;
        self
    }

    /// Request a device/user code pair and show it to the user.
    pub async fn begin_authorization(&self) -> Result<DeviceCodeResponse, AuthError> {
        let body = DeviceCodeRequest {
            client_id: CLIENT_ID.to_owned(),
            client_version: oauth::client_version().to_owned(),
            platform: oauth::platform(),
        };
        let resp =
            self.client.post(format!("{}/device/code", self.api_base)).json(&body).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(AuthError::Network(format!(
                "device code request failed ({status}): {text}"
            )));
        }

        let code: DeviceCodeResponse = resp.json().await?;
        if let Err(e) = present(&code, &mut std::io::stdout()) {
            warn!(err = %e, "could not print login instructions");
        }
        if self.open_browser {
            let url = verification_url(&code);
            if let Err(e) = open_browser(url) {
                warn!(err = %e, "could not open browser, visit the URL manually");
            }
        }
        Ok(code)
    }

    /// Poll until the user approves, then persist the result.
    pub async fn poll_until_authorized(
        &self,
        device_code: &str,
        interval: u64,
        expires_in: u64,
    ) -> Result<Authorization, AuthError> {
        let state = PollState::new(interval, expires_in, Instant::now());
        let token = poll_with(state, || self.poll_once(device_code)).await?;
        let auth = Authorization::from_response(token);
        if auth.device.device_id.is_empty() {
            return Err(AuthError::Failed("token response did not include a device id".into()));
        }

        self.store
            .save_authorization(auth.tokens.clone(), auth.device.clone())
            .map_err(|e| AuthError::Failed(format!("failed to save credentials: {e:#}")))?;
        info!(
            device_id = %auth.device.device_id,
            user = %auth.device.user_email,
            "device authorized"
        );
        Ok(auth)
    }

    /// Full login: begin, display, poll, persist.
    pub async fn login(&self) -> Result<Authorization, AuthError> {
        let code = self.begin_authorization().await?;
        self.poll_until_authorized(&code.device_code, code.interval, code.expires_in).await
    }

    async fn poll_once(&self, device_code: &str) -> Result<DeviceTokenResponse, AuthError> {
        let resp = self
            .client
            .get(format!("{}/device/token", self.api_base))
            .query(&[("device_code", device_code), ("client_id", CLIENT_ID)])
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        match serde_json::from_str::<DeviceTokenResponse>(&text) {
            Ok(parsed) => Ok(parsed),
            Err(_) if status.is_server_error() => {
                Err(AuthError::Network(format!("token endpoint returned {status}")))
            }
            Err(e) => Err(AuthError::Failed(format!("invalid token response ({status}): {e}"))),
        }
    }
}

/// The URL the user should visit, preferring the one with the code embedded.
pub fn verification_url(code: &DeviceCodeResponse) -> &str {
    if code.verification_uri_complete.is_empty() {
        &code.verification_uri
    } else {
        &code.verification_uri_complete
    }
}

/// Format an eight-character user code as `ABCD-1234`.
pub fn format_user_code(code: &str) -> String {
    if code.len() == 8 && code.is_ascii() {
        format!("{}-{}", &code[..4], &code[4..])
    } else {
        code.to_owned()
    }
}

/// Write the login instructions for `code`.
pub fn present(code: &DeviceCodeResponse, out: &mut dyn std::io::Write) -> std::io::Result<()> {
    writeln!(out, "To authorize this device, visit:")?;
    writeln!(out)?;
    writeln!(out, "    {}", verification_url(code))?;
    writeln!(out)?;
    writeln!(out, "and confirm the code:")?;
    writeln!(out)?;
    writeln!(out, "    {}", format_user_code(&code.user_code))?;
    writeln!(out)?;
    writeln!(
        out,
        "Waiting for authorization (expires in {}:{:02})...",
        code.expires_in / 60,
        code.expires_in % 60
    )?;
    out.flush()
}

/// Launch the platform browser without waiting for it.
pub fn open_browser(url: &str) -> std::io::Result<()> {
    let mut cmd = if cfg!(target_os = "macos") {
        let mut c = std::process::Command::new("open");
        c.arg(url);
        c
    } else if cfg!(target_os = "windows") {
        let mut c = std::process::Command::new("cmd");
        c.args(["/c", "start", url]);
        c
    } else {
        let mut c = std::process::Command::new("xdg-open");
        c.arg(url);
        c
    };
    let mut child = cmd
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()?;
    // Reap without blocking the caller.
    std::thread::spawn(move || {
        let _ = child.wait();
    });
    Ok(())
}

#[cfg(test)]
#[path = "device_code_tests.rs"]
mod tests;
