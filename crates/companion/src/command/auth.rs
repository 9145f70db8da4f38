// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `login`, `logout` and `status`.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::config::Cli;
use crate::credential::device_code::DeviceAuthenticator;
use crate::credential::devices::DeviceClient;
use crate::credential::oauth;
use crate::credential::store::CredentialStore;

pub async fn login(cli: &Cli) -> anyhow::Result<()> {
    let store = cli.open_store()?;
    let backend_url = cli.backend_url(&store);
    if store.is_logged_in() {
        println!("Already logged in; authorizing this device again.");
    }

    let auth = DeviceAuthenticator::new(&oauth::api_base(&backend_url), Arc::clone(&store))
        .with_browser(!cli.no_browser)
        .login()
        .await?;
    store.set_backend_url(&backend_url)?;

    let device = &auth.device;
    let who = if device.user_email.is_empty() { &device.user_id } else { &device.user_email };
    println!();
    println!("Logged in as {who} (device {}).", device.device_id);
    println!("Run `companion start` to connect.");
    Ok(())
}

/// Revoke this device on the server when possible, then forget the local
/// credentials either way.
pub async fn logout(cli: &Cli) -> anyhow::Result<()> {
    let store = cli.open_store()?;
    let (Some(tokens), Some(device)) = (store.tokens(), store.device()) else {
        store.clear_auth()?;
        println!("Logged out (no device was registered).");
        return Ok(());
    };

    let client = DeviceClient::new(&cli.api_base(&store), &tokens.access_token);
    let revoked = client.revoke(&device.device_id).await;
    store.clear_auth()?;
    match revoked {
        Ok(()) => println!("Logged out and device revoked."),
        Err(e) => {
            debug!(err = %e, "device revoke failed");
            println!("Logged out locally (could not revoke the device: {e}).");
        }
    }
    Ok(())
}

pub fn status(
    store: &CredentialStore,
    backend_url: &str,
    state_path: &Path,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    let state = store.snapshot();
    writeln!(out, "Companion status")?;
    writeln!(out)?;
    match (&state.tokens, &state.device) {
        (Some(tokens), device) if !tokens.access_token.is_empty() => {
            writeln!(out, "Authentication: logged in")?;
            if let Some(device) = device {
                if !device.user_email.is_empty() {
                    writeln!(out, "  User:   {}", device.user_email)?;
                }
                writeln!(out, "  Device: {}", device.device_id)?;
            }
            let remaining = tokens.expires_at.saturating_sub(crate::credential::epoch_secs());
            if remaining == 0 {
                writeln!(out, "  Token:  expired (refreshed on next start)")?;
            } else {
                writeln!(out, "  Token:  valid for {}m", remaining / 60)?;
            }
        }
        _ => {
            writeln!(out, "Authentication: not logged in")?;
            writeln!(out, "  Run `companion login` to authenticate.")?;
        }
    }
    writeln!(out)?;
    writeln!(out, "Backend: {backend_url}")?;

    let enabled: Vec<_> = state.servers.iter().filter(|s| s.enabled).collect();
    writeln!(out, "Servers: {} configured ({} enabled)", state.servers.len(), enabled.len())?;
    for spec in &enabled {
        writeln!(out, "  - {} ({})", spec.name, spec.transport_type)?;
    }
    writeln!(out)?;
    writeln!(out, "Config:  {}", state_path.display())?;
    Ok(())
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
