// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `devices list|rename|revoke`.

use std::io::Write;
use std::sync::Arc;

use crate::config::{Cli, DevicesCommand};
use crate::credential::devices::{DeviceClient, DeviceInfo};
use crate::credential::refresh::TokenLifecycleManager;
use crate::error::AuthError;

pub async fn run(cli: &Cli, cmd: &DevicesCommand) -> anyhow::Result<()> {
    let store = cli.open_store()?;
    if !store.is_logged_in() {
        return Err(AuthError::NotLoggedIn.into());
    }
    let api_base = cli.api_base(&store);
    let tokens = TokenLifecycleManager::new(&api_base, Arc::clone(&store)).ensure_fresh().await?;
    let client = DeviceClient::new(&api_base, &tokens.access_token);
    let current = store.device().map(|d| d.device_id).unwrap_or_default();

    let mut out = std::io::stdout();
    match cmd {
        DevicesCommand::List => render(&client.list().await?, &current, &mut out)?,
        DevicesCommand::Rename { device_id, name } => {
            client.rename(device_id, name).await?;
            writeln!(out, "Device renamed to {name:?}.")?;
        }
        DevicesCommand::Revoke { device_id } => {
            client.revoke(device_id).await?;
            writeln!(out, "Device {device_id} revoked.")?;
            if *device_id == current {
                store.clear_auth()?;
                writeln!(out, "That was this device; you are now logged out.")?;
            }
        }
    }
    Ok(())
}

/// Print the device table. `current` marks this device when the server
/// does not flag it.
pub fn render(devices: &[DeviceInfo], current: &str, out: &mut dyn Write) -> anyhow::Result<()> {
    if devices.is_empty() {
        writeln!(out, "No devices registered.")?;
        return Ok(());
    }
    writeln!(out, "Devices:")?;
    writeln!(out)?;
    for device in devices {
        let name = if device.name.is_empty() { "(unnamed)" } else { &device.name };
        let mut tags = Vec::new();
        if device.is_current || device.device_id == current {
            tags.push("this device");
        }
        if !device.is_active {
            tags.push("inactive");
        }
        if tags.is_empty() {
            writeln!(out, "  {name}")?;
        } else {
            writeln!(out, "  {name} ({})", tags.join(", "))?;
        }
        writeln!(out, "    ID:          {}", device.device_id)?;
        writeln!(out, "    Platform:    {} {}", device.platform, device.client_version)?;
        if !device.last_active_at.is_empty() {
            writeln!(out, "    Last active: {}", device.last_active_at)?;
        }
        if !device.last_location.is_empty() {
            writeln!(out, "    Location:    {}", device.last_location)?;
        } else if !device.last_ip.is_empty() {
            writeln!(out, "    Last IP:     {}", device.last_ip)?;
        }
        writeln!(out)?;
    }
    writeln!(out, "Total: {} devices", devices.len())?;
    Ok(())
}

#[cfg(test)]
#[path = "devices_tests.rs"]
mod tests;
