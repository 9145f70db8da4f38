// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `list`, `add`, `remove`, `enable` and `disable`. These edit the stored
//! server list; a running daemon picks changes up on its next start.

use std::io::Write;

use crate::config::AddArgs;
use crate::credential::store::CredentialStore;
use crate::credential::{ToolServerSpec, TransportType};

pub fn list(store: &CredentialStore, out: &mut dyn Write) -> anyhow::Result<()> {
    let servers = store.servers();
    if servers.is_empty() {
        writeln!(out, "No MCP servers configured.")?;
        writeln!(out, "Add one with: companion add <name> --command <program>")?;
        return Ok(());
    }

    writeln!(out, "Configured MCP servers:")?;
    writeln!(out)?;
    for (i, spec) in servers.iter().enumerate() {
        let status = if spec.enabled { "enabled" } else { "disabled" };
        writeln!(out, "{}. {} [{status}]", i + 1, spec.name)?;
        writeln!(out, "   Type: {}", spec.transport_type)?;
        if let Some(program) = spec.program() {
            let line = std::iter::once(program)
                .chain(spec.args.iter().map(String::as_str))
                .collect::<Vec<_>>()
                .join(" ");
            writeln!(out, "   Command: {line}")?;
        }
        if !spec.url.is_empty() {
            writeln!(out, "   URL: {}", spec.url)?;
        }
        if !spec.description.is_empty() {
            writeln!(out, "   Description: {}", spec.description)?;
        }
        writeln!(out)?;
    }
    let enabled = servers.iter().filter(|s| s.enabled).count();
    writeln!(out, "Total: {} servers ({enabled} enabled)", servers.len())?;
    Ok(())
}

/// Validate `args` into a spec.
pub fn spec_from_args(args: &AddArgs) -> anyhow::Result<ToolServerSpec> {
    let transport_type: TransportType = args.transport.parse()?;
    let command = args.command.clone().unwrap_or_default();
    let url = args.url.clone().unwrap_or_default();
    match transport_type {
        TransportType::Stdio if command.is_empty() => {
            anyhow::bail!("stdio servers need --command")
        }
        TransportType::Sse if url.is_empty() => anyhow::bail!("sse servers need --url"),
        _ => {}
    }
    if args.name.trim().is_empty() {
        anyhow::bail!("server name must not be empty");
    }
    Ok(ToolServerSpec {
        name: args.name.clone(),
        path: String::new(),
        command,
        args: args.args.clone(),
        url,
        transport_type,
        description: args.description.clone().unwrap_or_default(),
        enabled: !args.disabled,
    })
}

pub fn add(store: &CredentialStore, args: &AddArgs, out: &mut dyn Write) -> anyhow::Result<()> {
    let spec = spec_from_args(args)?;
    let name = spec.name.clone();
    let enabled = spec.enabled;
    store.add_server(spec)?;
    writeln!(out, "Added MCP server: {name}")?;
    if !enabled {
        writeln!(out, "It is disabled; run `companion enable {name}` to use it.")?;
    }
    Ok(())
}

pub fn remove(store: &CredentialStore, name: &str, out: &mut dyn Write) -> anyhow::Result<()> {
    match store.remove_server(name)? {
        Some(_) => {
            writeln!(out, "Removed MCP server: {name}")?;
            Ok(())
        }
        None => anyhow::bail!("server not found: {name}"),
    }
}

pub fn set_enabled(
    store: &CredentialStore,
    name: &str,
    enabled: bool,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    if !store.set_enabled(name, enabled)? {
        anyhow::bail!("server not found: {name}");
    }
    let verb = if enabled { "Enabled" } else { "Disabled" };
    writeln!(out, "{verb} MCP server: {name}")?;
    Ok(())
}

#[cfg(test)]
#[path = "servers_tests.rs"]
mod tests;
