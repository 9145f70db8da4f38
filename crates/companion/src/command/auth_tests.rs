// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::credential::persist::PersistedState;
use crate::credential::{DeviceIdentity, TokenSet, ToolServerSpec};

use super::*;

fn render(store: &CredentialStore) -> anyhow::Result<String> {
    let mut out = Vec::new();
    status(store, "wss://example.com/mcp/connect", Path::new("/tmp/companion.json"), &mut out)?;
    Ok(String::from_utf8(out)?)
}

#[test]
fn status_when_logged_out() -> anyhow::Result<()> {
    let text = render(&CredentialStore::in_memory(PersistedState::default()))?;
    assert!(text.contains("Authentication: not logged in"));
    assert!(text.contains("Servers: 0 configured (0 enabled)"));
    assert!(text.contains("Config:  /tmp/companion.json"));
    Ok(())
}

#[test]
fn status_lists_enabled_servers() -> anyhow::Result<()> {
    let mut off = ToolServerSpec::stdio("off", "cat", &[]);
    off.enabled = false;
    let store = CredentialStore::in_memory(PersistedState {
        tokens: Some(TokenSet::expiring_in("at".into(), "rt".into(), 3600)),
        device: Some(DeviceIdentity {
            device_id: "dev-1".into(),
            refresh_token: "rt".into(),
            user_id: "u1".into(),
            user_email: "a@example.com".into(),
        }),
        servers: vec![ToolServerSpec::stdio("fs", "npx", &[]), off],
        ..Default::default()
    });
    let text = render(&store)?;
    assert!(text.contains("Authentication: logged in"));
    assert!(text.contains("User:   a@example.com"));
    assert!(text.contains("Device: dev-1"));
    assert!(text.contains("Servers: 2 configured (1 enabled)"));
    assert!(text.contains("  - fs (stdio)"));
    assert!(!text.contains("  - off"));
    Ok(())
}
