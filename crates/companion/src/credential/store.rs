// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process owner of persisted companion state.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::credential::persist::{self, PersistedState};
use crate::credential::{DeviceIdentity, TokenSet, ToolServerSpec};

/// Persisted device identity, token set, and server list.
///
/// Readers get clones. Every mutation is applied to a copy, written to disk,
/// and only then swapped in, so a failed save leaves memory untouched and a
/// token set is never observed half-updated.
///
/// The daemon and CLI commands open the same file from separate processes.
/// A file-backed mutation therefore reloads the file under a lock and
/// applies the change to what is on disk, not to this process's snapshot.
pub struct CredentialStore {
    path: Option<PathBuf>,
    state: RwLock<PersistedState>,
}

impl CredentialStore {
    /// Open the store backed by `path`, loading existing state if present.
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Arc<Self>> {
        let path = path.into();
        let state = persist::load(&path)?;
        Ok(Arc::new(Self { path: Some(path), state: RwLock::new(state) }))
    }

    /// A store that never touches disk.
    pub fn in_memory(state: PersistedState) -> Arc<Self> {
        Arc::new(Self { path: None, state: RwLock::new(state) })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Pick up changes other processes wrote to the backing file.
    pub fn reload(&self) -> anyhow::Result<()> {
        if let Some(ref path) = self.path {
            *self.state.write() = persist::load(path)?;
        }
        Ok(())
    }

    pub fn snapshot(&self) -> PersistedState {
        self.state.read().clone()
    }

    pub fn tokens(&self) -> Option<TokenSet> {
        self.state.read().tokens.clone()
    }

    pub fn device(&self) -> Option<DeviceIdentity> {
        self.state.read().device.clone()
    }

    pub fn backend_url(&self) -> Option<String> {
        self.state.read().backend_url.clone()
    }

    /// True when an access token is present (fresh or not).
    pub fn is_logged_in(&self) -> bool {
        self.state.read().tokens.as_ref().is_some_and(|t| !t.access_token.is_empty())
    }

    pub fn set_backend_url(&self, url: &str) -> anyhow::Result<()> {
        self.mutate(|s| {
            s.backend_url = Some(url.to_owned());
            Ok(())
        })
    }

    /// Replace the token set and device identity wholesale (login).
    pub fn save_authorization(
        &self,
        tokens: TokenSet,
        device: DeviceIdentity,
    ) -> anyhow::Result<()> {
        self.mutate(|s| {
            s.user_id = device.user_id.clone();
            s.tokens = Some(tokens);
            s.device = Some(device);
            Ok(())
        })
    }

    /// Overwrite the token set after a refresh, rotating the device's
    /// refresh token when a new one was issued.
    pub fn update_tokens(&self, tokens: TokenSet) -> anyhow::Result<()> {
        self.mutate(|s| {
            if let Some(device) = s.device.as_mut() {
                if !tokens.refresh_token.is_empty() {
                    device.refresh_token = tokens.refresh_token.clone();
                }
            }
            s.tokens = Some(tokens);
            Ok(())
        })
    }

    /// Forget tokens and device identity. Configured servers are kept.
    pub fn clear_auth(&self) -> anyhow::Result<()> {
        self.mutate(|s| {
            s.tokens = None;
            s.device = None;
            s.user_id.clear();
            Ok(())
        })
    }

    pub fn servers(&self) -> Vec<ToolServerSpec> {
        self.state.read().servers.clone()
    }

    pub fn server(&self, name: &str) -> Option<ToolServerSpec> {
        self.state.read().servers.iter().find(|s| s.name == name).cloned()
    }

    pub fn enabled_servers(&self) -> Vec<ToolServerSpec> {
        self.state.read().servers.iter().filter(|s| s.enabled).cloned().collect()
    }

    /// Append a server spec. Fails if the name is already configured.
    pub fn add_server(&self, spec: ToolServerSpec) -> anyhow::Result<()> {
        self.mutate(|s| {
            if s.servers.iter().any(|existing| existing.name == spec.name) {
                anyhow::bail!("server {} already exists", spec.name);
            }
            s.servers.push(spec);
            Ok(())
        })
    }

    /// Remove a server spec, returning it if it existed.
    pub fn remove_server(&self, name: &str) -> anyhow::Result<Option<ToolServerSpec>> {
        self.mutate(|s| {
            let idx = s.servers.iter().position(|spec| spec.name == name);
            Ok(idx.map(|i| s.servers.remove(i)))
        })
    }

    /// Set a server's enabled flag. Returns false if no such server exists.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> anyhow::Result<bool> {
        self.mutate(|s| match s.servers.iter_mut().find(|spec| spec.name == name) {
            Some(spec) => {
                spec.enabled = enabled;
                Ok(true)
            }
            None => Ok(false),
        })
    }

    fn mutate<R>(
        &self,
        f: impl FnOnce(&mut PersistedState) -> anyhow::Result<R>,
    ) -> anyhow::Result<R> {
        let mut guard = self.state.write();
        let (next, out) = match self.path {
            Some(ref path) => persist::update(path, f)?,
            None => {
                let mut next = guard.clone();
                let out = f(&mut next)?;
                (next, out)
            }
        };
        *guard = next;
        Ok(out)
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
