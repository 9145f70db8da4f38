// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Companion state persistence: load/save to JSON file with atomic writes.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::credential::{DeviceIdentity, TokenSet, ToolServerSpec};

/// File name of the persisted state inside the config directory.
pub const STATE_FILE: &str = "companion.json";

/// Everything the companion keeps across restarts.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceIdentity>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_id: String,
    #[serde(default)]
    pub servers: Vec<ToolServerSpec>,
}

/// Load persisted state. A missing file yields the default state.
pub fn load(path: &Path) -> anyhow::Result<PersistedState> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(PersistedState::default())
        }
        Err(e) => return Err(e.into()),
    };
    let state: PersistedState = serde_json::from_str(&contents)?;
    Ok(state)
}

/// Read-modify-write `path` under an exclusive lock, so concurrent
/// processes sharing one state file each apply their change on top of the
/// other's. Returns the state as written plus `f`'s output. Nothing is
/// written when `f` fails.
pub fn update<R>(
    path: &Path,
    f: impl FnOnce(&mut PersistedState) -> anyhow::Result<R>,
) -> anyhow::Result<(PersistedState, R)> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let _lock = lock_exclusive(path)?;
    let mut state = load(path)?;
    let out = f(&mut state)?;
    save(path, &state)?;
    Ok((state, out))
}

/// Lock a sidecar `<file>.lock`. The state file itself is replaced by
/// rename on every save, so it cannot carry the lock.
#[cfg(unix)]
fn lock_exclusive(path: &Path) -> anyhow::Result<nix::fcntl::Flock<std::fs::File>> {
    use nix::fcntl::{Flock, FlockArg};

    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    let file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path.with_file_name(name))?;
    Flock::lock(file, FlockArg::LockExclusive)
        .map_err(|(_file, errno)| anyhow::anyhow!("flock failed: {errno}"))
}

#[cfg(not(unix))]
fn lock_exclusive(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}

/// Save state to a JSON file atomically (write tmp + rename).
///
/// The temp name carries the PID and a counter so concurrent saves never
/// share a `.tmp` file. On unix the file is created with mode 0600.
pub fn save(path: &Path, state: &PersistedState) -> anyhow::Result<()> {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(state)?;
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_name = format!(
        "{}.{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id(),
        seq,
    );
    let tmp_path = path.with_file_name(tmp_name);
    write_private(&tmp_path, json.as_bytes())?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(unix)]
fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file =
        std::fs::OpenOptions::new().write(true).create(true).truncate(true).mode(0o600).open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(not(unix))]
fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, bytes)
}

#[cfg(test)]
#[path = "persist_tests.rs"]
mod tests;
