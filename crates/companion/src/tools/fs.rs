// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Filesystem tools: `read_file`, `write_file`, `list_directory`.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_json::{json, Value};

use super::{optional_bool, optional_str, optional_u64, required_str, CoreTool, IGNORED_DIRS};
use crate::mcp::transport::BoxFuture;

/// Largest file `read_file` and `write_file` will handle.
pub const MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;
/// Files longer than this return a preview unless a range is requested.
const PREVIEW_THRESHOLD_LINES: usize = 300;
const PREVIEW_LINES: usize = 50;
const DEFAULT_RANGE_LINES: usize = 2000;
const MAX_LINE_CHARS: usize = 2000;
const MAX_LIST_ENTRIES: usize = 500;
const MAX_LIST_DEPTH: u64 = 10;

// ── read_file ───────────────────────────────────────────────────────────

pub struct ReadFile;

impl CoreTool for ReadFile {
    fn name(&self) -> &'static str {
        "read_file"
    }

    fn description(&self) -> &'static str {
        "Read a text file from the local filesystem and return it with line numbers. \
         Files over 300 lines return a 50-line preview unless start_line/end_line is given. \
         Max file size is 10MB; lines over 2000 characters are truncated."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Absolute path to the file to read." },
                "start_line": { "type": "integer", "description": "First line to read (1-based)." },
                "end_line": { "type": "integer", "description": "Last line to read (inclusive)." },
            },
            "required": ["path"],
        })
    }

    fn execute<'a>(&'a self, args: &'a Value) -> BoxFuture<'a, anyhow::Result<String>> {
        Box::pin(async move {
            let path = required_str(args, "path")?;
            let meta = tokio::fs::metadata(path)
                .await
                .with_context(|| format!("cannot access file {path}"))?;
            if meta.is_dir() {
                anyhow::bail!("{path} is a directory, not a file; use list_directory instead");
            }
            if meta.len() > MAX_FILE_BYTES {
                anyhow::bail!("file too large ({} bytes, max {MAX_FILE_BYTES})", meta.len());
            }

            let bytes =
                tokio::fs::read(path).await.with_context(|| format!("failed to read {path}"))?;
            let content = String::from_utf8_lossy(&bytes);
            let lines: Vec<&str> = content.lines().collect();
            if lines.is_empty() {
                return Ok("(empty file)".to_owned());
            }

            let start = optional_u64(args, "start_line").map_or(1, |n| n.max(1) as usize);
            let end = optional_u64(args, "end_line").map(|n| n as usize);

            if end.is_none() && start == 1 && lines.len() > PREVIEW_THRESHOLD_LINES {
                return Ok(format!(
                    "File: {path} ({} lines, {} bytes)\n\n\
                     This file is large; pass start_line and end_line to read a section.\n\
                     Showing the first {PREVIEW_LINES} lines:\n\n{}",
                    lines.len(),
                    meta.len(),
                    number_lines(&lines, 1, PREVIEW_LINES)
                ));
            }

            let end = end
                .unwrap_or(start.saturating_add(DEFAULT_RANGE_LINES - 1))
                .min(lines.len());
            if start > lines.len() || start > end {
                return Ok(format!("(no content at line {start}, file has {} lines)", lines.len()));
            }
            Ok(format!(
                "File: {path} (lines {start}-{end} of {})\n\n{}",
                lines.len(),
                number_lines(&lines, start, end)
            ))
        })
    }
}

/// Format lines `start..=end` (1-based) as `%6d\t<line>`.
pub fn number_lines(lines: &[&str], start: usize, end: usize) -> String {
    let mut out = String::new();
    let range = lines.iter().enumerate().skip(start.saturating_sub(1)).take(end + 1 - start);
    for (idx, line) in range {
        if line.chars().count() > MAX_LINE_CHARS {
            let cut: String = line.chars().take(MAX_LINE_CHARS).collect();
            let _ = writeln!(out, "{:6}\t{cut}...", idx + 1);
        } else {
            let _ = writeln!(out, "{:6}\t{line}", idx + 1);
        }
    }
    out
}

// ── write_file ──────────────────────────────────────────────────────────

pub struct WriteFile;

impl CoreTool for WriteFile {
    fn name(&self) -> &'static str {
        "write_file"
    }

    fn description(&self) -> &'static str {
        "Create or overwrite a file on the local filesystem. Missing parent directories \
         are created. Max content size is 10MB."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Absolute path to the file to write." },
                "content": { "type": "string", "description": "The content to write." },
            },
            "required": ["path", "content"],
        })
    }

    fn execute<'a>(&'a self, args: &'a Value) -> BoxFuture<'a, anyhow::Result<String>> {
        Box::pin(async move {
            let path = required_str(args, "path")?;
            let content = args
                .get("content")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow::anyhow!("content is required"))?;
            if content.len() as u64 > MAX_FILE_BYTES {
                anyhow::bail!("content too large ({} bytes, max {MAX_FILE_BYTES})", content.len());
            }

            if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("failed to create directory {}", parent.display()))?;
            }
            tokio::fs::write(path, content)
                .await
                .with_context(|| format!("failed to write {path}"))?;

            Ok(format!(
                "Successfully wrote {} bytes to {path} ({} lines)",
                content.len(),
                content.lines().count()
            ))
        })
    }
}

// ── list_directory ──────────────────────────────────────────────────────

pub struct ListDirectory;

impl CoreTool for ListDirectory {
    fn name(&self) -> &'static str {
        "list_directory"
    }

    fn description(&self) -> &'static str {
        "List a directory on the local filesystem: directories first, then files with sizes. \
         recursive=true shows a tree (default depth 3, max 10, capped at 500 entries) and \
         skips dependency and build directories. Hidden entries need show_hidden=true."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory to list. Defaults to the working directory." },
                "recursive": { "type": "boolean", "description": "List recursively." },
                "max_depth": { "type": "integer", "description": "Depth for recursive listings. Defaults to 3." },
                "show_hidden": { "type": "boolean", "description": "Include entries starting with '.'." },
            },
            "required": [],
        })
    }

    fn execute<'a>(&'a self, args: &'a Value) -> BoxFuture<'a, anyhow::Result<String>> {
        Box::pin(async move {
            let path = PathBuf::from(optional_str(args, "path").unwrap_or("."));
            let recursive = optional_bool(args, "recursive");
            let depth = optional_u64(args, "max_depth").unwrap_or(3).min(MAX_LIST_DEPTH) as usize;
            let show_hidden = optional_bool(args, "show_hidden");

            tokio::task::spawn_blocking(move || {
                let meta = std::fs::metadata(&path)
                    .with_context(|| format!("cannot access path {}", path.display()))?;
                if !meta.is_dir() {
                    anyhow::bail!("{} is not a directory", path.display());
                }
                let abs = std::path::absolute(&path).unwrap_or(path);
                if recursive {
                    list_tree(&abs, depth, show_hidden)
                } else {
                    list_flat(&abs, show_hidden)
                }
            })
            .await?
        })
    }
}

struct Entry {
    name: String,
    is_dir: bool,
    size: u64,
}

fn read_entries(dir: &Path, show_hidden: bool) -> anyhow::Result<Vec<Entry>> {
    let mut entries = Vec::new();
    let listing =
        std::fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;
    for entry in listing {
        let Ok(entry) = entry else { continue };
        let name = entry.file_name().to_string_lossy().into_owned();
        if !show_hidden && name.starts_with('.') {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        entries.push(Entry { name, is_dir: meta.is_dir(), size: meta.len() });
    }
    entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));
    Ok(entries)
}

fn list_flat(dir: &Path, show_hidden: bool) -> anyhow::Result<String> {
    let entries = read_entries(dir, show_hidden)?;
    let dirs = entries.iter().filter(|e| e.is_dir).count();
    let mut out = format!(
        "Directory: {} ({dirs} directories, {} files)\n\n",
        dir.display(),
        entries.len() - dirs
    );
    for e in &entries {
        if e.is_dir {
            let _ = writeln!(out, "  {}/", e.name);
        } else {
            let _ = writeln!(out, "  {} ({})", e.name, format_size(e.size));
        }
    }
    Ok(out)
}

fn list_tree(root: &Path, max_depth: usize, show_hidden: bool) -> anyhow::Result<String> {
    let mut out = format!("Directory tree: {} (max depth {max_depth})\n\n", root.display());
    let mut count = 0;
    walk(root, 0, max_depth, show_hidden, &mut count, &mut out);
    if count >= MAX_LIST_ENTRIES {
        let _ = write!(out, "\n... (output capped at {MAX_LIST_ENTRIES} entries)");
    }
    Ok(out)
}

fn walk(
    dir: &Path,
    depth: usize,
    max_depth: usize,
    show_hidden: bool,
    count: &mut usize,
    out: &mut String,
) {
    // Unreadable subdirectories are skipped.
    let Ok(entries) = read_entries(dir, show_hidden) else { return };
    let indent = "  ".repeat(depth);
    for e in entries {
        if *count >= MAX_LIST_ENTRIES {
            return;
        }
        if e.is_dir && IGNORED_DIRS.contains(&e.name.as_str()) {
            continue;
        }
        *count += 1;
        if e.is_dir {
            let _ = writeln!(out, "{indent}{}/", e.name);
            if depth < max_depth {
                walk(&dir.join(&e.name), depth + 1, max_depth, show_hidden, count, out);
            }
        } else {
            let _ = writeln!(out, "{indent}{} ({})", e.name, format_size(e.size));
        }
    }
}

pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    match bytes {
        b if b >= MB => format!("{:.1}MB", b as f64 / MB as f64),
        b if b >= KB => format!("{:.1}KB", b as f64 / KB as f64),
        b => format!("{b}B"),
    }
}

#[cfg(test)]
#[path = "fs_tests.rs"]
mod tests;
