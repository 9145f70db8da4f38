// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `string_replace`: targeted single-occurrence edits.

use std::fmt::Write as _;

use anyhow::Context;
use serde_json::{json, Value};

use super::fs::{number_lines, MAX_FILE_BYTES};
use super::{required_str, CoreTool};
use crate::mcp::transport::BoxFuture;

/// Files longer than this are echoed back as a head and a tail.
const READBACK_THRESHOLD_LINES: usize = 500;
const READBACK_HEAD_LINES: usize = 100;
const READBACK_TAIL_LINES: usize = 50;

pub struct StringReplace;

impl CoreTool for StringReplace {
    fn name(&self) -> &'static str {
        "string_replace"
    }

    fn description(&self) -> &'static str {
        "Edit an existing file by replacing one exact string with another. old_string must \
         occur exactly once: zero matches usually means the file changed (read it again), \
         several matches need more surrounding context. An empty new_string deletes the \
         match. Returns the updated file with line numbers."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Absolute path to the file to edit." },
                "old_string": { "type": "string", "description": "Exact text to replace. Must occur once." },
                "new_string": { "type": "string", "description": "Replacement text." },
            },
            "required": ["path", "old_string", "new_string"],
        })
    }

    fn execute<'a>(&'a self, args: &'a Value) -> BoxFuture<'a, anyhow::Result<String>> {
        Box::pin(async move {
            let path = required_str(args, "path")?;
            let old = required_str(args, "old_string")?;
            let new = args.get("new_string").and_then(Value::as_str).unwrap_or_default();

            let meta = tokio::fs::metadata(path)
                .await
                .with_context(|| format!("cannot access file {path}"))?;
            if meta.len() > MAX_FILE_BYTES {
                anyhow::bail!("file too large ({} bytes, max {MAX_FILE_BYTES})", meta.len());
            }
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read {path}"))?;

            let edit = replace_once(&content, old, new)?;
            tokio::fs::write(path, &edit.content)
                .await
                .with_context(|| format!("failed to write {path}"))?;
            Ok(edit.report(path))
        })
    }
}

/// A successful replacement and where it landed.
#[derive(Debug, PartialEq, Eq)]
pub struct Replaced {
    pub content: String,
    /// First line of the match, 1-based.
    pub start_line: usize,
    pub old_end_line: usize,
    pub new_end_line: usize,
}

/// Replace the single occurrence of `old` in `content`.
pub fn replace_once(content: &str, old: &str, new: &str) -> anyhow::Result<Replaced> {
    let mut matches = content.match_indices(old);
    let Some((at, _)) = matches.next() else {
        anyhow::bail!(
            "old_string not found in file; it may have changed since it was read, \
             use read_file to see the current content"
        );
    };
    let extra = matches.count();
    if extra > 0 {
        anyhow::bail!(
            "old_string appears {} times in file (must be unique); \
             include more surrounding context",
            extra + 1
        );
    }

    let start_line = content[..at].matches('\n').count() + 1;
    let mut replaced = String::with_capacity(content.len() + new.len());
    replaced.push_str(&content[..at]);
    replaced.push_str(new);
    replaced.push_str(&content[at + old.len()..]);
    Ok(Replaced {
        content: replaced,
        start_line,
        old_end_line: start_line + old.matches('\n').count(),
        new_end_line: start_line + new.matches('\n').count(),
    })
}

impl Replaced {
    fn report(&self, path: &str) -> String {
        let lines: Vec<&str> = self.content.lines().collect();
        let total = lines.len();
        let mut out = format!(
            "Replaced content at lines {}-{} (now lines {}-{}) in {path} ({total} total lines)\n\n",
            self.start_line, self.old_end_line, self.start_line, self.new_end_line
        );
        if total > READBACK_THRESHOLD_LINES {
            out.push_str(&number_lines(&lines, 1, READBACK_HEAD_LINES));
            let tail_start = total - READBACK_TAIL_LINES + 1;
            let omitted = tail_start - READBACK_HEAD_LINES - 1;
            let _ = write!(out, "\n... ({omitted} lines omitted) ...\n\n");
            out.push_str(&number_lines(&lines, tail_start, total));
        } else if total > 0 {
            out.push_str(&number_lines(&lines, 1, total));
        }
        out
    }
}

#[cfg(test)]
#[path = "edit_tests.rs"]
mod tests;
