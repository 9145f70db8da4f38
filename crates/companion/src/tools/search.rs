// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Search tools: `find_files` (by name) and `grep` (by content).
//!
//! Both walk the tree in-process and skip [`IGNORED_DIRS`].

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::Context;
use globset::{Glob, GlobMatcher};
use regex::{Regex, RegexBuilder};
use serde_json::{json, Value};
use walkdir::{DirEntry, WalkDir};

use super::fs::{format_size, MAX_FILE_BYTES};
use super::{optional_str, optional_u64, required_str, CoreTool, IGNORED_DIRS};
use crate::mcp::transport::BoxFuture;

const FIND_DEFAULT_RESULTS: u64 = 50;
const FIND_MAX_RESULTS: u64 = 200;
const GREP_DEFAULT_RESULTS: u64 = 30;
const GREP_MAX_RESULTS: u64 = 100;
/// Matched line content beyond this many characters is cut.
const GREP_LINE_CHARS: usize = 250;

/// Every file under `root`, ignored directories pruned, in name order.
fn walk_files(root: &Path) -> impl Iterator<Item = DirEntry> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_ignored_dir(e))
        // Unreadable entries are skipped.
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
}

fn is_ignored_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry.file_name().to_str().is_some_and(|name| IGNORED_DIRS.contains(&name))
}

fn glob_matcher(pattern: &str) -> anyhow::Result<GlobMatcher> {
    let glob = Glob::new(pattern).with_context(|| format!("invalid glob pattern {pattern:?}"))?;
    Ok(glob.compile_matcher())
}

fn matches_name(matcher: &GlobMatcher, entry: &DirEntry) -> bool {
    matcher.is_match(Path::new(entry.file_name()))
}

// ── find_files ──────────────────────────────────────────────────────────

pub struct FindFiles;

struct Found {
    path: PathBuf,
    size: u64,
    modified: SystemTime,
}

/// Files under `root` whose name matches `pattern`, newest first, plus how
/// many files were scanned.
pub fn find_files(root: &Path, pattern: &str) -> anyhow::Result<(Vec<(PathBuf, u64)>, usize)> {
    let matcher = glob_matcher(pattern)?;
    let mut scanned = 0;
    let mut found = Vec::new();
    for entry in walk_files(root) {
        scanned += 1;
        if !matches_name(&matcher, &entry) {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        found.push(Found {
            size: meta.len(),
            modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            path: entry.into_path(),
        });
    }
    found.sort_by(|a, b| b.modified.cmp(&a.modified));
    Ok((found.into_iter().map(|f| (f.path, f.size)).collect(), scanned))
}

impl CoreTool for FindFiles {
    fn name(&self) -> &'static str {
        "find_files"
    }

    fn description(&self) -> &'static str {
        "Find files by name with a glob pattern such as '*.rs', 'Dockerfile*' or \
         '*.test.ts'. The pattern matches the file name only. Searches recursively, \
         skipping dependency and build directories (node_modules, .git, target, ...). \
         Results show sizes, newest first; 50 by default, at most 200."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "Glob matched against file names, e.g. '*.go'." },
                "path": { "type": "string", "description": "Directory to search. Defaults to the working directory." },
                "max_results": { "type": "integer", "description": "Maximum results. Default 50, max 200." },
            },
            "required": ["pattern"],
        })
    }

    fn execute<'a>(&'a self, args: &'a Value) -> BoxFuture<'a, anyhow::Result<String>> {
        Box::pin(async move {
            let pattern = required_str(args, "pattern")?.to_owned();
            let root = PathBuf::from(optional_str(args, "path").unwrap_or("."));
            let limit = optional_u64(args, "max_results")
                .unwrap_or(FIND_DEFAULT_RESULTS)
                .min(FIND_MAX_RESULTS) as usize;

            tokio::task::spawn_blocking(move || {
                require_dir(&root)?;
                let (found, scanned) = find_files(&root, &pattern)?;
                if found.is_empty() {
                    return Ok(format!(
                        "No files matching '{pattern}' found in {} ({scanned} files scanned)",
                        root.display()
                    ));
                }
                let mut out = format!("Found {} files matching '{pattern}'", found.len());
                if found.len() > limit {
                    let _ = write!(out, " (showing first {limit})");
                }
                out.push_str(":\n\n");
                for (path, size) in found.iter().take(limit) {
                    let _ = writeln!(out, "{} ({})", path.display(), format_size(*size));
                }
                Ok(out)
            })
            .await?
        })
    }
}

fn require_dir(path: &Path) -> anyhow::Result<()> {
    let meta =
        std::fs::metadata(path).with_context(|| format!("cannot access path {}", path.display()))?;
    if !meta.is_dir() {
        anyhow::bail!("{} is not a directory", path.display());
    }
    Ok(())
}

// ── grep ────────────────────────────────────────────────────────────────

pub struct Grep;

/// Options for a content search.
pub struct GrepQuery {
    pub regex: Regex,
    pub include: Option<GlobMatcher>,
    pub limit: usize,
}

impl GrepQuery {
    pub fn new(
        query: &str,
        case_sensitive: bool,
        include: Option<&str>,
        limit: usize,
    ) -> anyhow::Result<Self> {
        let regex = RegexBuilder::new(query)
            .case_insensitive(!case_sensitive)
            .build()
            .with_context(|| format!("invalid regular expression {query:?}"))?;
        let include = include.map(glob_matcher).transpose()?;
        Ok(Self { regex, include, limit })
    }

    /// `path:line:content` for each matching line under `root`, which may
    /// also be a single file. Stops after `limit` matches.
    pub fn search(&self, root: &Path) -> Vec<String> {
        let mut hits = Vec::new();
        for entry in walk_files(root) {
            if let Some(ref include) = self.include {
                if entry.depth() > 0 && !matches_name(include, &entry) {
                    continue;
                }
            }
            if !self.search_file(entry.path(), &mut hits) {
                break;
            }
        }
        hits
    }

    /// Returns false once the limit is reached.
    fn search_file(&self, path: &Path, hits: &mut Vec<String>) -> bool {
        let Ok(meta) = std::fs::metadata(path) else { return true };
        if meta.len() > MAX_FILE_BYTES {
            return true;
        }
        let Ok(bytes) = std::fs::read(path) else { return true };
        // Binary files are skipped.
        if bytes.iter().take(8192).any(|b| *b == 0) {
            return true;
        }
        let text = String::from_utf8_lossy(&bytes);
        for (idx, line) in text.lines().enumerate() {
            if hits.len() >= self.limit {
                return false;
            }
            if self.regex.is_match(line) {
                hits.push(format!("{}:{}:{}", path.display(), idx + 1, clip(line)));
            }
        }
        hits.len() < self.limit
    }
}

fn clip(line: &str) -> String {
    match line.char_indices().nth(GREP_LINE_CHARS) {
        Some((cut, _)) => format!("{}...", &line[..cut]),
        None => line.to_owned(),
    }
}

impl CoreTool for Grep {
    fn name(&self) -> &'static str {
        "grep"
    }

    fn description(&self) -> &'static str {
        "Search file contents for a regular expression, recursively from a directory (or \
         in one file). Returns file:line:content lines and skips dependency and build \
         directories and binary files. case_sensitive defaults to true; include limits \
         the search to file names matching a glob such as '*.ts'. 30 matches by default, \
         at most 100; long lines are cut to 250 characters."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Regular expression to search for." },
                "path": { "type": "string", "description": "Directory or file to search. Defaults to the working directory." },
                "max_results": { "type": "integer", "description": "Maximum matching lines. Default 30, max 100." },
                "case_sensitive": { "type": "boolean", "description": "Case-sensitive matching. Default true." },
                "include": { "type": "string", "description": "Only search files whose name matches this glob, e.g. '*.go'." },
            },
            "required": ["query"],
        })
    }

    fn execute<'a>(&'a self, args: &'a Value) -> BoxFuture<'a, anyhow::Result<String>> {
        Box::pin(async move {
            let query = required_str(args, "query")?.to_owned();
            let root = PathBuf::from(optional_str(args, "path").unwrap_or("."));
            let limit = optional_u64(args, "max_results")
                .unwrap_or(GREP_DEFAULT_RESULTS)
                .min(GREP_MAX_RESULTS) as usize;
            let case_sensitive =
                args.get("case_sensitive").and_then(Value::as_bool).unwrap_or(true);
            let search =
                GrepQuery::new(&query, case_sensitive, optional_str(args, "include"), limit)?;

            tokio::task::spawn_blocking(move || {
                std::fs::metadata(&root)
                    .with_context(|| format!("cannot access path {}", root.display()))?;
                let hits = search.search(&root);
                if hits.is_empty() {
                    return Ok(format!("No matches found for '{query}' in {}", root.display()));
                }
                let mut out = format!("Found {} matches for '{query}'", hits.len());
                if hits.len() >= limit {
                    out.push_str(" (results capped)");
                }
                out.push_str(":\n\n");
                out.push_str(&hits.join("\n"));
                Ok(out)
            })
            .await?
        })
    }
}

#[cfg(test)]
#[path = "search_tests.rs"]
mod tests;
