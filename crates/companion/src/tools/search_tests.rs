// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

/// src/{main.rs, lib.rs, notes.md}, node_modules/dep.rs, README.md
fn project() -> anyhow::Result<tempfile::TempDir> {
    let dir = tempfile::tempdir()?;
    let root = dir.path();
    std::fs::create_dir_all(root.join("src"))?;
    std::fs::create_dir_all(root.join("node_modules"))?;
    std::fs::write(root.join("src/main.rs"), "fn main() {\n    helper();\n}\n")?;
    std::fs::write(root.join("src/lib.rs"), "pub fn helper() {}\n// TODO: docs\n")?;
    std::fs::write(root.join("src/notes.md"), "Helper notes\n")?;
    std::fs::write(root.join("node_modules/dep.rs"), "fn helper() {}\n")?;
    std::fs::write(root.join("README.md"), "# demo\n")?;
    Ok(dir)
}

fn names(found: &[(PathBuf, u64)]) -> Vec<String> {
    let mut names: Vec<String> = found
        .iter()
        .filter_map(|(p, _)| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect();
    names.sort();
    names
}

#[test]
fn find_matches_names_and_skips_ignored_dirs() -> anyhow::Result<()> {
    let dir = project()?;
    let (found, scanned) = find_files(dir.path(), "*.rs")?;
    assert_eq!(names(&found), ["lib.rs", "main.rs"]);
    assert_eq!(scanned, 4);
    Ok(())
}

#[test]
fn invalid_glob_is_an_error() {
    assert!(find_files(Path::new("."), "[").is_err());
}

#[tokio::test]
async fn find_tool_reports_sizes() -> anyhow::Result<()> {
    let dir = project()?;
    let args = json!({ "pattern": "*.md", "path": dir.path().display().to_string() });
    let out = FindFiles.execute(&args).await?;
    assert!(out.starts_with("Found 2 files matching '*.md':"), "{out}");
    assert!(out.contains("README.md (7B)"), "{out}");

    let args = json!({ "pattern": "*.py", "path": dir.path().display().to_string() });
    let out = FindFiles.execute(&args).await?;
    assert!(out.starts_with("No files matching '*.py'"), "{out}");
    Ok(())
}

#[tokio::test]
async fn find_tool_rejects_a_file_path() -> anyhow::Result<()> {
    let dir = project()?;
    let args = json!({ "pattern": "*", "path": dir.path().join("README.md").display().to_string() });
    assert!(FindFiles.execute(&args).await.is_err());
    Ok(())
}

#[test]
fn grep_reports_path_line_content() -> anyhow::Result<()> {
    let dir = project()?;
    let hits = GrepQuery::new(r"helper\(\)", true, Some("*.rs"), 30)?.search(dir.path());
    assert_eq!(hits.len(), 2, "{hits:?}");
    assert!(hits[0].ends_with("lib.rs:1:pub fn helper() {}"), "{hits:?}");
    assert!(hits[1].ends_with("main.rs:2:    helper();"), "{hits:?}");
    Ok(())
}

#[yare::parameterized(
    sensitive = { true, 0 },
    insensitive = { false, 1 },
)]
fn grep_case_sensitivity(case_sensitive: bool, expected: usize) -> anyhow::Result<()> {
    let dir = project()?;
    let query = GrepQuery::new("^helper notes", case_sensitive, None, 30)?;
    assert_eq!(query.search(dir.path()).len(), expected);
    Ok(())
}

#[test]
fn grep_stops_at_limit_and_clips_long_lines() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let long = "x".repeat(400);
    let body: String = (0..10).map(|_| format!("{long}\n")).collect();
    std::fs::write(dir.path().join("wide.txt"), body)?;

    let hits = GrepQuery::new("x", true, None, 3)?.search(dir.path());
    assert_eq!(hits.len(), 3);
    let content = hits[0].rsplit(':').next().unwrap_or_default();
    assert_eq!(content.len(), GREP_LINE_CHARS + 3);
    assert!(content.ends_with("..."));
    Ok(())
}

#[test]
fn grep_skips_binary_files() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("blob.bin"), b"needle\0\x01\x02")?;
    std::fs::write(dir.path().join("text.txt"), "needle\n")?;
    let hits = GrepQuery::new("needle", true, None, 30)?.search(dir.path());
    assert_eq!(hits.len(), 1);
    assert!(hits[0].contains("text.txt"));
    Ok(())
}

#[tokio::test]
async fn grep_tool_output() -> anyhow::Result<()> {
    let dir = project()?;
    let path = dir.path().display().to_string();

    let out = Grep.execute(&json!({ "query": "TODO", "path": path })).await?;
    assert!(out.starts_with("Found 1 matches for 'TODO':\n\n"), "{out}");

    let out = Grep.execute(&json!({ "query": "nothing-here", "path": path })).await?;
    assert!(out.starts_with("No matches found for 'nothing-here'"), "{out}");

    assert!(Grep.execute(&json!({ "query": "(", "path": path })).await.is_err());
    Ok(())
}
