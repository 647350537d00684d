//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles
//! on the production sources of the workspace:
//! - No sleep() calls in production code
//! - No blocking I/O inside async code paths
//!
//! The scanners are line based. Everything from the first `#[cfg(test)]` line
//! of a file onwards is test code and is not scanned.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Production source trees, relative to the workspace root
pub const PRODUCTION_DIRS: [&str; 2] = ["controller/core/src", "controller/client/src"];

/// Workspace root, resolved from this package's manifest directory
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join("..")
}

/// A production source file with its test section removed
#[derive(Debug)]
pub struct SourceFile {
    /// Path of the file
    pub path: PathBuf,
    /// Lines before the first `#[cfg(test)]`
    pub lines: Vec<String>,
}

impl SourceFile {
    /// Borrowed view of the lines, as the scanners take them
    #[must_use]
    pub fn line_refs(&self) -> Vec<&str> {
        self.lines.iter().map(String::as_str).collect()
    }
}

/// Every `.rs` file under the production trees
#[must_use]
pub fn production_sources() -> Vec<SourceFile> {
    let root = workspace_root();
    let mut files = Vec::new();

    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        if !path.exists() {
            continue;
        }
        for entry in walkdir::WalkDir::new(&path)
            .into_iter()
            .filter_map(Result::ok)
        {
            if entry.path().extension().and_then(|s| s.to_str()) != Some("rs") {
                continue;
            }
            let Ok(content) = fs::read_to_string(entry.path()) else {
                continue;
            };
            files.push(SourceFile {
                path: entry.path().to_path_buf(),
                lines: production_lines(&content)
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
            });
        }
    }
    files
}

/// Lines of `content` before its test section
#[must_use]
pub fn production_lines(content: &str) -> Vec<&str> {
    content
        .lines()
        .take_while(|line| line.trim() != "#[cfg(test)]")
        .collect()
}

/// The part of a line before any `//` comment
#[must_use]
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Kind of code a line sits in
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FnContext {
    /// Inside an `async fn` or an `async` block
    Async,
    /// Inside a plain `fn`
    Sync,
    /// Not inside any function (items, imports)
    Module,
}

/// Classify the innermost function around `lines[current_idx]`
#[must_use]
pub fn enclosing_fn(lines: &[&str], current_idx: usize) -> FnContext {
    for i in (0..current_idx).rev() {
        let line = code_part(lines[i]).trim();

        if line.contains("async move {") || line.ends_with("async {") {
            return FnContext::Async;
        }

        let signature = strip_qualifiers(line);
        if signature.starts_with("async fn ") {
            return FnContext::Async;
        }
        if signature.starts_with("fn ") {
            return FnContext::Sync;
        }

        // Stop at module/impl boundaries
        if line.starts_with("mod ") || (line.starts_with("impl") && line.contains('{')) {
            return FnContext::Module;
        }
    }
    FnContext::Module
}

fn strip_qualifiers(mut line: &str) -> &str {
    loop {
        let stripped = ["pub(crate) ", "pub(super) ", "pub ", "const ", "unsafe "]
            .iter()
            .find_map(|prefix| line.strip_prefix(prefix));
        match stripped {
            Some(rest) => line = rest,
            None => return line,
        }
    }
}

/// One finding
#[derive(Debug)]
pub struct Violation {
    /// File it was found in
    pub path: PathBuf,
    /// 1-based line number
    pub line_number: usize,
    /// Rule that was broken
    pub rule: &'static str,
    /// Offending source line
    pub text: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} - {}: {}",
            self.path.display(),
            self.line_number,
            self.rule,
            self.text.trim()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_lines_stop_at_test_module() {
        let content = "fn a() {}\n#[cfg(test)]\nmod tests {\n    fn b() {}\n}\n";
        assert_eq!(production_lines(content), vec!["fn a() {}"]);
    }

    #[test]
    fn test_enclosing_fn_detection() {
        let code = vec![
            "impl Store {",
            "    pub async fn load(&self) {",
            "        let x = 1;",
            "    }",
            "    pub fn parse(text: &str) {",
            "        let y = 2;",
            "    }",
            "}",
        ];
        assert_eq!(enclosing_fn(&code, 2), FnContext::Async);
        assert_eq!(enclosing_fn(&code, 5), FnContext::Sync);
        assert_eq!(enclosing_fn(&code, 0), FnContext::Module);
    }

    #[test]
    fn test_async_block_in_sync_fn() {
        let code = vec![
            "fn spawn_reader() {",
            "    tokio::spawn(async move {",
            "        read();",
            "    });",
            "}",
        ];
        assert_eq!(enclosing_fn(&code, 2), FnContext::Async);
    }

    #[test]
    fn test_code_part_strips_comments() {
        assert_eq!(code_part("let a = 1; // std::fs::read"), "let a = 1; ");
    }

    #[test]
    fn test_sources_found() {
        let files = production_sources();
        assert!(files
            .iter()
            .any(|f| f.path.ends_with("controller/core/src/controller.rs")));
    }
}
