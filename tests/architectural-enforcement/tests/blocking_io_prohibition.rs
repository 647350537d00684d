//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: async code paths MUST NOT use blocking I/O.
//! **Required**: `tokio::io`, `tokio::net`, async `reqwest`; not `std::fs`,
//! `std::net`, `std::process`, or blocking stdin/stdout, inside async code.
//! **Acceptable**: non-async functions (config loading before the event loop),
//! test code.

use architectural_enforcement::{code_part, enclosing_fn, production_sources, FnContext, Violation};

/// Test that production code does not use blocking I/O
#[test]
fn test_no_blocking_io_in_production_code() {
    let violations = find_blocking_io_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Blocking I/O calls found in async code!\n");

        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }

        eprintln!("\n❌ FORBIDDEN in async code:");
        eprintln!("  - std::fs::read(), std::fs::write(), std::fs::File");
        eprintln!("  - std::net::TcpStream, std::net::TcpListener");
        eprintln!("  - std::io::stdin(), std::io::stdout()");
        eprintln!("  - std::process::Command");
        eprintln!("  - reqwest::blocking::*");
        eprintln!("\n✅ REQUIRED async I/O:");
        eprintln!("  - tokio::io::stdin() / tokio::io::stdout()");
        eprintln!("  - tokio::net / tokio-tungstenite");
        eprintln!("  - reqwest::Client with .await");

        panic!(
            "\nFound {} blocking I/O violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

fn find_blocking_io_violations() -> Vec<Violation> {
    let mut violations = Vec::new();

    for file in production_sources() {
        let lines = file.line_refs();
        for (idx, line) in lines.iter().enumerate() {
            if let Some(rule) = blocking_rule(&lines, idx) {
                violations.push(Violation {
                    path: file.path.clone(),
                    line_number: idx + 1,
                    rule,
                    text: (*line).to_string(),
                });
            }
        }
    }
    violations
}

/// Rule broken by `lines[idx]`, if any
fn blocking_rule(lines: &[&str], idx: usize) -> Option<&'static str> {
    let code = code_part(lines[idx]);

    // Blocking HTTP is never acceptable, not even before the runtime starts.
    if code.contains("reqwest::blocking") {
        return Some("Blocking HTTP client");
    }

    if enclosing_fn(lines, idx) != FnContext::Async {
        return None;
    }

    if code.contains("std::fs::") {
        Some("Blocking file I/O")
    } else if code.contains("std::net::") {
        Some("Blocking network I/O")
    } else if code.contains("std::process::Command") {
        Some("Blocking process I/O")
    } else if code.contains("std::io::stdin()") || code.contains("std::io::stdout()") {
        Some("Blocking stdin/stdout in async")
    } else {
        None
    }
}

#[test]
fn test_blocking_io_detection() {
    let code = vec![
        "pub async fn load() {",
        "    let contents = std::fs::read_to_string(\"file.txt\")?;",
        "}",
    ];
    assert_eq!(blocking_rule(&code, 1), Some("Blocking file I/O"));
}

#[test]
fn test_non_async_function_allowed() {
    let code = vec![
        "pub fn load_config() {",
        "    let contents = std::fs::read_to_string(\"client.toml\")?;",
        "}",
    ];
    assert_eq!(blocking_rule(&code, 1), None);
}

#[test]
fn test_blocking_http_always_flagged() {
    let code = vec!["fn fetch() {", "    reqwest::blocking::get(url)?;", "}"];
    assert_eq!(blocking_rule(&code, 1), Some("Blocking HTTP client"));
}
