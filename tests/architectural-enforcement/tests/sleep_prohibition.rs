//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code MUST NOT call sleep methods. Waiting happens on
//! I/O, channels, or deadlines (`sleep_until` on a stored `Instant`, as the
//! reconnect timer and prose debounce do).
//! **Exceptions**: periodic tasks driven by `tokio::time::interval`, test code.

use architectural_enforcement::{code_part, production_sources, Violation};

/// Test that production code does not contain sleep() calls
#[test]
fn test_no_sleep_in_production_code() {
    let violations = find_sleep_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Sleep calls found in production code!\n");

        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }

        eprintln!("\n✅ ACCEPTABLE waiting:");
        eprintln!("  - tokio::time::sleep_until(deadline) on a stored deadline");
        eprintln!("  - Periodic tasks using tokio::time::interval()");
        eprintln!("  - Test code (#[cfg(test)] modules)");
        eprintln!("\n❌ FORBIDDEN:");
        eprintln!("  - Sleep in polling loops");
        eprintln!("  - Sleep as poor man's synchronization");
        eprintln!("  - std::thread::sleep anywhere");

        panic!(
            "\nFound {} sleep violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

fn find_sleep_violations() -> Vec<Violation> {
    let mut violations = Vec::new();

    for file in production_sources() {
        let lines = file.line_refs();
        for (idx, line) in lines.iter().enumerate() {
            let code = code_part(line);
            if !is_sleep_call(code) || is_interval_pattern(&lines, idx) {
                continue;
            }
            violations.push(Violation {
                path: file.path.clone(),
                line_number: idx + 1,
                rule: "sleep call",
                text: (*line).to_string(),
            });
        }
    }
    violations
}

fn is_sleep_call(code: &str) -> bool {
    code.contains("::sleep(") || code.contains(".sleep(") || code.contains("thread::sleep")
}

/// Check if this is a tokio::time::interval pattern (acceptable for periodic tasks)
fn is_interval_pattern(lines: &[&str], current_idx: usize) -> bool {
    let context_range = current_idx.saturating_sub(20)..current_idx;
    lines[context_range]
        .iter()
        .any(|line| line.contains("interval.tick()") || line.contains("tokio::time::interval"))
}

#[test]
fn test_sleep_detection() {
    assert!(is_sleep_call("    tokio::time::sleep(Duration::from_millis(10)).await;"));
    assert!(is_sleep_call("    std::thread::sleep(delay);"));
    assert!(!is_sleep_call("    tokio::time::sleep_until(deadline).await;"));
}

#[test]
fn test_interval_detection() {
    let code = vec![
        "let mut ticker = tokio::time::interval(period);",
        "loop {",
        "    ticker.tick().await;",
        "    tokio::time::sleep(jitter).await;",
        "}",
    ];
    assert!(is_interval_pattern(&code, 3));
}
