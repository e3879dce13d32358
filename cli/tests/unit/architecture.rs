//! Structural tests for architectural boundary enforcement.
//!
//! These tests scan source files to verify that the layer boundaries
//! (domain, application, infra, commands/output) hold.

use std::path::{Path, PathBuf};

fn src_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("src")
}

/// Collect all `.rs` files under a directory recursively.
fn collect_rs_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                files.extend(collect_rs_files(&path));
            } else if path.extension().and_then(|e| e.to_str()) == Some("rs") {
                files.push(path);
            }
        }
    }
    files
}

fn relative(file: &Path) -> String {
    file.strip_prefix(env!("CARGO_MANIFEST_DIR"))
        .unwrap_or(file)
        .display()
        .to_string()
        .replace('\\', "/")
}

/// Read a file and strip comment lines to avoid false positives.
fn read_non_comment_lines(path: &Path) -> Vec<String> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    content
        .lines()
        .filter(|l| {
            let trimmed = l.trim();
            !trimmed.starts_with("//") && !trimmed.starts_with("/*") && !trimmed.starts_with('*')
        })
        .map(String::from)
        .collect()
}

/// Track brace depth and return whether a line is inside a `#[cfg(test)]` block.
struct CfgTestTracker {
    in_test_block: bool,
    brace_depth: i32,
    test_block_start_depth: i32,
}

impl CfgTestTracker {
    fn new() -> Self {
        Self {
            in_test_block: false,
            brace_depth: 0,
            test_block_start_depth: 0,
        }
    }

    /// Process a line and return `true` if it's inside a `#[cfg(test)]` block.
    fn process_line(&mut self, line: &str) -> bool {
        let trimmed = line.trim();
        if trimmed.contains("#[cfg(test)]") || trimmed.contains("#[cfg(all(test") {
            self.in_test_block = true;
            self.test_block_start_depth = self.brace_depth;
        }
        for ch in line.chars() {
            match ch {
                '{' => self.brace_depth += 1,
                '}' => {
                    self.brace_depth -= 1;
                    if self.in_test_block && self.brace_depth <= self.test_block_start_depth {
                        self.in_test_block = false;
                    }
                }
                _ => {}
            }
        }
        self.in_test_block
    }
}

/// Non-test, non-comment lines of every file under `dir`, with their
/// relative path and line number.
fn production_lines(dir: &Path) -> Vec<(String, usize, String)> {
    let mut out = Vec::new();
    for file in collect_rs_files(dir) {
        let Ok(content) = std::fs::read_to_string(&file) else {
            continue;
        };
        let rel = relative(&file);
        let mut tracker = CfgTestTracker::new();
        for (i, line) in content.lines().enumerate() {
            let in_test = tracker.process_line(line);
            if in_test || line.trim().starts_with("//") {
                continue;
            }
            out.push((rel.clone(), i + 1, line.to_string()));
        }
    }
    out
}

/// Lines under `dir` containing any of `patterns`, comments excluded.
fn find_imports(dir: &Path, patterns: &[&str]) -> Vec<String> {
    let mut violations = Vec::new();
    for file in collect_rs_files(dir) {
        let rel = relative(&file);
        for (i, line) in read_non_comment_lines(&file).iter().enumerate() {
            if patterns.iter().any(|p| line.contains(p)) {
                violations.push(format!("{rel}:{}: {line}", i + 1));
            }
        }
    }
    violations
}

/// Count non-test, non-comment, non-empty lines in a file.
fn count_non_test_lines(content: &str) -> usize {
    let mut tracker = CfgTestTracker::new();
    content
        .lines()
        .filter(|line| {
            let in_test = tracker.process_line(line);
            let trimmed = line.trim();
            !in_test && !trimmed.is_empty() && !trimmed.starts_with("//")
        })
        .count()
}

// ── Layer boundaries ──────────────────────────────────────────────────────────

#[test]
fn domain_is_free_of_io_and_outer_layers() {
    let violations = find_imports(
        &src_dir().join("domain"),
        &[
            "tokio",
            "std::fs",
            "std::process",
            "std::net",
            "reqwest",
            "crate::infra",
            "crate::application",
            "crate::commands",
            "crate::output",
        ],
    );
    assert!(
        violations.is_empty(),
        "domain/ must stay pure:\n{}",
        violations.join("\n")
    );
}

#[test]
fn application_has_no_infra_commands_or_output_imports() {
    let violations = find_imports(
        &src_dir().join("application"),
        &["crate::infra", "crate::commands", "crate::output"],
    );
    assert!(
        violations.is_empty(),
        "application/ must not import from infra/, commands/ or output/:\n{}",
        violations.join("\n")
    );
}

#[test]
fn infra_has_no_imports_from_commands_or_output() {
    let violations = find_imports(
        &src_dir().join("infra"),
        &["crate::commands", "crate::output"],
    );
    assert!(
        violations.is_empty(),
        "infra/ must not import from commands/ or output/:\n{}",
        violations.join("\n")
    );
}

#[test]
fn infra_has_no_print_macros_outside_tests() {
    let violations: Vec<String> = production_lines(&src_dir().join("infra"))
        .into_iter()
        .filter(|(_, _, line)| line.contains("println!") || line.contains("eprintln!"))
        .map(|(rel, n, line)| format!("{rel}:{n}: {line}"))
        .collect();
    assert!(
        violations.is_empty(),
        "infra/ must not use println!/eprintln! outside #[cfg(test)]:\n{}",
        violations.join("\n")
    );
}

#[test]
fn no_tokio_command_runner_new_outside_infra() {
    let violations: Vec<String> = collect_rs_files(&src_dir())
        .into_iter()
        .filter(|file| !relative(file).contains("/infra/"))
        .flat_map(|file| {
            let rel = relative(&file);
            read_non_comment_lines(&file)
                .into_iter()
                .enumerate()
                .filter(|(_, line)| line.contains("TokioCommandRunner::new"))
                .map(move |(i, line)| format!("{rel}:{}: {line}", i + 1))
                .collect::<Vec<_>>()
        })
        .collect();
    assert!(
        violations.is_empty(),
        "Process runners are constructed in infra/ only:\n{}",
        violations.join("\n")
    );
}

#[test]
fn no_module_level_dead_code_allows_in_layers() {
    let src = src_dir();
    let mut violations = Vec::new();
    for dir in [src.join("domain"), src.join("application"), src.join("infra")] {
        for file in collect_rs_files(&dir) {
            let Ok(content) = std::fs::read_to_string(&file) else {
                continue;
            };
            for (i, line) in content.lines().enumerate() {
                if line.trim().starts_with("#![allow(dead_code)]") {
                    violations.push(format!("{}:{}", relative(&file), i + 1));
                }
            }
        }
    }
    assert!(
        violations.is_empty(),
        "Module-level #![allow(dead_code)] found in architecture layers:\n{}",
        violations.join("\n")
    );
}

// ── Commands ─────────────────────────────────────────────────────────────────

#[test]
fn no_inline_json_branching_in_commands() {
    let mut violations = Vec::new();
    for file in collect_rs_files(&src_dir().join("commands")) {
        let rel = relative(&file);
        for (i, line) in read_non_comment_lines(&file).iter().enumerate() {
            let trimmed = line.trim();
            if line.contains("json: bool")
                || trimmed.starts_with("if json")
                || trimmed.starts_with("if !json")
            {
                violations.push(format!("{rel}:{}: {line}", i + 1));
            }
        }
    }
    assert!(
        violations.is_empty(),
        "Found inline JSON branching in commands/, use app.renderer() instead:\n{}",
        violations.join("\n")
    );
}

#[test]
fn command_handlers_are_reasonably_sized() {
    let mut violations = Vec::new();
    for file in collect_rs_files(&src_dir().join("commands")) {
        let Ok(content) = std::fs::read_to_string(&file) else {
            continue;
        };
        let line_count = count_non_test_lines(&content);
        if line_count > 150 {
            violations.push(format!("{}: {line_count} non-test lines (limit: 150)", relative(&file)));
        }
    }
    assert!(
        violations.is_empty(),
        "Command handler files exceed the size limit, extract logic to application services:\n{}",
        violations.join("\n")
    );
}

// ── Secrets ──────────────────────────────────────────────────────────────────

/// Log fields never carry key material or credentials.
#[test]
fn tracing_fields_never_name_secret_values() {
    let secret_fields = [
        "%private_key",
        "?private_key",
        "%key_material",
        "?key_material",
        "%password",
        "?password",
        "%plaintext",
        "?plaintext",
        "%secret",
        "?secret",
        "private_key =",
        "key_material =",
        "password =",
    ];
    let macros = ["trace!(", "debug!(", "info!(", "warn!(", "error!("];

    let mut violations = Vec::new();
    for (rel, n, line) in production_lines(&src_dir()) {
        let in_macro = macros.iter().any(|m| line.contains(m));
        let is_field = secret_fields.iter().any(|f| line.contains(f));
        if in_macro && is_field {
            violations.push(format!("{rel}:{n}: {line}"));
        }
    }
    assert!(
        violations.is_empty(),
        "Secret values must not appear in log fields:\n{}",
        violations.join("\n")
    );
}

#[test]
fn secrets_are_sealed_only_in_the_vault() {
    let violations: Vec<String> = production_lines(&src_dir())
        .into_iter()
        .filter(|(rel, _, line)| {
            line.contains(".encrypt(") && !rel.ends_with("application/services/vault.rs")
        })
        .map(|(rel, n, line)| format!("{rel}:{n}: {line}"))
        .collect();
    assert!(
        violations.is_empty(),
        "Only the credential vault encrypts secrets:\n{}",
        violations.join("\n")
    );
}
