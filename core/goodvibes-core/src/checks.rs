//! Build and test runner collaborator.
//!
//! The orchestrator only needs a pass/fail verdict plus parsed diagnostics;
//! which tools produce them is configuration. [`CommandCheckRunner`] runs the
//! configured commands through a [`CommandExecutor`] and parses compiler and
//! test-runner output into [`Diagnostic`]s. It never errors: a crash, a
//! timeout, or unparseable output all become `passed: false`.

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Component, Path};
use std::time::Duration;
use walkdir::WalkDir;

use crate::config::{BuildConfig, TestsConfig};
use crate::process::{CommandExecutor, ExecResult};
use crate::state::Diagnostic;

const SUMMARY_MAX_CHARS: usize = 200;

/// Directories never searched for related tests.
const SKIP_DIRS: [&str; 7] = [
    "node_modules",
    ".git",
    "target",
    "dist",
    "build",
    "coverage",
    ".goodvibes",
];

/// `src/a.ts(12,5): error TS2322: Type 'string' is not assignable...`
static TSC_DIAGNOSTIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<file>[^\s(][^(]*)\((?P<line>\d+),\d+\):\s*error\s+(?P<msg>.+)$")
        .expect("valid tsc regex")
});

/// `src/a.ts:12:5 - error TS2322: ...` and `src/a.rs:12:5: error: ...`
static COLON_DIAGNOSTIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<file>[^\s:]+):(?P<line>\d+):\d+:?\s*-?\s*error:?\s*(?P<msg>.+)$")
        .expect("valid colon diagnostic regex")
});

/// `FAIL  src/a.test.ts > suite > case` (vitest / jest)
static FAILED_TEST_FILE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:FAIL|✗|×|❯)\s+(?P<file>[^\s>]+\.\w+)(?:\s*>\s*(?P<rest>.+))?$")
        .expect("valid failed test regex")
});

/// Outcome of one build or test run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckReport {
    pub passed: bool,
    pub summary: String,
    pub errors: Vec<Diagnostic>,
}

impl CheckReport {
    pub fn pass(summary: impl Into<String>) -> Self {
        Self {
            passed: true,
            summary: summary.into(),
            errors: Vec::new(),
        }
    }

    pub fn fail(summary: impl Into<String>, errors: Vec<Diagnostic>) -> Self {
        Self {
            passed: false,
            summary: summary.into(),
            errors,
        }
    }
}

/// Build/test collaborator consumed by the orchestrator.
pub trait CheckRunner {
    fn run_tests(&self, cwd: &Path, test_files: &[String]) -> CheckReport;
    fn run_build(&self, cwd: &Path) -> CheckReport;
}

/// Runs the configured test and build commands.
pub struct CommandCheckRunner<'a> {
    executor: &'a dyn CommandExecutor,
    tests: TestsConfig,
    build: BuildConfig,
}

impl<'a> CommandCheckRunner<'a> {
    pub fn new(executor: &'a dyn CommandExecutor, tests: TestsConfig, build: BuildConfig) -> Self {
        Self {
            executor,
            tests,
            build,
        }
    }

    fn exec(
        &self,
        command: &[String],
        extra: &[String],
        cwd: &Path,
        timeout: Duration,
    ) -> Option<ExecResult> {
        let (program, args) = command.split_first()?;
        let args: Vec<&str> = args
            .iter()
            .chain(extra.iter())
            .map(String::as_str)
            .collect();
        Some(self.executor.exec(program, &args, cwd, timeout))
    }
}

impl CheckRunner for CommandCheckRunner<'_> {
    fn run_tests(&self, cwd: &Path, test_files: &[String]) -> CheckReport {
        let timeout = Duration::from_secs(self.tests.timeout_secs);
        let Some(result) = self.exec(&self.tests.command, test_files, cwd, timeout) else {
            return CheckReport::fail("No test command configured", Vec::new());
        };
        if result.success() {
            return CheckReport::pass(summarize(&result.combined_output(), "tests passed"));
        }

        let output = result.combined_output();
        let mut errors = parse_test_failures(&output);
        if errors.is_empty() {
            // Nothing attributable: blame every file we asked about.
            let message = summarize(&output, "test run failed");
            errors = test_files
                .iter()
                .map(|file| Diagnostic {
                    file: file.clone(),
                    line: 0,
                    message: message.clone(),
                })
                .collect();
        }
        CheckReport::fail(summarize(&output, "test run failed"), errors)
    }

    fn run_build(&self, cwd: &Path) -> CheckReport {
        let timeout = Duration::from_secs(self.build.timeout_secs);
        let Some(result) = self.exec(&self.build.command, &[], cwd, timeout) else {
            return CheckReport::fail("No build command configured", Vec::new());
        };
        let output = result.combined_output();
        if result.success() {
            return CheckReport::pass(summarize(&output, "build passed"));
        }
        CheckReport::fail(summarize(&output, "build failed"), parse_diagnostics(&output))
    }
}

/// Extracts `file:line: message` diagnostics from compiler output.
pub fn parse_diagnostics(output: &str) -> Vec<Diagnostic> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim_end();
            TSC_DIAGNOSTIC
                .captures(line)
                .or_else(|| COLON_DIAGNOSTIC.captures(line))
                .map(|caps| Diagnostic {
                    file: caps["file"].trim().to_string(),
                    line: caps["line"].parse().unwrap_or(0),
                    message: caps["msg"].trim().to_string(),
                })
        })
        .collect()
}

/// Extracts failing test files from vitest/jest style output.
pub fn parse_test_failures(output: &str) -> Vec<Diagnostic> {
    let mut failures: Vec<Diagnostic> = Vec::new();
    for line in output.lines() {
        let Some(caps) = FAILED_TEST_FILE.captures(line) else {
            continue;
        };
        let file = caps["file"].to_string();
        if failures.iter().any(|d| d.file == file) {
            continue;
        }
        let message = caps
            .name("rest")
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_else(|| "test failed".to_string());
        failures.push(Diagnostic {
            file,
            line: 0,
            message,
        });
    }
    failures
}

fn summarize(output: &str, fallback: &str) -> String {
    let last = output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .unwrap_or(fallback);
    last.chars().take(SUMMARY_MAX_CHARS).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Test file mapping
// ─────────────────────────────────────────────────────────────────────────────

/// True for paths that are themselves tests.
///
/// Only directories below `root` count, so a project checked out under
/// `~/tests/` is not mistaken for a test tree. An absolute path outside
/// `root` is judged by its file name alone.
pub fn is_test_file(root: &Path, path: &str) -> bool {
    let path = Path::new(path);
    let below_root = match path.strip_prefix(root) {
        Ok(relative) => Some(relative),
        Err(_) if path.is_relative() => Some(path),
        Err(_) => None,
    };
    let in_test_dir = below_root
        .and_then(Path::parent)
        .is_some_and(|dir| {
            dir.components().any(|c| match c {
                Component::Normal(name) => {
                    let name = name.to_string_lossy();
                    name == "__tests__" || name == "tests" || name == "test"
                }
                _ => false,
            })
        });
    if in_test_dir {
        return true;
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    name.contains(".test.")
        || name.contains(".spec.")
        || name.starts_with("test_")
        || file_stem(&name).ends_with("_test")
}

/// Finds test files that exercise `source` (relative or absolute), searching `root`.
///
/// Matches `<stem>.test.*`, `<stem>.spec.*`, `<stem>_test.*`, `test_<stem>.*`,
/// and `__tests__/<stem>.*`. Results are relative to `root` and sorted.
pub fn find_related_tests(root: &Path, source: &str) -> Vec<String> {
    let stem = match Path::new(source).file_name() {
        Some(name) => file_stem(&name.to_string_lossy()).to_string(),
        None => return Vec::new(),
    };
    if stem.is_empty() {
        return Vec::new();
    }

    let mut found: Vec<String> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            !(entry.file_type().is_dir() && SKIP_DIRS.iter().any(|skip| *skip == name))
        })
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy();
            let in_tests_dir = entry
                .path()
                .parent()
                .and_then(|p| p.file_name())
                .is_some_and(|p| p == "__tests__");
            is_related_test_name(&name, &stem, in_tests_dir)
        })
        .filter_map(|entry| {
            entry
                .path()
                .strip_prefix(root)
                .ok()
                .map(|p| p.to_string_lossy().to_string())
        })
        .collect();
    found.sort();
    found
}

fn is_related_test_name(name: &str, stem: &str, in_tests_dir: bool) -> bool {
    let base = file_stem(name);
    base == format!("{stem}.test")
        || base == format!("{stem}.spec")
        || base == format!("{stem}_test")
        || base == format!("test_{stem}")
        || (in_tests_dir && base == stem)
}

/// File name without its final extension.
fn file_stem(name: &str) -> &str {
    match name.rfind('.') {
        Some(0) | None => name,
        Some(idx) => &name[..idx],
    }
}
