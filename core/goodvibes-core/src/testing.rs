//! Test doubles for the process and build/test seams.
//!
//! Enabled for the crate's own tests and for downstream crates through the
//! `test-helpers` feature.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use crate::checks::{CheckReport, CheckRunner};
use crate::process::{CommandExecutor, ExecResult};

/// Records every invocation and answers from a table of argument-prefix rules.
///
/// Unmatched invocations succeed with empty output. When several rules match,
/// the most recently added wins.
#[derive(Default)]
pub struct ScriptedExecutor {
    rules: RefCell<Vec<(Vec<String>, ExecResult)>>,
    calls: RefCell<Vec<Vec<String>>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, args_prefix: &[&str], result: ExecResult) {
        self.rules.borrow_mut().push((
            args_prefix.iter().map(|s| s.to_string()).collect(),
            result,
        ));
    }

    /// Arguments of every call, in order (program omitted).
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.borrow().clone()
    }

    pub fn count_matching(&self, args_prefix: &[&str]) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|args| starts_with(args, args_prefix))
            .count()
    }
}

fn starts_with(args: &[String], prefix: &[&str]) -> bool {
    args.len() >= prefix.len() && args.iter().zip(prefix).all(|(a, p)| a == p)
}

impl CommandExecutor for ScriptedExecutor {
    fn exec(&self, _program: &str, args: &[&str], _cwd: &Path, _timeout: Duration) -> ExecResult {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        self.calls.borrow_mut().push(args.clone());

        let rules = self.rules.borrow();
        rules
            .iter()
            .rev()
            .find(|(prefix, _)| {
                let prefix: Vec<&str> = prefix.iter().map(String::as_str).collect();
                starts_with(&args, &prefix)
            })
            .map(|(_, result)| result.clone())
            .unwrap_or_else(|| ExecResult::ok(""))
    }
}

/// Returns queued reports, falling back to a passing report.
#[derive(Default)]
pub struct ScriptedCheckRunner {
    test_reports: RefCell<VecDeque<CheckReport>>,
    build_reports: RefCell<VecDeque<CheckReport>>,
    test_calls: RefCell<Vec<Vec<String>>>,
    build_calls: RefCell<usize>,
}

impl ScriptedCheckRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_tests(&self, report: CheckReport) {
        self.test_reports.borrow_mut().push_back(report);
    }

    pub fn queue_build(&self, report: CheckReport) {
        self.build_reports.borrow_mut().push_back(report);
    }

    pub fn test_calls(&self) -> Vec<Vec<String>> {
        self.test_calls.borrow().clone()
    }

    pub fn build_calls(&self) -> usize {
        *self.build_calls.borrow()
    }
}

impl CheckRunner for ScriptedCheckRunner {
    fn run_tests(&self, _cwd: &Path, test_files: &[String]) -> CheckReport {
        self.test_calls.borrow_mut().push(test_files.to_vec());
        self.test_reports
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| CheckReport::pass("tests passed"))
    }

    fn run_build(&self, _cwd: &Path) -> CheckReport {
        *self.build_calls.borrow_mut() += 1;
        self.build_reports
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| CheckReport::pass("build passed"))
    }
}
