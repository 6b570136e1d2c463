// Copyright (c) The testward Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The durable test report: per-file outcome lists plus the fatal-error
//! side section used by crash recovery.
//!
//! The report is the single source of truth across process restarts. The
//! invariants that make resumption safe:
//!
//! * a missing `byfile` key means "not part of this run";
//! * an empty outcome list means "known, not yet reported";
//! * a file transitions empty → non-empty exactly once in normal operation.
//!
//! Fatal crashes are recorded under `fatal_errors`, *not* in the main
//! outcome lists, so a crashed-and-retried file still looks pending to the
//! next attempt in the chain.

mod store;

pub use store::ReportStore;

use crate::errors::EngineCrash;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, FixedOffset, Local};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// The status of a single executed test case.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    /// The test passed.
    Pass,
    /// An assertion failed.
    Fail,
    /// The test errored before producing a verdict.
    Error,
    /// The test was skipped.
    Skip,
}

/// One frame of a captured stack trace.
///
/// `file` is rewritten relative to the working-directory root before
/// persistence. Engines may attach arbitrary additional keys per frame;
/// those round-trip through `extra`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TracebackFrame {
    /// Source file of the frame.
    pub file: Utf8PathBuf,
    /// Line number of the frame.
    #[serde(default)]
    pub line: u64,
    /// Engine-specific pass-through keys.
    #[serde(flatten)]
    pub extra: IndexMap<String, serde_json::Value>,
}

/// The outcome of one individual test case execution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    /// Test identifier (typically `Class::method`).
    pub id: String,
    /// Display address of the test.
    pub address: String,
    /// Execution status.
    pub status: TestStatus,
    /// Captured stderr.
    pub stderr: String,
    /// Captured stdout.
    pub stdout: String,
    /// Elapsed time in seconds.
    pub time: f64,
    /// Captured stack frames, innermost first.
    pub traceback: Vec<TracebackFrame>,
}

impl OutcomeRecord {
    fn synthetic(key: &Utf8Path, status: TestStatus, stderr: String) -> Self {
        Self {
            id: key.as_str().to_owned(),
            address: key.as_str().to_owned(),
            status,
            stderr,
            stdout: String::new(),
            time: 0.0,
            traceback: Vec::new(),
        }
    }

    /// A skip notice for a file matched by an `<exclude>` declaration.
    pub fn excluded_skip(key: &Utf8Path) -> Self {
        Self::synthetic(
            key,
            TestStatus::Skip,
            format!("Skipped Test File: {key}\nExcluded by <exclude/> in suite definition"),
        )
    }

    /// A per-case skip notice for an excluded file whose test identifiers
    /// could be enumerated.
    pub fn excluded_case_skip(key: &Utf8Path, case_id: &str) -> Self {
        Self {
            id: case_id.to_owned(),
            address: case_id.to_owned(),
            ..Self::excluded_skip(key)
        }
    }

    /// A skip notice for a file the engine silently filtered out of a run
    /// that otherwise completed normally.
    pub fn filtered_skip(key: &Utf8Path) -> Self {
        Self::synthetic(
            key,
            TestStatus::Skip,
            format!("Skipped Test File: {key}\nDue to an engine-level group or suite filter"),
        )
    }

    /// The terminal error outcome for a file whose retry budget was consumed
    /// by fatal crashes.
    pub fn crash_error(key: &Utf8Path, crash: &EngineCrash) -> Self {
        Self::synthetic(key, TestStatus::Error, crash_text(key, crash))
    }

    /// The terminal error outcome for a file that was never attempted
    /// because the engine crashed elsewhere and no restart was possible.
    ///
    /// `origin` names what crashed: the current test file, or a phase such
    /// as `init phase`.
    pub fn not_run_error(key: &Utf8Path, origin: &str, crash: &EngineCrash) -> Self {
        Self::synthetic(
            key,
            TestStatus::Error,
            format!("{key} was not run due to:\n{}", crash_text(origin, crash)),
        )
    }
}

fn crash_text(key: impl std::fmt::Display, crash: &EngineCrash) -> String {
    match crash.location() {
        Some(location) => {
            format!("FATAL ENGINE ERROR: {key}\n{location}\n{}", crash.message())
        }
        None => format!("FATAL ENGINE ERROR: {key}\n{}", crash.message()),
    }
}

/// A fatal crash as recorded in the report's `fatal_errors` section.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CrashRecord {
    /// The crash message, with paths rewritten relative to the working
    /// directory.
    pub message: String,
    /// `file:line` style crash location, if the engine reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// When the crash was observed.
    pub timestamp: DateTime<FixedOffset>,
}

impl CrashRecord {
    /// Creates a record for `crash`, stamped with the current time.
    pub fn new(crash: &EngineCrash) -> Self {
        Self {
            message: crash.message().to_owned(),
            location: crash.location().map(str::to_owned),
            timestamp: Local::now().fixed_offset(),
        }
    }
}

/// The `fatal_errors` side section: crash bookkeeping that must not count
/// as recorded test outcomes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FatalErrors {
    /// Crashes attributed to a specific test file (`testing` phase).
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub tests: IndexMap<Utf8PathBuf, Vec<CrashRecord>>,

    /// Crashes attributed to a non-testing phase, keyed by phase tag.
    #[serde(default, flatten)]
    pub phases: IndexMap<String, Vec<CrashRecord>>,
}

impl FatalErrors {
    /// Returns true if no crashes have been recorded.
    pub fn is_empty(&self) -> bool {
        self.tests.is_empty() && self.phases.is_empty()
    }
}

/// The full report document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// File path → ordered list of outcomes.
    #[serde(default)]
    pub byfile: IndexMap<Utf8PathBuf, Vec<OutcomeRecord>>,

    /// Crash bookkeeping, kept out of the outcome lists.
    #[serde(default, skip_serializing_if = "FatalErrors::is_empty")]
    pub fatal_errors: FatalErrors,
}

impl Report {
    /// Returns true if `key` has at least one recorded outcome.
    pub fn is_reported(&self, key: &Utf8Path) -> bool {
        self.byfile.get(key).is_some_and(|outcomes| !outcomes.is_empty())
    }

    /// Marks `key` as known (pending) without recording an outcome.
    pub fn ensure_known(&mut self, key: &Utf8Path) {
        self.byfile.entry(key.to_owned()).or_default();
    }

    /// Appends an outcome for `key`, creating the entry if needed.
    pub fn append(&mut self, key: &Utf8Path, outcome: OutcomeRecord) {
        self.byfile.entry(key.to_owned()).or_default().push(outcome);
    }

    /// Returns the keys that are known but have no recorded outcome yet.
    pub fn pending_files(&self) -> Vec<Utf8PathBuf> {
        self.byfile
            .iter()
            .filter(|(_, outcomes)| outcomes.is_empty())
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Records a `testing`-phase crash against `key` and returns the total
    /// number of crashes now attributed to it.
    pub fn record_test_crash(&mut self, key: &Utf8Path, record: CrashRecord) -> usize {
        let records = self.fatal_errors.tests.entry(key.to_owned()).or_default();
        records.push(record);
        records.len()
    }

    /// Records a crash against a non-testing phase and returns the total
    /// number of crashes now attributed to that phase.
    pub fn record_phase_crash(&mut self, phase: &str, record: CrashRecord) -> usize {
        let records = self.fatal_errors.phases.entry(phase.to_owned()).or_default();
        records.push(record);
        records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn pass_record(id: &str) -> OutcomeRecord {
        OutcomeRecord {
            id: id.to_owned(),
            address: id.to_owned(),
            status: TestStatus::Pass,
            stderr: String::new(),
            stdout: String::new(),
            time: 0.25,
            traceback: Vec::new(),
        }
    }

    #[test]
    fn serialized_shape_matches_report_format() {
        let mut report = Report::default();
        report.ensure_known(Utf8Path::new("tests/bTest.php"));
        report.append(Utf8Path::new("tests/aTest.php"), pass_record("ATest::testOne"));

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(
            value,
            json!({
                "byfile": {
                    "tests/bTest.php": [],
                    "tests/aTest.php": [{
                        "id": "ATest::testOne",
                        "address": "ATest::testOne",
                        "status": "pass",
                        "stderr": "",
                        "stdout": "",
                        "time": 0.25,
                        "traceback": [],
                    }],
                },
            })
        );
    }

    #[test]
    fn fatal_errors_round_trip_with_phase_keys() {
        let crash = EngineCrash::new("out of memory").with_location("tests/aTest.php:10");
        let mut report = Report::default();
        report.record_test_crash(Utf8Path::new("tests/aTest.php"), CrashRecord::new(&crash));
        report.record_phase_crash("init", CrashRecord::new(&crash));

        let value = serde_json::to_value(&report).unwrap();
        assert!(value["fatal_errors"]["tests"]["tests/aTest.php"].is_array());
        assert!(value["fatal_errors"]["init"].is_array());

        let parsed: Report = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, report);
    }

    #[test]
    fn empty_list_means_known_but_pending() {
        let mut report = Report::default();
        let key = Utf8Path::new("tests/aTest.php");
        assert!(!report.is_reported(key));

        report.ensure_known(key);
        assert!(!report.is_reported(key));
        assert_eq!(report.pending_files(), vec![key.to_owned()]);

        report.append(key, pass_record("ATest::testOne"));
        assert!(report.is_reported(key));
        assert!(report.pending_files().is_empty());
    }

    #[test]
    fn crash_counts_accumulate_per_file() {
        let crash = EngineCrash::new("boom");
        let mut report = Report::default();
        let key = Utf8Path::new("tests/aTest.php");
        assert_eq!(report.record_test_crash(key, CrashRecord::new(&crash)), 1);
        assert_eq!(report.record_test_crash(key, CrashRecord::new(&crash)), 2);
        // Crash records do not count as reported outcomes.
        assert!(!report.is_reported(key));
    }

    #[test]
    fn traceback_frames_keep_engine_extras() {
        let frame: TracebackFrame = serde_json::from_value(json!({
            "file": "tests/aTest.php",
            "line": 12,
            "function": "testOne",
        }))
        .unwrap();
        assert_eq!(frame.line, 12);
        assert_eq!(frame.extra["function"], json!("testOne"));

        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["function"], json!("testOne"));
    }
}
