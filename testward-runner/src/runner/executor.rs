// Copyright (c) The testward Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::ExecuteError,
    report::{TestStatus, TracebackFrame},
};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// The run configuration handed to an executor: the ordered files to run
/// plus the metadata retained from their declarations.
///
/// This is the engine-native analog of the suite definition, rebuilt for
/// exactly the work remaining in this dispatch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorSpec {
    /// Files to run, in execution order.
    pub entries: Vec<SpecEntry>,
}

/// One file in an [`ExecutorSpec`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecEntry {
    /// Absolute path of the test file.
    pub path: Utf8PathBuf,
    /// Declaration metadata (engine version constraints, custom flags).
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub metadata: IndexMap<String, String>,
}

/// A single test case result, as reported by the engine.
///
/// Output streams are raw bytes: engines capture output of unknown
/// encoding, and normalization happens when the outcome is written to the
/// report.
#[derive(Clone, Debug, PartialEq)]
pub struct CaseResult {
    /// Test identifier (typically `Class::method`).
    pub id: String,
    /// Display address of the test.
    pub address: String,
    /// Execution status.
    pub status: TestStatus,
    /// Captured stdout.
    pub stdout: Vec<u8>,
    /// Captured stderr.
    pub stderr: Vec<u8>,
    /// Elapsed time in seconds.
    pub time: f64,
    /// Captured stack frames, innermost first.
    pub traceback: Vec<TracebackFrame>,
}

/// Callbacks through which an executor streams progress back to the
/// orchestrator.
///
/// `file_started` must be invoked before the engine touches each file: it
/// is what keeps the persisted run state accurate enough for crash recovery
/// to attribute a fatal error to the right file.
pub trait OutcomeSink {
    /// The engine entered a non-testing phase (e.g. bootstrap).
    fn phase_started(&mut self, phase: &str) -> Result<(), ExecuteError>;

    /// The engine is about to execute tests in `file`.
    fn file_started(&mut self, file: &Utf8Path) -> Result<(), ExecuteError>;

    /// A test case in `file` finished.
    fn case_finished(&mut self, file: &Utf8Path, result: CaseResult) -> Result<(), ExecuteError>;
}

/// The test-execution engine, seen from the orchestrator.
pub trait Executor {
    /// Runs the files in `spec`, streaming progress through `sink`.
    ///
    /// Returns the engine's exit code on a normal return. A fatal crash of
    /// the engine surfaces as [`ExecuteError::Crash`]; any results already
    /// streamed through the sink remain recorded.
    fn execute(
        &mut self,
        spec: &ExecutorSpec,
        sink: &mut dyn OutcomeSink,
    ) -> Result<i32, ExecuteError>;

    /// Enumerates the individual test case identifiers in `file`, if the
    /// engine supports inspection.
    ///
    /// This is an optional capability used only to produce richer
    /// per-case skip notices; `None` falls back to one notice per file.
    fn case_ids(&mut self, file: &Utf8Path) -> Option<Vec<String>> {
        let _ = file;
        None
    }
}

impl ExecutorSpec {
    /// Builds a spec from `(path, metadata)` pairs, preserving order.
    pub fn new<'a>(
        entries: impl IntoIterator<Item = (&'a Utf8Path, &'a IndexMap<String, String>)>,
    ) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|(path, metadata)| SpecEntry {
                    path: path.to_owned(),
                    metadata: metadata.clone(),
                })
                .collect(),
        }
    }
}
