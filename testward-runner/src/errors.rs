// Copyright (c) The testward Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by testward.

use camino::Utf8PathBuf;
use std::io;
use thiserror::Error;

/// An error that occurred while reading or parsing a suite definition file.
#[derive(Debug, Error)]
#[error("failed to load suite definition at `{path}`")]
pub struct SuiteParseError {
    path: Utf8PathBuf,
    #[source]
    kind: SuiteParseErrorKind,
}

impl SuiteParseError {
    pub(crate) fn new(path: impl Into<Utf8PathBuf>, kind: SuiteParseErrorKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    /// Returns the path to the suite definition file.
    pub fn path(&self) -> &Utf8PathBuf {
        &self.path
    }
}

/// The ways loading a suite definition can fail.
///
/// Forms part of [`SuiteParseError`].
#[derive(Debug, Error)]
pub enum SuiteParseErrorKind {
    /// The file could not be read.
    #[error("error reading file")]
    Read(#[source] io::Error),

    /// The file is not well-formed XML.
    #[error("error parsing XML")]
    Xml(#[source] quick_xml::Error),
}

/// An error that occurred while building [`RunSettings`](crate::settings::RunSettings).
///
/// These are configuration errors: they are surfaced before any test
/// execution begins and are not retryable.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The maximum fatal-retry count must be at least 1.
    #[error("max fatal retries must be at least 1 (got {value})")]
    MaxRetriesOutOfRange {
        /// The value that was supplied.
        value: u32,
    },

    /// The directory meant to hold the report file does not exist.
    #[error("report output directory does not exist: `{dir}`")]
    OutputDirMissing {
        /// The missing directory.
        dir: Utf8PathBuf,
    },

    /// The report file location could not be written to.
    #[error("report output file is not writable: `{path}`")]
    OutputNotWritable {
        /// The report file path.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        error: io::Error,
    },

    /// A test file named on the command line does not exist.
    #[error("test file does not exist: `{path}`")]
    TestFileMissing {
        /// The missing file.
        path: Utf8PathBuf,
    },

    /// The priority manifest could not be read.
    #[error("failed to read priority manifest at `{path}`")]
    PriorityManifestRead {
        /// The manifest path.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        error: io::Error,
    },

    /// The engine command line was empty.
    #[error("engine command is empty")]
    EngineCommandEmpty,
}

/// An error that occurred while writing the report file.
///
/// Note that *reading* a corrupt or missing report is not an error: the
/// store logs a warning and continues with an empty report instead.
#[derive(Debug, Error)]
pub enum ReportStoreError {
    /// The report could not be serialized to JSON.
    #[error("failed to serialize report for `{path}`")]
    Serialize {
        /// The report file path.
        path: Utf8PathBuf,
        /// The underlying serialization error.
        #[source]
        error: serde_json::Error,
    },

    /// The report file could not be written.
    #[error("failed to write report to `{path}`")]
    Write {
        /// The report file path.
        path: Utf8PathBuf,
        /// The underlying write error.
        #[source]
        error: atomicwrites::Error<io::Error>,
    },
}

/// An error that occurred while persisting or removing the run-state file.
#[derive(Debug, Error)]
pub enum RunStateError {
    /// The run state could not be serialized to JSON.
    #[error("failed to serialize run state for `{path}`")]
    Serialize {
        /// The state file path.
        path: Utf8PathBuf,
        /// The underlying serialization error.
        #[source]
        error: serde_json::Error,
    },

    /// The state file could not be written.
    #[error("failed to write run state to `{path}`")]
    Write {
        /// The state file path.
        path: Utf8PathBuf,
        /// The underlying write error.
        #[source]
        error: atomicwrites::Error<io::Error>,
    },

    /// The state file could not be removed after a completed chain.
    #[error("failed to remove run state at `{path}`")]
    Remove {
        /// The state file path.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        error: io::Error,
    },
}

/// A fatal crash of the test-execution engine.
///
/// This is the unrecoverable error class: the engine died without reporting
/// results for the work it was given. Recovery is driven by
/// [`recovery`](crate::recovery), not by the caller that observed the crash.
#[derive(Clone, Debug, Error)]
#[error("fatal engine crash: {message}")]
pub struct EngineCrash {
    message: String,
    location: Option<String>,
}

impl EngineCrash {
    /// Creates a new `EngineCrash` with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            location: None,
        }
    }

    /// Attaches a `file:line` style location to the crash.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Returns the crash message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the crash location, if the engine reported one.
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }
}

/// An error produced while executing tests through an
/// [`Executor`](crate::runner::Executor).
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// The engine crashed fatally.
    #[error(transparent)]
    Crash(#[from] EngineCrash),

    /// Streaming an outcome into the report store failed.
    #[error(transparent)]
    Store(#[from] ReportStoreError),

    /// Persisting the run state failed.
    #[error(transparent)]
    State(#[from] RunStateError),
}

/// An error produced by the orchestration supervisor.
///
/// Fatal engine crashes never surface here: the supervisor consumes them
/// and either restarts the run or converts them into report entries.
#[derive(Debug, Error)]
pub enum OrchestrateError {
    /// The suite definition could not be loaded.
    #[error(transparent)]
    Suite(#[from] SuiteParseError),

    /// Writing the report failed.
    #[error(transparent)]
    Store(#[from] ReportStoreError),

    /// Persisting the run state failed.
    #[error(transparent)]
    State(#[from] RunStateError),
}
