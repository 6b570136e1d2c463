// Copyright (c) The testward Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use testward_runner::{
    errors::{OrchestrateError, SettingsError, SuiteParseError},
    exit_codes::TestwardExitCode,
};
use thiserror::Error;
use tracing::error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

/// An expected failure of a testward invocation, mapped to a documented
/// exit code.
#[derive(Debug, Error)]
pub enum ExpectedError {
    /// The working directory could not be determined.
    #[error("could not determine the current directory")]
    CurrentDirInvalid {
        /// The underlying I/O error, absent if the path was not UTF-8.
        #[source]
        err: Option<std::io::Error>,
    },

    /// The invocation was misconfigured.
    #[error("configuration error")]
    Settings {
        /// The underlying error.
        #[from]
        err: SettingsError,
    },

    /// The engine command line could not be parsed.
    #[error("engine command could not be parsed")]
    EngineCommandInvalid {
        /// The underlying error.
        #[source]
        err: shell_words::ParseError,
    },

    /// The suite definition could not be loaded.
    #[error("suite definition error")]
    SuiteParse {
        /// The underlying error.
        #[from]
        err: SuiteParseError,
    },

    /// Orchestration failed outside of engine crashes (which are handled
    /// by the recovery chain, not reported here).
    #[error("orchestration error")]
    Orchestrate {
        /// The underlying error.
        #[from]
        err: OrchestrateError,
    },
}

impl ExpectedError {
    /// The process exit code for this error.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::CurrentDirInvalid { .. }
            | Self::Settings { .. }
            | Self::EngineCommandInvalid { .. }
            | Self::SuiteParse { .. }
            | Self::Orchestrate { err: OrchestrateError::Suite(_) } => {
                TestwardExitCode::SETUP_ERROR
            }
            Self::Orchestrate { .. } => TestwardExitCode::REPORT_WRITE_FAILED,
        }
    }

    /// Logs this error and its cause chain to stderr.
    pub fn display_to_stderr(&self) {
        error!("{self}");
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            error!("  caused by: {cause}");
            source = cause.source();
        }
    }
}
