// Copyright (c) The testward Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fatal-crash recovery: the state machine that turns an abrupt engine
//! death into either a restart of the chain or terminal report entries.

mod state;
mod supervisor;

pub use state::{RunPhase, RunState, StateFile};
pub use supervisor::{RestartPolicy, Supervisor};

use crate::{
    errors::{EngineCrash, OrchestrateError},
    exit_codes::TestwardExitCode,
    helpers,
    report::{CrashRecord, OutcomeRecord, ReportStore},
};
use camino::Utf8PathBuf;
use tracing::warn;

/// What the supervisor should do after a fatal crash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Re-invoke the orchestration with the same settings. The sentinel
    /// exit code has already been published to the run state.
    Restart,

    /// The chain is over; exit with this code.
    Terminate {
        /// The final exit code.
        exit_code: i32,
    },
}

/// Classifies a fatal engine crash and updates the report accordingly.
///
/// In the `testing` phase the crash is charged to the current file; in any
/// other phase it is charged to the phase itself. Either way the crash
/// record goes to the report's `fatal_errors` section, so that a retried
/// file still looks pending to the next attempt. Once a counter reaches
/// the retry budget the crash becomes a permanent error outcome.
///
/// With `restart_supported` false there is no next attempt, so every file
/// that cannot be confirmed as executed is converted to a terminal error
/// outcome instead of being left to look skipped.
pub fn handle_fatal(
    store: &ReportStore,
    state_file: &mut StateFile,
    crash: &EngineCrash,
    restart_supported: bool,
) -> Result<RecoveryAction, OrchestrateError> {
    let state = state_file.state();
    let working_dir = state.working_dir.clone();
    let max_retries = state.max_fatal_retries as usize;

    // Paths in persisted crash messages are rewritten relative to the
    // working-directory root.
    let mut sanitized = EngineCrash::new(helpers::strip_root_in_text(crash.message(), &working_dir));
    if let Some(location) = crash.location() {
        sanitized = sanitized.with_location(helpers::strip_root_in_text(location, &working_dir));
    }
    let record = CrashRecord::new(&sanitized);

    let current_file = match (&state.phase, &state.current_file) {
        (RunPhase::Testing, Some(file)) => Some(file.clone()),
        _ => None,
    };
    let phase = state.phase.clone();

    let mut report = store.read();
    let action = match current_file {
        Some(file) => {
            let count = report.record_test_crash(&file, record);
            let exhausted = count >= max_retries;
            if exhausted {
                warn!("giving up on {file} after {count} fatal crash(es)");
                report.append(&file, OutcomeRecord::crash_error(&file, &sanitized));
            }
            if !restart_supported {
                if !exhausted {
                    // No retry will ever happen; the crash is this file's
                    // terminal outcome.
                    report.append(&file, OutcomeRecord::crash_error(&file, &sanitized));
                }
                sweep_pending(&mut report, file.as_str(), &sanitized);
                RecoveryAction::Terminate { exit_code: TestwardExitCode::FATAL_CRASH }
            } else if exhausted && report.pending_files().is_empty() {
                // Nothing left that a restart could make progress on.
                RecoveryAction::Terminate { exit_code: TestwardExitCode::FATAL_CRASH }
            } else {
                RecoveryAction::Restart
            }
        }
        None => {
            let count = report.record_phase_crash(phase.as_str(), record);
            if restart_supported && count < max_retries {
                RecoveryAction::Restart
            } else {
                // Terminal for this phase: no further restart attempts.
                if count >= max_retries {
                    warn!("giving up on {phase} phase after {count} fatal crash(es)");
                }
                sweep_pending(&mut report, &format!("{phase} phase"), &sanitized);
                RecoveryAction::Terminate { exit_code: TestwardExitCode::FATAL_CRASH }
            }
        }
    };
    store.write(&report)?;

    if action == RecoveryAction::Restart {
        // Publish failure before restarting, so the chain reports it even
        // if the next attempt is itself killed before setting a code.
        state_file.set_forced_exit_code(TestwardExitCode::FATAL_CRASH)?;
        state_file.begin_next_attempt()?;
    }
    Ok(action)
}

/// Converts every still-pending report entry into a terminal error outcome
/// referencing the original crash.
fn sweep_pending(report: &mut crate::report::Report, origin: &str, crash: &EngineCrash) {
    let pending: Vec<Utf8PathBuf> = report.pending_files();
    for key in pending {
        report.append(&key, OutcomeRecord::not_run_error(&key, origin, crash));
    }
}
