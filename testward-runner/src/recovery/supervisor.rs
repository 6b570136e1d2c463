// Copyright (c) The testward Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::{ExecuteError, OrchestrateError},
    list::{SuiteDefinition, TestFileList},
    recovery::{self, RecoveryAction, StateFile},
    report::ReportStore,
    runner::{Executor, TestRunner},
    settings::RunSettings,
};
use tracing::{error, info, warn};

/// Whether the supervisor may re-invoke the orchestration after a fatal
/// crash.
///
/// `Disabled` models a host that cannot restart: instead of retrying, the
/// first fatal crash converts every unconfirmed file into a terminal error
/// outcome.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Restart after fatal crashes, within the retry budget.
    #[default]
    Enabled,
    /// Never restart; mark and exit on the first fatal crash.
    Disabled,
}

/// Owns the bounded restart loop around the orchestration.
///
/// One call to [`run`](Self::run) is one chain: it keeps re-invoking the
/// core orchestration with the same settings plus updated run state until
/// the run completes normally or recovery declares it terminal. This is
/// the in-process equivalent of a crashing process replacing itself with a
/// fresh invocation of the same command line.
pub struct Supervisor<'a> {
    settings: &'a RunSettings,
    restart_policy: RestartPolicy,
}

impl<'a> Supervisor<'a> {
    /// Creates a supervisor with restarts enabled.
    pub fn new(settings: &'a RunSettings) -> Self {
        Self { settings, restart_policy: RestartPolicy::default() }
    }

    /// Overrides the restart policy.
    pub fn restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart_policy = policy;
        self
    }

    /// Runs the chain to completion and returns the final exit code.
    pub fn run(&self, executor: &mut dyn Executor) -> Result<i32, OrchestrateError> {
        let store = ReportStore::new(self.settings.output_path.clone());
        let mut state_file = StateFile::open(self.settings)?;
        if state_file.resumed() {
            info!(
                "resuming interrupted run (attempt {})",
                state_file.state().attempt
            );
        }

        loop {
            state_file.set_init()?;

            // Re-enumerated every attempt, exactly as a true process
            // restart would; enumeration is deterministic for a fixed
            // suite definition and filesystem state.
            let list = self.enumerate()?;
            let runner = TestRunner::new(self.settings, &list, &store);

            match runner.execute(executor, &mut state_file) {
                Ok(exit_code) => {
                    // A forced code from a crashed earlier attempt wins
                    // outright, so the chain surfaces the worst outcome.
                    let exit_code =
                        state_file.state().forced_exit_code.unwrap_or(exit_code);
                    state_file.remove()?;
                    return Ok(exit_code);
                }
                Err(ExecuteError::Crash(crash)) => {
                    error!("fatal engine crash: {}", crash.message());
                    let restart_supported = self.restart_policy == RestartPolicy::Enabled;
                    match recovery::handle_fatal(
                        &store,
                        &mut state_file,
                        &crash,
                        restart_supported,
                    )? {
                        RecoveryAction::Restart => {
                            warn!(
                                "restarting run (attempt {})",
                                state_file.state().attempt
                            );
                        }
                        RecoveryAction::Terminate { exit_code } => {
                            state_file.remove()?;
                            return Ok(exit_code);
                        }
                    }
                }
                Err(ExecuteError::Store(error)) => return Err(error.into()),
                Err(ExecuteError::State(error)) => return Err(error.into()),
            }
        }
    }

    fn enumerate(&self) -> Result<TestFileList, OrchestrateError> {
        let definition = match &self.settings.suite_path {
            Some(path) => SuiteDefinition::from_file(path)?,
            None => SuiteDefinition::default(),
        };
        Ok(TestFileList::enumerate(&definition, self.settings))
    }
}
