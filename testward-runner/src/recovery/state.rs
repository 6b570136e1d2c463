// Copyright (c) The testward Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{errors::RunStateError, settings::RunSettings};
use atomicwrites::{AllowOverwrite, AtomicFile};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, FixedOffset, Local};
use serde::{Deserialize, Serialize};
use std::{fmt, fs, io, io::Write};
use tracing::warn;

/// The phase an invocation is in, as recorded in the run state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RunPhase {
    /// No test has started yet.
    Init,
    /// A specific file is mid-execution (see
    /// [`RunState::current_file`]).
    Testing,
    /// Any other externally-tagged phase, e.g. an engine bootstrap step.
    Custom(String),
}

impl RunPhase {
    /// Returns the phase tag as recorded on disk.
    pub fn as_str(&self) -> &str {
        match self {
            RunPhase::Init => "init",
            RunPhase::Testing => "testing",
            RunPhase::Custom(tag) => tag,
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for RunPhase {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "init" => RunPhase::Init,
            "testing" => RunPhase::Testing,
            _ => RunPhase::Custom(tag),
        }
    }
}

impl From<RunPhase> for String {
    fn from(phase: RunPhase) -> Self {
        phase.as_str().to_owned()
    }
}

/// Process-wide run state, persisted to a side-channel file.
///
/// A crash prevents any in-memory handoff, so everything a replacement
/// invocation needs lives here, written immediately before each risky
/// operation. File paths are stored relative to `working_dir`, matching
/// the report keys.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    /// Current phase tag.
    pub phase: RunPhase,

    /// The file currently being executed, when in the `testing` phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_file: Option<Utf8PathBuf>,

    /// 1-based attempt number within the restart chain.
    pub attempt: u32,

    /// Exit code that must win over whatever a later attempt reports.
    /// Published before each restart so a chain that dies mid-way still
    /// reports failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forced_exit_code: Option<i32>,

    /// The working-directory root for this chain.
    pub working_dir: Utf8PathBuf,

    /// The report file this chain writes to.
    pub output_file: Utf8PathBuf,

    /// Fatal-retry budget per file and per phase.
    pub max_fatal_retries: u32,

    /// When the chain started.
    pub started_at: DateTime<FixedOffset>,
}

/// Handle on the persisted [`RunState`]: every mutation goes straight to
/// disk.
#[derive(Debug)]
pub struct StateFile {
    path: Utf8PathBuf,
    state: RunState,
    resumed: bool,
}

impl StateFile {
    /// The side-channel path for a given report file.
    pub fn side_channel_path(output_file: &Utf8Path) -> Utf8PathBuf {
        output_file.with_extension("state.json")
    }

    /// Opens the state for `settings`, resuming a previous chain if its
    /// state file is still present, and persists the result immediately.
    ///
    /// A corrupt state file is logged and replaced by a fresh one; like
    /// report corruption, it must never block the run.
    pub fn open(settings: &RunSettings) -> Result<Self, RunStateError> {
        let path = Self::side_channel_path(&settings.output_path);
        let (state, resumed) = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RunState>(&contents) {
                Ok(state) => (state, true),
                Err(error) => {
                    warn!("run state at {path} is not valid JSON, starting fresh: {error}");
                    (Self::fresh(settings), false)
                }
            },
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                (Self::fresh(settings), false)
            }
            Err(error) => {
                warn!("run state at {path} could not be read, starting fresh: {error}");
                (Self::fresh(settings), false)
            }
        };
        let state_file = Self { path, state, resumed };
        state_file.persist()?;
        Ok(state_file)
    }

    fn fresh(settings: &RunSettings) -> RunState {
        RunState {
            phase: RunPhase::Init,
            current_file: None,
            attempt: 1,
            forced_exit_code: None,
            working_dir: settings.working_dir.clone(),
            output_file: settings.output_path.clone(),
            max_fatal_retries: settings.max_fatal_retries,
            started_at: Local::now().fixed_offset(),
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// True if this chain picked up a state file left by an earlier
    /// invocation.
    pub fn resumed(&self) -> bool {
        self.resumed
    }

    /// Enters the `init` phase.
    pub fn set_init(&mut self) -> Result<(), RunStateError> {
        self.state.phase = RunPhase::Init;
        self.state.current_file = None;
        self.persist()
    }

    /// Enters the `testing` phase with `file` as the current file.
    pub fn set_testing(&mut self, file: &Utf8Path) -> Result<(), RunStateError> {
        self.state.phase = RunPhase::Testing;
        self.state.current_file = Some(file.to_owned());
        self.persist()
    }

    /// Enters a custom phase.
    pub fn set_custom_phase(&mut self, tag: &str) -> Result<(), RunStateError> {
        self.state.phase = RunPhase::Custom(tag.to_owned());
        self.state.current_file = None;
        self.persist()
    }

    /// Publishes the forced exit code for the rest of the chain.
    pub fn set_forced_exit_code(&mut self, code: i32) -> Result<(), RunStateError> {
        self.state.forced_exit_code = Some(code);
        self.persist()
    }

    /// Starts the next attempt of the chain.
    pub fn begin_next_attempt(&mut self) -> Result<(), RunStateError> {
        self.state.attempt += 1;
        self.state.phase = RunPhase::Init;
        self.state.current_file = None;
        self.persist()
    }

    /// Removes the state file; the chain is over.
    pub fn remove(self) -> Result<(), RunStateError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(RunStateError::Remove { path: self.path, error }),
        }
    }

    fn persist(&self) -> Result<(), RunStateError> {
        let json = serde_json::to_string_pretty(&self.state).map_err(|error| {
            RunStateError::Serialize { path: self.path.clone(), error }
        })?;
        AtomicFile::new(&self.path, AllowOverwrite)
            .write(|file| file.write_all(json.as_bytes()))
            .map_err(|error| RunStateError::Write { path: self.path.clone(), error })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::RunSettingsBuilder;
    use camino_tempfile::Utf8TempDir;
    use pretty_assertions::assert_eq;

    fn settings(dir: &Utf8TempDir) -> RunSettings {
        RunSettingsBuilder::new(dir.path(), dir.path().join("report.json")).build().unwrap()
    }

    #[test]
    fn phase_tags_round_trip() {
        for (phase, tag) in [
            (RunPhase::Init, "\"init\""),
            (RunPhase::Testing, "\"testing\""),
            (RunPhase::Custom("bootstrap".to_owned()), "\"bootstrap\""),
        ] {
            assert_eq!(serde_json::to_string(&phase).unwrap(), tag);
            assert_eq!(serde_json::from_str::<RunPhase>(tag).unwrap(), phase);
        }
    }

    #[test]
    fn fresh_state_is_persisted_on_open() {
        let dir = Utf8TempDir::new().unwrap();
        let settings = settings(&dir);
        let state_file = StateFile::open(&settings).unwrap();
        assert!(!state_file.resumed());
        assert_eq!(state_file.state().phase, RunPhase::Init);
        assert_eq!(state_file.state().attempt, 1);
        assert!(StateFile::side_channel_path(&settings.output_path).exists());
    }

    #[test]
    fn reopening_resumes_the_chain() {
        let dir = Utf8TempDir::new().unwrap();
        let settings = settings(&dir);

        let mut first = StateFile::open(&settings).unwrap();
        first.set_testing(Utf8Path::new("tests/aTest.php")).unwrap();
        first.set_forced_exit_code(6).unwrap();

        // A new handle stands in for the replacement process.
        let second = StateFile::open(&settings).unwrap();
        assert!(second.resumed());
        assert_eq!(second.state().phase, RunPhase::Testing);
        assert_eq!(
            second.state().current_file.as_deref(),
            Some(Utf8Path::new("tests/aTest.php"))
        );
        assert_eq!(second.state().forced_exit_code, Some(6));
    }

    #[test]
    fn corrupt_state_starts_fresh() {
        let dir = Utf8TempDir::new().unwrap();
        let settings = settings(&dir);
        fs::write(StateFile::side_channel_path(&settings.output_path), "{oops").unwrap();
        let state_file = StateFile::open(&settings).unwrap();
        assert!(!state_file.resumed());
        assert_eq!(state_file.state().attempt, 1);
    }

    #[test]
    fn remove_deletes_the_side_channel() {
        let dir = Utf8TempDir::new().unwrap();
        let settings = settings(&dir);
        let state_file = StateFile::open(&settings).unwrap();
        let path = StateFile::side_channel_path(&settings.output_path);
        assert!(path.exists());
        state_file.remove().unwrap();
        assert!(!path.exists());
    }
}
