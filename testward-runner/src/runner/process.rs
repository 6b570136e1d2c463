// Copyright (c) The testward Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::{EngineCrash, ExecuteError, SettingsError},
    report::{TestStatus, TracebackFrame},
    runner::{CaseResult, Executor, ExecutorSpec, OutcomeSink},
};
use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::Builder;
use duct::cmd;
use std::io::{BufRead, BufReader};
use tracing::debug;

/// Exit code conventionally produced by engines dying from a fatal runtime
/// error (as opposed to reporting test failures).
const ENGINE_FATAL_EXIT: i32 = 255;

/// An [`Executor`] that runs the engine as a subprocess.
///
/// The spec is written to a temporary JSON file and passed via `--spec`.
/// The engine reports progress as JSON lines on stdout:
///
/// ```text
/// {"type":"phase","name":"bootstrap"}
/// {"type":"file-started","file":"/abs/tests/aTest.php"}
/// {"type":"case","file":"/abs/tests/aTest.php","id":"ATest::testOne","address":"ATest::testOne","status":"pass","time":0.02}
/// {"type":"fatal","message":"out of memory","location":"tests/aTest.php:17"}
/// ```
///
/// Anything that is not a protocol line passes through untouched. The
/// engine's stderr is inherited, not captured: fatal-crash details travel
/// through the `fatal` event and the exit status.
#[derive(Clone, Debug)]
pub struct ProcessExecutor {
    program: String,
    args: Vec<String>,
}

impl ProcessExecutor {
    /// Creates an executor from an argv-style command line.
    pub fn new(command: impl IntoIterator<Item = impl Into<String>>) -> Result<Self, SettingsError> {
        let mut argv = command.into_iter().map(Into::into);
        let Some(program) = argv.next() else {
            return Err(SettingsError::EngineCommandEmpty);
        };
        Ok(Self { program, args: argv.collect() })
    }
}

impl Executor for ProcessExecutor {
    fn execute(
        &mut self,
        spec: &ExecutorSpec,
        sink: &mut dyn OutcomeSink,
    ) -> Result<i32, ExecuteError> {
        let spec_file = write_spec_file(spec)?;

        let mut args = self.args.clone();
        args.push("--spec".to_owned());
        args.push(spec_file.path().as_str().to_owned());

        let handle = cmd(&self.program, &args).unchecked().reader().map_err(|error| {
            EngineCrash::new(format!("failed to launch engine `{}`: {error}", self.program))
        })?;

        let mut last_fatal: Option<EngineCrash> = None;
        let mut reader = BufReader::new(handle);
        let mut line = String::new();
        loop {
            line.clear();
            let read = reader.read_line(&mut line).map_err(|error| {
                EngineCrash::new(format!("lost contact with engine: {error}"))
            })?;
            if read == 0 {
                break;
            }
            let line = line.trim_end();
            match serde_json::from_str::<EngineEvent>(line) {
                Ok(EngineEvent::Phase { name }) => sink.phase_started(&name)?,
                Ok(EngineEvent::FileStarted { file }) => sink.file_started(&file)?,
                Ok(EngineEvent::Case { file, case }) => {
                    sink.case_finished(&file, case.into_result())?;
                }
                Ok(EngineEvent::Fatal { message, location }) => {
                    let mut crash = EngineCrash::new(message);
                    if let Some(location) = location {
                        crash = crash.with_location(location);
                    }
                    last_fatal = Some(crash);
                }
                // Not a protocol line; let the engine talk to the console.
                Err(_) => debug!("engine: {line}"),
            }
        }

        let handle = reader.into_inner();
        let status = match handle.try_wait() {
            Ok(Some(output)) => output.status,
            Ok(None) => {
                return Err(EngineCrash::new(
                    "engine closed its output stream without exiting",
                )
                .into());
            }
            Err(error) => {
                return Err(
                    EngineCrash::new(format!("failed to collect engine status: {error}")).into()
                );
            }
        };

        if let Some(crash) = classify_exit(status, last_fatal) {
            return Err(crash.into());
        }
        Ok(status.code().unwrap_or(1))
    }

    fn case_ids(&mut self, file: &Utf8Path) -> Option<Vec<String>> {
        let mut args = self.args.clone();
        args.push("--list-cases".to_owned());
        args.push(file.as_str().to_owned());
        let output = cmd(&self.program, &args).stderr_null().read().ok()?;
        let ids: Vec<String> = output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect();
        (!ids.is_empty()).then_some(ids)
    }
}

/// Decides whether an exit status is the fatal-crash class.
fn classify_exit(
    status: std::process::ExitStatus,
    last_fatal: Option<EngineCrash>,
) -> Option<EngineCrash> {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Some(last_fatal.unwrap_or_else(|| {
                EngineCrash::new(format!("engine terminated by signal {signal}"))
            }));
        }
    }
    if status.code() == Some(ENGINE_FATAL_EXIT) {
        return Some(
            last_fatal
                .unwrap_or_else(|| EngineCrash::new("engine died from a fatal runtime error")),
        );
    }
    None
}

fn write_spec_file(spec: &ExecutorSpec) -> Result<camino_tempfile::NamedUtf8TempFile, EngineCrash> {
    let json = serde_json::to_string_pretty(spec)
        .map_err(|error| EngineCrash::new(format!("failed to serialize executor spec: {error}")))?;
    let file = Builder::new()
        .prefix("testward-spec-")
        .suffix(".json")
        .tempfile()
        .map_err(|error| EngineCrash::new(format!("failed to create spec file: {error}")))?;
    std::fs::write(file.path(), json)
        .map_err(|error| EngineCrash::new(format!("failed to write spec file: {error}")))?;
    Ok(file)
}

/// One line of the engine's stdout protocol.
#[derive(Debug, serde::Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum EngineEvent {
    Phase {
        name: String,
    },
    FileStarted {
        file: Utf8PathBuf,
    },
    Case {
        file: Utf8PathBuf,
        #[serde(flatten)]
        case: WireCase,
    },
    Fatal {
        message: String,
        #[serde(default)]
        location: Option<String>,
    },
}

#[derive(Debug, serde::Deserialize)]
struct WireCase {
    id: String,
    address: String,
    status: TestStatus,
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    #[serde(default)]
    time: f64,
    #[serde(default)]
    traceback: Vec<TracebackFrame>,
}

impl WireCase {
    fn into_result(self) -> CaseResult {
        CaseResult {
            id: self.id,
            address: self.address,
            status: self.status,
            stdout: self.stdout.into_bytes(),
            stderr: self.stderr.into_bytes(),
            time: self.time,
            traceback: self.traceback,
        }
    }
}
