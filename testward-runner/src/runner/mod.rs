// Copyright (c) The testward Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The run orchestrator: reconciles enumerated files against the persisted
//! report, dispatches the remaining work to the executor, and converts
//! silently-untouched files into explicit skip outcomes.

mod executor;
mod process;

pub use executor::{CaseResult, Executor, ExecutorSpec, OutcomeSink, SpecEntry};
pub use process::ProcessExecutor;

use crate::{
    errors::ExecuteError,
    helpers,
    list::{TestFileEntry, TestFileList},
    recovery::StateFile,
    report::{OutcomeRecord, ReportStore},
    settings::RunSettings,
};
use camino::Utf8Path;
use tracing::info;

/// Drives one orchestration attempt over an enumerated file list.
///
/// The runner never retries: fatal crashes propagate to the supervisor in
/// [`recovery`](crate::recovery), which owns the restart loop.
pub struct TestRunner<'a> {
    settings: &'a RunSettings,
    list: &'a TestFileList,
    store: &'a ReportStore,
}

impl<'a> TestRunner<'a> {
    /// Creates a runner over `list`, recording into `store`.
    pub fn new(settings: &'a RunSettings, list: &'a TestFileList, store: &'a ReportStore) -> Self {
        Self { settings, list, store }
    }

    /// Runs everything that still needs running and returns the engine exit
    /// code (0 if there was nothing left to do).
    pub fn execute(
        &self,
        executor: &mut dyn Executor,
        state: &mut StateFile,
    ) -> Result<i32, ExecuteError> {
        let work = self.reconcile(executor)?;
        if work.is_empty() {
            info!("no test files found or all test files have already been reported");
            self.log_skipped();
            return Ok(0);
        }

        let exit_code = self.dispatch(executor, state, &work)?;

        // The executor returned normally, so anything still unreported was
        // filtered out inside the engine rather than lost to a crash.
        let mut report = self.store.read();
        let mut filtered = Vec::new();
        for entry in &work {
            let key = self.settings.report_key(&entry.path);
            if !report.is_reported(&key) {
                report.byfile.insert(key.clone(), vec![OutcomeRecord::filtered_skip(&key)]);
                filtered.push(key);
            }
        }
        if !filtered.is_empty() {
            self.store.write(&report)?;
            for key in &filtered {
                info!("engine filtered out {key}, recorded as skipped");
            }
        }

        self.log_skipped();
        Ok(exit_code)
    }

    /// First reconciliation pass: decides the minimal remaining work and
    /// pre-populates the report with pending placeholders and exclusion
    /// skip notices.
    fn reconcile(
        &self,
        executor: &mut dyn Executor,
    ) -> Result<Vec<&'a TestFileEntry>, ExecuteError> {
        let mut report = self.store.read();
        let mut work = Vec::new();
        let mut previously_run = Vec::new();

        for entry in &self.list.runnable {
            let key = self.settings.report_key(&entry.path);
            if report.is_reported(&key) {
                previously_run.push(key);
            } else {
                // The pending placeholder is what later distinguishes
                // "engine never touched this file" from "not part of this
                // run".
                report.ensure_known(&key);
                work.push(entry);
            }
        }

        for entry in &self.list.excluded {
            let key = self.settings.report_key(&entry.path);
            if report.is_reported(&key) {
                continue;
            }
            let outcomes = match executor.case_ids(&entry.path) {
                Some(ids) if !ids.is_empty() => {
                    ids.iter().map(|id| OutcomeRecord::excluded_case_skip(&key, id)).collect()
                }
                _ => vec![OutcomeRecord::excluded_skip(&key)],
            };
            report.byfile.insert(key, outcomes);
        }

        self.store.write(&report)?;

        for key in &previously_run {
            info!("already reported by a previous attempt: {key}");
        }
        Ok(work)
    }

    fn dispatch(
        &self,
        executor: &mut dyn Executor,
        state: &mut StateFile,
        work: &[&TestFileEntry],
    ) -> Result<i32, ExecuteError> {
        let mut sink = ReportSink { settings: self.settings, store: self.store, state };

        if self.settings.split {
            let mut exit_code = 0;
            for entry in work {
                let key = self.settings.report_key(&entry.path);
                info!("running tests in: {key}");
                sink.state.set_testing(&key)?;
                let spec = ExecutorSpec::new([(entry.path.as_path(), &entry.metadata)]);
                let code = executor.execute(&spec, &mut sink)?;
                // The first non-zero exit code wins and is retained.
                if exit_code == 0 {
                    exit_code = code;
                }
            }
            Ok(exit_code)
        } else {
            // Note the first file before handing over, in case the engine
            // dies before reporting any progress of its own.
            if let Some(entry) = work.first() {
                let key = self.settings.report_key(&entry.path);
                sink.state.set_testing(&key)?;
            }
            let spec =
                ExecutorSpec::new(work.iter().map(|entry| (entry.path.as_path(), &entry.metadata)));
            executor.execute(&spec, &mut sink)
        }
    }

    fn log_skipped(&self) {
        if self.list.excluded.is_empty() {
            return;
        }
        info!("skipped files:");
        for entry in &self.list.excluded {
            info!("  excluded by suite definition: {}", self.settings.report_key(&entry.path));
        }
    }
}

/// The orchestrator's [`OutcomeSink`]: streams every result straight into
/// the report store and keeps the persisted run state pointing at whatever
/// the engine is currently doing.
struct ReportSink<'a, 'st> {
    settings: &'a RunSettings,
    store: &'a ReportStore,
    state: &'st mut StateFile,
}

impl OutcomeSink for ReportSink<'_, '_> {
    fn phase_started(&mut self, phase: &str) -> Result<(), ExecuteError> {
        self.state.set_custom_phase(phase)?;
        Ok(())
    }

    fn file_started(&mut self, file: &Utf8Path) -> Result<(), ExecuteError> {
        let key = self.settings.report_key(file);
        self.state.set_testing(&key)?;
        Ok(())
    }

    fn case_finished(&mut self, file: &Utf8Path, result: CaseResult) -> Result<(), ExecuteError> {
        let key = self.settings.report_key(file);
        let mut traceback = result.traceback;
        for frame in &mut traceback {
            frame.file = helpers::rel_to(&frame.file, &self.settings.working_dir);
        }
        let record = OutcomeRecord {
            id: result.id,
            address: result.address,
            status: result.status,
            stderr: helpers::lossy_string(&result.stderr),
            stdout: helpers::lossy_string(&result.stdout),
            time: result.time,
            traceback,
        };
        // Flushed per case so a crash mid-run loses nothing already done.
        self.store.append_outcome(&key, record)?;
        Ok(())
    }
}
