// Copyright (c) The testward Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::ReportStoreError,
    report::{OutcomeRecord, Report},
};
use atomicwrites::{AllowOverwrite, AtomicFile};
use camino::{Utf8Path, Utf8PathBuf};
use std::{fs, io, io::Write};
use tracing::warn;

/// Durable storage for a [`Report`].
///
/// Every mutation is read-full, mutate-in-memory, write-full. There is no
/// cross-process locking: the design assumes a single active writer, which
/// holds because a crash terminates the old writer before its replacement
/// starts.
#[derive(Clone, Debug)]
pub struct ReportStore {
    path: Utf8PathBuf,
}

impl ReportStore {
    /// Creates a store backed by `path`.
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the backing file path.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Reads the persisted report.
    ///
    /// A missing file is a fresh run; corrupt or unreadable content is
    /// logged and treated as empty so a damaged report can never block the
    /// run. The reset becomes durable at the next write.
    pub fn read(&self) -> Report {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                return Report::default();
            }
            Err(error) => {
                warn!("report at {} could not be read, resetting: {error}", self.path);
                return Report::default();
            }
        };
        match serde_json::from_str(&contents) {
            Ok(report) => report,
            Err(error) => {
                warn!("report at {} is not valid JSON, resetting: {error}", self.path);
                Report::default()
            }
        }
    }

    /// Writes the full report, replacing whatever is on disk.
    pub fn write(&self, report: &Report) -> Result<(), ReportStoreError> {
        let json = serde_json::to_string_pretty(report).map_err(|error| {
            ReportStoreError::Serialize { path: self.path.clone(), error }
        })?;
        AtomicFile::new(&self.path, AllowOverwrite)
            .write(|file| file.write_all(json.as_bytes()))
            .map_err(|error| ReportStoreError::Write { path: self.path.clone(), error })
    }

    /// Reads the report, applies `mutate`, and writes it back.
    pub fn update(&self, mutate: impl FnOnce(&mut Report)) -> Result<(), ReportStoreError> {
        let mut report = self.read();
        mutate(&mut report);
        self.write(&report)
    }

    /// Appends a single outcome and flushes immediately.
    ///
    /// Streaming results through this as they occur means a crash mid-run
    /// preserves everything executed so far.
    pub fn append_outcome(
        &self,
        key: &Utf8Path,
        outcome: OutcomeRecord,
    ) -> Result<(), ReportStoreError> {
        self.update(|report| report.append(key, outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::TestStatus;
    use camino_tempfile::Utf8TempDir;
    use pretty_assertions::assert_eq;

    fn record(id: &str, status: TestStatus) -> OutcomeRecord {
        OutcomeRecord {
            id: id.to_owned(),
            address: id.to_owned(),
            status,
            stderr: String::new(),
            stdout: String::new(),
            time: 0.0,
            traceback: Vec::new(),
        }
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = Utf8TempDir::new().unwrap();
        let store = ReportStore::new(dir.path().join("report.json"));
        assert_eq!(store.read(), Report::default());
    }

    #[test]
    fn corrupt_file_reads_as_empty() {
        let dir = Utf8TempDir::new().unwrap();
        let path = dir.path().join("report.json");
        fs::write(&path, "{not json").unwrap();
        let store = ReportStore::new(path);
        assert_eq!(store.read(), Report::default());
    }

    #[test]
    fn appended_outcomes_accumulate_across_writers() {
        let dir = Utf8TempDir::new().unwrap();
        let path = dir.path().join("report.json");
        let key = Utf8Path::new("tests/aTest.php");

        // Two independent store handles standing in for a crashed process
        // and its replacement.
        let first = ReportStore::new(path.clone());
        first.append_outcome(key, record("ATest::testOne", TestStatus::Pass)).unwrap();

        let second = ReportStore::new(path);
        second.append_outcome(key, record("ATest::testTwo", TestStatus::Fail)).unwrap();

        let report = second.read();
        let outcomes = &report.byfile[key];
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].id, "ATest::testOne");
        assert_eq!(outcomes[1].id, "ATest::testTwo");
    }

    #[test]
    fn write_replaces_previous_contents() {
        let dir = Utf8TempDir::new().unwrap();
        let store = ReportStore::new(dir.path().join("report.json"));

        let mut report = Report::default();
        report.ensure_known(Utf8Path::new("tests/aTest.php"));
        store.write(&report).unwrap();

        report.append(Utf8Path::new("tests/aTest.php"), record("ATest::testOne", TestStatus::Pass));
        store.write(&report).unwrap();

        assert_eq!(store.read(), report);
    }
}
