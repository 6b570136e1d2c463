// Copyright (c) The testward Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end orchestration tests driving a scripted in-memory executor
//! through crash, restart and exclusion chains.

use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::Utf8TempDir;
use pretty_assertions::assert_eq;
use std::collections::{HashMap, VecDeque};
use std::fs;
use testward_runner::{
    errors::{EngineCrash, ExecuteError},
    exit_codes::TestwardExitCode,
    recovery::{RestartPolicy, StateFile, Supervisor},
    report::{Report, ReportStore, TestStatus},
    runner::{CaseResult, Executor, ExecutorSpec, OutcomeSink},
    settings::{RunSettings, RunSettingsBuilder},
};

/// One scripted action the fake engine performs during an invocation.
enum Step {
    FileStarted(&'static str),
    Case(&'static str, &'static str, TestStatus),
}

/// How a scripted invocation ends.
enum Ending {
    Exit(i32),
    Crash(&'static str),
}

struct Invocation {
    steps: Vec<Step>,
    ending: Ending,
}

/// An [`Executor`] that replays a script, recording the specs it was
/// handed.
struct ScriptedExecutor {
    root: Utf8PathBuf,
    invocations: VecDeque<Invocation>,
    case_ids: HashMap<Utf8PathBuf, Vec<String>>,
    specs: Vec<ExecutorSpec>,
}

impl ScriptedExecutor {
    fn new(root: &Utf8Path, invocations: Vec<Invocation>) -> Self {
        Self {
            root: root.to_owned(),
            invocations: invocations.into(),
            case_ids: HashMap::new(),
            specs: Vec::new(),
        }
    }

    fn with_case_ids(mut self, file: &str, ids: &[&str]) -> Self {
        self.case_ids
            .insert(self.root.join(file), ids.iter().map(|id| (*id).to_owned()).collect());
        self
    }
}

impl Executor for ScriptedExecutor {
    fn execute(
        &mut self,
        spec: &ExecutorSpec,
        sink: &mut dyn OutcomeSink,
    ) -> Result<i32, ExecuteError> {
        self.specs.push(spec.clone());
        let invocation = self.invocations.pop_front().expect("script ran out of invocations");
        for step in invocation.steps {
            match step {
                Step::FileStarted(file) => sink.file_started(&self.root.join(file))?,
                Step::Case(file, id, status) => sink.case_finished(
                    &self.root.join(file),
                    CaseResult {
                        id: id.to_owned(),
                        address: id.to_owned(),
                        status,
                        stdout: Vec::new(),
                        stderr: Vec::new(),
                        time: 0.01,
                        traceback: Vec::new(),
                    },
                )?,
            }
        }
        match invocation.ending {
            Ending::Exit(code) => Ok(code),
            Ending::Crash(message) => Err(EngineCrash::new(message).into()),
        }
    }

    fn case_ids(&mut self, file: &Utf8Path) -> Option<Vec<String>> {
        self.case_ids.get(file).cloned()
    }
}

struct Fixture {
    dir: Utf8TempDir,
}

impl Fixture {
    /// Creates `tests/{a,b,c}Test.php` plus a suite definition that
    /// excludes `bTest.php`.
    fn new() -> Self {
        let dir = Utf8TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("tests")).unwrap();
        for file in ["aTest.php", "bTest.php", "cTest.php"] {
            fs::write(dir.path().join("tests").join(file), "<?php").unwrap();
        }
        fs::write(
            dir.path().join("suite.xml"),
            "<testsuite name=\"main\">\n\
             <directory>tests</directory>\n\
             <exclude>tests/bTest.php</exclude>\n\
             </testsuite>\n",
        )
        .unwrap();
        Self { dir }
    }

    fn settings(&self, max_retries: u32) -> RunSettings {
        let mut builder =
            RunSettingsBuilder::new(self.dir.path(), self.dir.path().join("report.json"));
        builder.suite_path(self.dir.path().join("suite.xml"));
        builder.max_fatal_retries(max_retries);
        builder.build().unwrap()
    }

    fn report(&self, settings: &RunSettings) -> Report {
        ReportStore::new(settings.output_path.clone()).read()
    }

    fn statuses(report: &Report, key: &str) -> Vec<TestStatus> {
        report.byfile[Utf8Path::new(key)].iter().map(|outcome| outcome.status).collect()
    }
}

#[test]
fn normal_run_reports_every_file() {
    let fixture = Fixture::new();
    let settings = fixture.settings(1);
    let mut executor = ScriptedExecutor::new(
        fixture.dir.path(),
        vec![Invocation {
            steps: vec![
                Step::FileStarted("tests/aTest.php"),
                Step::Case("tests/aTest.php", "ATest::testOne", TestStatus::Pass),
                Step::FileStarted("tests/cTest.php"),
                Step::Case("tests/cTest.php", "CTest::testOne", TestStatus::Pass),
            ],
            ending: Ending::Exit(0),
        }],
    );

    let exit_code = Supervisor::new(&settings).run(&mut executor).unwrap();
    assert_eq!(exit_code, 0);

    let report = fixture.report(&settings);
    assert_eq!(Fixture::statuses(&report, "tests/aTest.php"), vec![TestStatus::Pass]);
    assert_eq!(Fixture::statuses(&report, "tests/bTest.php"), vec![TestStatus::Skip]);
    assert_eq!(Fixture::statuses(&report, "tests/cTest.php"), vec![TestStatus::Pass]);
    assert!(report.pending_files().is_empty());

    // The executor saw exactly the runnable files, in order.
    assert_eq!(executor.specs.len(), 1);
    let spec_paths: Vec<_> =
        executor.specs[0].entries.iter().map(|entry| entry.path.clone()).collect();
    assert_eq!(
        spec_paths,
        vec![
            fixture.dir.path().join("tests/aTest.php"),
            fixture.dir.path().join("tests/cTest.php"),
        ]
    );

    // The chain is over, so the side-channel state is gone.
    assert!(!StateFile::side_channel_path(&settings.output_path).exists());
}

#[test]
fn crash_chain_retries_and_surfaces_the_sentinel_exit_code() {
    let fixture = Fixture::new();
    let settings = fixture.settings(1);
    // Crash while `a` is current; the replacement attempt runs `c` alone
    // because `a` was converted to a terminal error at the retry budget.
    let mut executor = ScriptedExecutor::new(
        fixture.dir.path(),
        vec![
            Invocation {
                steps: vec![Step::FileStarted("tests/aTest.php")],
                ending: Ending::Crash("memory exhausted"),
            },
            Invocation {
                steps: vec![
                    Step::FileStarted("tests/cTest.php"),
                    Step::Case("tests/cTest.php", "CTest::testOne", TestStatus::Pass),
                ],
                ending: Ending::Exit(0),
            },
        ],
    );

    let exit_code = Supervisor::new(&settings).run(&mut executor).unwrap();
    assert_eq!(exit_code, TestwardExitCode::FATAL_CRASH);

    let report = fixture.report(&settings);
    assert_eq!(Fixture::statuses(&report, "tests/aTest.php"), vec![TestStatus::Error]);
    assert_eq!(Fixture::statuses(&report, "tests/bTest.php"), vec![TestStatus::Skip]);
    assert_eq!(Fixture::statuses(&report, "tests/cTest.php"), vec![TestStatus::Pass]);
    assert_eq!(report.fatal_errors.tests[Utf8Path::new("tests/aTest.php")].len(), 1);

    // The second attempt only received the remaining work.
    assert_eq!(executor.specs.len(), 2);
    assert_eq!(
        executor.specs[1].entries[0].path,
        fixture.dir.path().join("tests/cTest.php")
    );
}

#[test]
fn crash_below_budget_retries_the_same_file() {
    let fixture = Fixture::new();
    let settings = fixture.settings(2);
    let mut executor = ScriptedExecutor::new(
        fixture.dir.path(),
        vec![
            Invocation {
                steps: vec![
                    Step::FileStarted("tests/aTest.php"),
                    Step::Case("tests/aTest.php", "ATest::testOne", TestStatus::Pass),
                    Step::FileStarted("tests/cTest.php"),
                ],
                ending: Ending::Crash("segfault"),
            },
            Invocation {
                steps: vec![
                    Step::FileStarted("tests/cTest.php"),
                    Step::Case("tests/cTest.php", "CTest::testOne", TestStatus::Pass),
                ],
                ending: Ending::Exit(0),
            },
        ],
    );

    let exit_code = Supervisor::new(&settings).run(&mut executor).unwrap();
    assert_eq!(exit_code, TestwardExitCode::FATAL_CRASH);

    let report = fixture.report(&settings);
    // `a` was flushed before the crash and never re-run; `c` stayed
    // pending through the crash and succeeded on the retry.
    assert_eq!(Fixture::statuses(&report, "tests/aTest.php"), vec![TestStatus::Pass]);
    assert_eq!(Fixture::statuses(&report, "tests/cTest.php"), vec![TestStatus::Pass]);
    assert_eq!(report.fatal_errors.tests[Utf8Path::new("tests/cTest.php")].len(), 1);
}

#[test]
fn no_restart_support_marks_everything_unconfirmed() {
    let fixture = Fixture::new();
    let settings = fixture.settings(3);
    let mut executor = ScriptedExecutor::new(
        fixture.dir.path(),
        vec![Invocation {
            steps: vec![Step::FileStarted("tests/aTest.php")],
            ending: Ending::Crash("memory exhausted"),
        }],
    );

    let exit_code = Supervisor::new(&settings)
        .restart_policy(RestartPolicy::Disabled)
        .run(&mut executor)
        .unwrap();
    assert_eq!(exit_code, TestwardExitCode::FATAL_CRASH);

    let report = fixture.report(&settings);
    assert_eq!(Fixture::statuses(&report, "tests/aTest.php"), vec![TestStatus::Error]);
    assert_eq!(Fixture::statuses(&report, "tests/cTest.php"), vec![TestStatus::Error]);
    assert!(
        report.byfile[Utf8Path::new("tests/cTest.php")][0]
            .stderr
            .contains("was not run due to")
    );
    assert!(report.pending_files().is_empty());
}

#[test]
fn engine_filtered_files_become_skips_after_a_normal_return() {
    let fixture = Fixture::new();
    let settings = fixture.settings(1);
    // The engine runs `c` but silently filters `a` out; since it returned
    // normally this is a skip, not a crash.
    let mut executor = ScriptedExecutor::new(
        fixture.dir.path(),
        vec![Invocation {
            steps: vec![
                Step::FileStarted("tests/cTest.php"),
                Step::Case("tests/cTest.php", "CTest::testOne", TestStatus::Pass),
            ],
            ending: Ending::Exit(0),
        }],
    );

    let exit_code = Supervisor::new(&settings).run(&mut executor).unwrap();
    assert_eq!(exit_code, 0);

    let report = fixture.report(&settings);
    assert_eq!(Fixture::statuses(&report, "tests/aTest.php"), vec![TestStatus::Skip]);
    assert!(
        report.byfile[Utf8Path::new("tests/aTest.php")][0]
            .stderr
            .contains("engine-level group or suite filter")
    );
}

#[test]
fn previously_reported_files_are_not_rerun() {
    let fixture = Fixture::new();
    let settings = fixture.settings(1);

    // Seed the report as a crashed earlier attempt would have left it.
    let store = ReportStore::new(settings.output_path.clone());
    store
        .append_outcome(
            Utf8Path::new("tests/aTest.php"),
            testward_runner::report::OutcomeRecord::filtered_skip(Utf8Path::new(
                "tests/aTest.php",
            )),
        )
        .unwrap();

    let mut executor = ScriptedExecutor::new(
        fixture.dir.path(),
        vec![Invocation {
            steps: vec![
                Step::FileStarted("tests/cTest.php"),
                Step::Case("tests/cTest.php", "CTest::testOne", TestStatus::Pass),
            ],
            ending: Ending::Exit(0),
        }],
    );

    Supervisor::new(&settings).run(&mut executor).unwrap();

    // Only `c` was dispatched.
    assert_eq!(executor.specs.len(), 1);
    let spec_paths: Vec<_> =
        executor.specs[0].entries.iter().map(|entry| entry.path.clone()).collect();
    assert_eq!(spec_paths, vec![fixture.dir.path().join("tests/cTest.php")]);
}

#[test]
fn split_mode_dispatches_per_file_and_keeps_first_nonzero_exit() {
    let fixture = Fixture::new();
    let mut builder =
        RunSettingsBuilder::new(fixture.dir.path(), fixture.dir.path().join("report.json"));
    builder.suite_path(fixture.dir.path().join("suite.xml"));
    builder.split(true);
    let settings = builder.build().unwrap();

    let mut executor = ScriptedExecutor::new(
        fixture.dir.path(),
        vec![
            Invocation {
                steps: vec![
                    Step::FileStarted("tests/aTest.php"),
                    Step::Case("tests/aTest.php", "ATest::testOne", TestStatus::Fail),
                ],
                ending: Ending::Exit(2),
            },
            Invocation {
                steps: vec![
                    Step::FileStarted("tests/cTest.php"),
                    Step::Case("tests/cTest.php", "CTest::testOne", TestStatus::Pass),
                ],
                ending: Ending::Exit(0),
            },
        ],
    );

    let exit_code = Supervisor::new(&settings).run(&mut executor).unwrap();
    assert_eq!(exit_code, 2);

    // One invocation per file, single-entry specs.
    assert_eq!(executor.specs.len(), 2);
    assert!(executor.specs.iter().all(|spec| spec.entries.len() == 1));
}

#[test]
fn excluded_files_get_per_case_skips_when_the_engine_can_enumerate() {
    let fixture = Fixture::new();
    let settings = fixture.settings(1);
    let mut executor = ScriptedExecutor::new(
        fixture.dir.path(),
        vec![Invocation {
            steps: vec![
                Step::FileStarted("tests/aTest.php"),
                Step::Case("tests/aTest.php", "ATest::testOne", TestStatus::Pass),
                Step::FileStarted("tests/cTest.php"),
                Step::Case("tests/cTest.php", "CTest::testOne", TestStatus::Pass),
            ],
            ending: Ending::Exit(0),
        }],
    )
    .with_case_ids("tests/bTest.php", &["BTest::testOne", "BTest::testTwo"]);

    Supervisor::new(&settings).run(&mut executor).unwrap();

    let report = fixture.report(&settings);
    let skips = &report.byfile[Utf8Path::new("tests/bTest.php")];
    assert_eq!(skips.len(), 2);
    assert_eq!(skips[0].id, "BTest::testOne");
    assert_eq!(skips[1].id, "BTest::testTwo");
    assert!(skips.iter().all(|outcome| outcome.status == TestStatus::Skip));
}

#[test]
fn report_accumulates_across_the_whole_chain() {
    let fixture = Fixture::new();
    let settings = fixture.settings(2);
    let mut executor = ScriptedExecutor::new(
        fixture.dir.path(),
        vec![
            Invocation {
                steps: vec![
                    Step::FileStarted("tests/aTest.php"),
                    Step::Case("tests/aTest.php", "ATest::testOne", TestStatus::Pass),
                    Step::Case("tests/aTest.php", "ATest::testTwo", TestStatus::Fail),
                    Step::FileStarted("tests/cTest.php"),
                ],
                ending: Ending::Crash("boom"),
            },
            Invocation {
                steps: vec![
                    Step::FileStarted("tests/cTest.php"),
                    Step::Case("tests/cTest.php", "CTest::testOne", TestStatus::Pass),
                ],
                ending: Ending::Exit(1),
            },
        ],
    );

    let exit_code = Supervisor::new(&settings).run(&mut executor).unwrap();
    // The sentinel from the crashed attempt wins over the second
    // attempt's own exit code.
    assert_eq!(exit_code, TestwardExitCode::FATAL_CRASH);

    let report = fixture.report(&settings);
    assert_eq!(
        Fixture::statuses(&report, "tests/aTest.php"),
        vec![TestStatus::Pass, TestStatus::Fail]
    );
    assert_eq!(Fixture::statuses(&report, "tests/cTest.php"), vec![TestStatus::Pass]);
    // Every known file ends with a non-empty outcome list.
    assert!(report.pending_files().is_empty());
}
