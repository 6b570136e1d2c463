// Copyright (c) The testward Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::{ExpectedError, Result},
    output::OutputOpts,
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand, ValueEnum};
use testward_runner::{
    list::{SuiteDefinition, TestFileList},
    recovery::{RestartPolicy, Supervisor},
    runner::ProcessExecutor,
    settings::{AlphaOrder, DEFAULT_SUFFIX, RunSettings, RunSettingsBuilder},
};

/// A fatal-crash-tolerant wrapper around file-based test engines.
///
/// testward enumerates test files from an XML suite definition, hands them
/// to the engine, and aggregates per-test results into a durable JSON
/// report that survives fatal engine crashes.
#[derive(Debug, Parser)]
#[command(version, name = "testward")]
pub struct TestwardApp {
    #[command(flatten)]
    output: OutputOpts,

    #[command(subcommand)]
    command: Command,
}

impl TestwardApp {
    /// Executes the app, returning the process exit code.
    pub fn exec(self) -> Result<i32> {
        self.output.init();
        self.command.exec()
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List test files without running them
    List {
        #[command(flatten)]
        suite_opts: SuiteOpts,

        /// Output format
        #[arg(long, value_enum, default_value = "human", value_name = "FORMAT")]
        message_format: MessageFormat,
    },
    /// Run tests through the engine
    Run {
        #[command(flatten)]
        suite_opts: SuiteOpts,

        /// Engine command line to invoke (split shell-style)
        #[arg(long, value_name = "COMMAND", env = "TESTWARD_ENGINE")]
        engine: String,

        /// Run one engine invocation per test file
        #[arg(long)]
        split: bool,

        /// Give up after a fatal crash instead of restarting
        #[arg(long)]
        no_restart: bool,
    },
}

impl Command {
    fn exec(self) -> Result<i32> {
        match self {
            Command::List { suite_opts, message_format } => {
                let settings = suite_opts.into_settings()?;
                let definition = match &settings.suite_path {
                    Some(path) => SuiteDefinition::from_file(path)?,
                    None => SuiteDefinition::default(),
                };
                let list = TestFileList::enumerate(&definition, &settings);
                print_list(&list, &settings, message_format);
                Ok(0)
            }
            Command::Run { suite_opts, engine, split, no_restart } => {
                let mut settings = suite_opts.into_settings()?;
                settings.split = split;

                let argv = shell_words::split(&engine)
                    .map_err(|err| ExpectedError::EngineCommandInvalid { err })?;
                let mut executor =
                    ProcessExecutor::new(argv).map_err(|err| ExpectedError::Settings { err })?;

                let policy = if no_restart {
                    RestartPolicy::Disabled
                } else {
                    RestartPolicy::Enabled
                };
                let exit_code = Supervisor::new(&settings)
                    .restart_policy(policy)
                    .run(&mut executor)?;
                Ok(exit_code)
            }
        }
    }
}

#[derive(Debug, Args)]
struct SuiteOpts {
    /// Path to the suite definition XML file
    #[arg(long, value_name = "PATH")]
    config: Option<Utf8PathBuf>,

    /// Comma-separated list of test files to run instead of discovery
    #[arg(long, value_name = "FILES", value_delimiter = ',')]
    files: Vec<String>,

    /// Only expand the named sub-suite
    #[arg(long, value_name = "NAME")]
    suite: Option<String>,

    /// Report output file
    #[arg(
        long,
        value_name = "PATH",
        default_value = "testward-report.json",
        env = "TESTWARD_OUTPUT_FILE"
    )]
    output_file: Utf8PathBuf,

    /// Priority manifest file
    #[arg(long, value_name = "PATH")]
    priority_file: Option<Utf8PathBuf>,

    /// Sort test files alphabetically
    #[arg(long, conflicts_with = "rev_alpha")]
    alpha: bool,

    /// Sort test files reverse-alphabetically
    #[arg(long)]
    rev_alpha: bool,

    /// Ignore <exclude/> declarations in the suite definition
    #[arg(long)]
    ignore_exclude: bool,

    /// Discovery suffix for <directory> declarations
    #[arg(long, value_name = "SUFFIX", default_value = DEFAULT_SUFFIX)]
    suffix: String,

    /// Maximum fatal crashes per file before giving up on it
    #[arg(long, value_name = "N", default_value_t = 1)]
    max_fatal_retries: u32,
}

impl SuiteOpts {
    fn into_settings(self) -> Result<RunSettings> {
        let cwd = std::env::current_dir()
            .map_err(|err| ExpectedError::CurrentDirInvalid { err: Some(err) })
            .and_then(|dir| {
                Utf8PathBuf::from_path_buf(dir)
                    .map_err(|_| ExpectedError::CurrentDirInvalid { err: None })
            })?;

        // With a suite definition, its directory is the working-directory
        // root that report keys are rewritten against.
        let (working_dir, suite_path) = match &self.config {
            Some(config) => {
                let config =
                    if config.is_absolute() { config.clone() } else { cwd.join(config) };
                let working_dir =
                    config.parent().map(Utf8Path::to_path_buf).unwrap_or_else(|| cwd.clone());
                (working_dir, Some(config))
            }
            None => (cwd, None),
        };

        let mut builder = RunSettingsBuilder::new(working_dir, self.output_file);
        if let Some(suite_path) = suite_path {
            builder.suite_path(suite_path);
        }
        if !self.files.is_empty() {
            builder.cli_files(self.files);
        }
        if let Some(suite) = self.suite {
            builder.suite_filter(suite);
        }
        if let Some(priority_file) = self.priority_file {
            builder.priority_manifest(priority_file);
        }
        if self.alpha {
            builder.alpha_order(AlphaOrder::Alpha);
        } else if self.rev_alpha {
            builder.alpha_order(AlphaOrder::ReverseAlpha);
        }
        builder.ignore_exclude(self.ignore_exclude);
        builder.default_suffix(self.suffix);
        builder.max_fatal_retries(self.max_fatal_retries);

        Ok(builder.build()?)
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
enum MessageFormat {
    /// One file per line, excluded files marked
    #[default]
    Human,
    /// Machine-readable JSON
    Json,
}

fn print_list(list: &TestFileList, settings: &RunSettings, format: MessageFormat) {
    match format {
        MessageFormat::Human => {
            for entry in &list.runnable {
                println!("{}", settings.report_key(&entry.path));
            }
            for entry in &list.excluded {
                println!("{} (excluded)", settings.report_key(&entry.path));
            }
        }
        MessageFormat::Json => {
            let to_value = |entry: &testward_runner::list::TestFileEntry| {
                serde_json::json!({
                    "path": settings.report_key(&entry.path),
                    "metadata": entry.metadata,
                    "priority": entry.priority,
                })
            };
            let document = serde_json::json!({
                "runnable": list.runnable.iter().map(to_value).collect::<Vec<_>>(),
                "excluded": list.excluded.iter().map(to_value).collect::<Vec<_>>(),
            });
            println!("{document:#}");
        }
    }
}
