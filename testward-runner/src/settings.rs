// Copyright (c) The testward Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Run settings: everything an invocation needs to know before the first
//! test file is dispatched.

use crate::{errors::SettingsError, helpers};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::{fs, io::Write};
use tracing::warn;

/// The default file-name suffix used to discover test files inside
/// `<directory>` declarations.
pub const DEFAULT_SUFFIX: &str = "Test.php";

/// Path-based ordering applied to the runnable set before priorities.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AlphaOrder {
    /// Keep declaration order.
    #[default]
    Off,
    /// Sort by path, ascending.
    Alpha,
    /// Sort by path, descending.
    ReverseAlpha,
}

/// Validated settings for one orchestration chain.
///
/// Built through [`RunSettingsBuilder`]; the builder performs the fatal
/// configuration checks (writable report location, existing command-line
/// files, sane retry budget) so that nothing past this point needs to abort
/// the run for a configuration problem.
#[derive(Clone, Debug)]
pub struct RunSettings {
    /// The working-directory root. Report keys and persisted error messages
    /// are rewritten relative to this directory.
    pub working_dir: Utf8PathBuf,

    /// The suite definition file, if one was supplied.
    pub suite_path: Option<Utf8PathBuf>,

    /// The report output file.
    pub output_path: Utf8PathBuf,

    /// The discovery suffix for `<directory>` declarations without their own
    /// `suffix` attribute.
    pub default_suffix: String,

    /// Path ordering applied before the priority sort.
    pub alpha_order: AlphaOrder,

    /// Run one engine invocation per file instead of a single batched one.
    pub split: bool,

    /// Ignore `<exclude>` declarations entirely.
    pub ignore_exclude: bool,

    /// Only expand `<testsuite>` nodes with this name.
    pub suite_filter: Option<String>,

    /// Explicit command-line file list. When non-empty this is the
    /// authoritative candidate set and suite declarations only classify it.
    pub cli_files: Vec<Utf8PathBuf>,

    /// Priorities from the external manifest, keyed by normalized path.
    /// These override inline `priority` attributes.
    pub priorities: IndexMap<Utf8PathBuf, i64>,

    /// How many fatal crashes a single file (or phase) may cause before it
    /// is given up on. Always at least 1.
    pub max_fatal_retries: u32,
}

/// Builder for [`RunSettings`].
#[derive(Clone, Debug)]
pub struct RunSettingsBuilder {
    working_dir: Utf8PathBuf,
    output_path: Utf8PathBuf,
    suite_path: Option<Utf8PathBuf>,
    default_suffix: String,
    alpha_order: AlphaOrder,
    split: bool,
    ignore_exclude: bool,
    suite_filter: Option<String>,
    cli_files: Vec<String>,
    priority_manifest: Option<Utf8PathBuf>,
    max_fatal_retries: u32,
}

impl RunSettingsBuilder {
    /// Creates a new builder rooted at `working_dir`, writing the report to
    /// `output_path` (resolved against the working directory if relative).
    pub fn new(working_dir: impl Into<Utf8PathBuf>, output_path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            output_path: output_path.into(),
            suite_path: None,
            default_suffix: DEFAULT_SUFFIX.to_owned(),
            alpha_order: AlphaOrder::Off,
            split: false,
            ignore_exclude: false,
            suite_filter: None,
            cli_files: Vec::new(),
            priority_manifest: None,
            max_fatal_retries: 1,
        }
    }

    /// Sets the suite definition file.
    pub fn suite_path(&mut self, path: impl Into<Utf8PathBuf>) -> &mut Self {
        self.suite_path = Some(path.into());
        self
    }

    /// Sets the discovery suffix for directory declarations.
    pub fn default_suffix(&mut self, suffix: impl Into<String>) -> &mut Self {
        self.default_suffix = suffix.into();
        self
    }

    /// Sets path-based ordering.
    pub fn alpha_order(&mut self, order: AlphaOrder) -> &mut Self {
        self.alpha_order = order;
        self
    }

    /// Runs one engine invocation per file.
    pub fn split(&mut self, split: bool) -> &mut Self {
        self.split = split;
        self
    }

    /// Ignores `<exclude>` declarations.
    pub fn ignore_exclude(&mut self, ignore: bool) -> &mut Self {
        self.ignore_exclude = ignore;
        self
    }

    /// Only expands the named sub-suite.
    pub fn suite_filter(&mut self, name: impl Into<String>) -> &mut Self {
        self.suite_filter = Some(name.into());
        self
    }

    /// Supplies an explicit list of test files, overriding discovery.
    pub fn cli_files(&mut self, files: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.cli_files.extend(files.into_iter().map(Into::into));
        self
    }

    /// Reads priorities from an external manifest at build time.
    pub fn priority_manifest(&mut self, path: impl Into<Utf8PathBuf>) -> &mut Self {
        self.priority_manifest = Some(path.into());
        self
    }

    /// Sets the fatal-retry budget. Must be at least 1.
    pub fn max_fatal_retries(&mut self, count: u32) -> &mut Self {
        self.max_fatal_retries = count;
        self
    }

    /// Validates the configuration and produces [`RunSettings`].
    pub fn build(&self) -> Result<RunSettings, SettingsError> {
        if self.max_fatal_retries < 1 {
            return Err(SettingsError::MaxRetriesOutOfRange {
                value: self.max_fatal_retries,
            });
        }

        let output_path = helpers::normalize_path(self.output_path.as_str(), &self.working_dir);
        check_output_writable(&output_path)?;

        let mut cli_files = Vec::with_capacity(self.cli_files.len());
        for file in &self.cli_files {
            let path = helpers::normalize_path(file, &self.working_dir);
            if !path.is_file() {
                return Err(SettingsError::TestFileMissing { path });
            }
            cli_files.push(path);
        }

        let priorities = match &self.priority_manifest {
            Some(manifest) => {
                let path = helpers::normalize_path(manifest.as_str(), &self.working_dir);
                let contents = fs::read_to_string(&path).map_err(|error| {
                    SettingsError::PriorityManifestRead { path: path.clone(), error }
                })?;
                parse_priority_manifest(&contents, &path, &self.working_dir)
            }
            None => IndexMap::new(),
        };

        Ok(RunSettings {
            working_dir: self.working_dir.clone(),
            suite_path: self
                .suite_path
                .as_ref()
                .map(|p| helpers::normalize_path(p.as_str(), &self.working_dir)),
            output_path,
            default_suffix: self.default_suffix.clone(),
            alpha_order: self.alpha_order,
            split: self.split,
            ignore_exclude: self.ignore_exclude,
            suite_filter: self.suite_filter.clone(),
            cli_files,
            priorities,
            max_fatal_retries: self.max_fatal_retries,
        })
    }
}

impl RunSettings {
    /// Rewrites `path` relative to the working-directory root for use as a
    /// report key or in persisted messages.
    pub fn report_key(&self, path: &Utf8Path) -> Utf8PathBuf {
        helpers::rel_to(path, &self.working_dir)
    }
}

/// Probes the report location so an unwritable destination fails the run
/// before any test executes, not after the first result.
fn check_output_writable(path: &Utf8Path) -> Result<(), SettingsError> {
    if path.exists() {
        return fs::OpenOptions::new()
            .append(true)
            .open(path)
            .map(drop)
            .map_err(|error| SettingsError::OutputNotWritable { path: path.to_owned(), error });
    }

    let Some(dir) = path.parent() else {
        return Err(SettingsError::OutputDirMissing { dir: Utf8PathBuf::from("/") });
    };
    if !dir.is_dir() {
        return Err(SettingsError::OutputDirMissing { dir: dir.to_owned() });
    }

    // Probe with an empty document, then remove it again.
    let probe = (|| {
        let mut file = fs::File::create(path)?;
        file.write_all(b"{\"byfile\":{}}")?;
        drop(file);
        fs::remove_file(path)
    })();
    probe.map_err(|error| SettingsError::OutputNotWritable { path: path.to_owned(), error })
}

/// Parses a priority manifest.
///
/// Line format: `PRIORITY: path`, with `#` starting a comment either on its
/// own line or after the path. Malformed lines are logged and skipped; they
/// never abort the run.
fn parse_priority_manifest(
    contents: &str,
    manifest_path: &Utf8Path,
    working_dir: &Utf8Path,
) -> IndexMap<Utf8PathBuf, i64> {
    let mut priorities = IndexMap::new();
    for (idx, raw) in contents.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((priority, rest)) = line.split_once(':') else {
            warn!(
                "priority manifest malformed, missing ':' delimiter at {}:{}",
                manifest_path,
                idx + 1
            );
            continue;
        };
        let Ok(priority) = priority.trim().parse::<i64>() else {
            warn!(
                "priority manifest malformed, priority is not numeric at {}:{}",
                manifest_path,
                idx + 1
            );
            continue;
        };
        let path_part = rest.split_once('#').map_or(rest, |(path, _)| path).trim();
        if path_part.is_empty() {
            warn!(
                "priority manifest malformed, missing path at {}:{}",
                manifest_path,
                idx + 1
            );
            continue;
        }
        let path = helpers::normalize_path(path_part, working_dir);
        priorities.insert(path, priority);
    }
    priorities
}
