// Copyright (c) The testward Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    helpers,
    list::{SuiteDefinition, SuiteMember},
    settings::{AlphaOrder, RunSettings},
};
use camino::{Utf8Path, Utf8PathBuf};
use globset::{Glob, GlobMatcher};
use indexmap::IndexMap;
use tracing::warn;
use walkdir::WalkDir;

/// One runnable (or excluded) test file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestFileEntry {
    /// Absolute, lexically normalized path.
    pub path: Utf8PathBuf,

    /// Metadata inherited from the declaration that yielded this file, with
    /// the `suffix` discovery directive stripped.
    pub metadata: IndexMap<String, String>,

    /// Explicit numeric priority, if one was declared. Lower values run
    /// earlier; files without a priority sort as 0.
    pub priority: Option<i64>,
}

impl TestFileEntry {
    /// The priority used for ordering.
    pub fn effective_priority(&self) -> i64 {
        self.priority.unwrap_or(0)
    }
}

/// The enumerated, ordered file sets for one run.
///
/// Enumeration is deterministic for a fixed suite definition and filesystem
/// state, and the runnable and excluded sets are always disjoint.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TestFileList {
    /// Files to hand to the engine, in execution order.
    pub runnable: Vec<TestFileEntry>,

    /// Files matched by `<exclude>` declarations; these only ever produce
    /// skip notices.
    pub excluded: Vec<TestFileEntry>,
}

impl TestFileList {
    /// Returns true if there is nothing to run and nothing to exclude.
    pub fn is_empty(&self) -> bool {
        self.runnable.is_empty() && self.excluded.is_empty()
    }

    /// Enumerates test files from `suite` under the rules in `settings`.
    ///
    /// Discovery problems (missing declared files or directories, bad glob
    /// patterns, unreadable directory entries) are logged and skipped; they
    /// never abort enumeration.
    pub fn enumerate(suite: &SuiteDefinition, settings: &RunSettings) -> Self {
        let mut candidates: IndexMap<Utf8PathBuf, IndexMap<String, String>> = IndexMap::new();
        let mut exclude_patterns: Vec<ExcludePattern> = Vec::new();

        for entry in &suite.suites {
            // An unselected sub-suite contributes nothing, not even its
            // exclusions.
            if let Some(filter) = &settings.suite_filter
                && entry.name != *filter
            {
                continue;
            }
            for member in &entry.members {
                match member {
                    SuiteMember::Directory { path, attributes } => {
                        expand_directory(path, attributes, settings, &mut candidates);
                    }
                    SuiteMember::File { path, attributes } => {
                        if path.is_empty() {
                            warn!("ignoring <file> declaration with no path");
                            continue;
                        }
                        let file = helpers::normalize_path(path, &settings.working_dir);
                        if !file.is_file() {
                            warn!("file does not exist: {file}");
                            continue;
                        }
                        candidates.entry(file).or_insert_with(|| stripped(attributes));
                    }
                    SuiteMember::Exclude { pattern } => {
                        if settings.ignore_exclude || pattern.is_empty() {
                            continue;
                        }
                        exclude_patterns.push(ExcludePattern::compile(pattern, settings));
                    }
                }
            }
        }

        let mut list = TestFileList::default();
        if settings.cli_files.is_empty() {
            for (path, metadata) in candidates {
                let entry = TestFileEntry { path, metadata, priority: None };
                if matches_any(&entry.path, &exclude_patterns) {
                    list.excluded.push(entry);
                } else {
                    list.runnable.push(entry);
                }
            }
        } else {
            // The command-line list is the authoritative candidate set;
            // declarations only classify it.
            for path in &settings.cli_files {
                let metadata = candidates.get(path).cloned().unwrap_or_default();
                let entry = TestFileEntry { path: path.clone(), metadata, priority: None };
                if matches_any(&entry.path, &exclude_patterns) {
                    list.excluded.push(entry);
                } else {
                    list.runnable.push(entry);
                }
            }
        }

        for entry in list.runnable.iter_mut().chain(list.excluded.iter_mut()) {
            entry.priority = resolve_priority(entry, settings);
        }

        match settings.alpha_order {
            AlphaOrder::Off => {}
            AlphaOrder::Alpha => list.runnable.sort_by(|a, b| a.path.cmp(&b.path)),
            AlphaOrder::ReverseAlpha => list.runnable.sort_by(|a, b| b.path.cmp(&a.path)),
        }
        // Stable, so equal priorities keep their current relative order.
        // An explicit priority therefore beats the alphabetical flags.
        list.runnable.sort_by_key(TestFileEntry::effective_priority);
        list.excluded.sort_by(|a, b| a.path.cmp(&b.path));

        list
    }
}

fn expand_directory(
    path: &str,
    attributes: &IndexMap<String, String>,
    settings: &RunSettings,
    candidates: &mut IndexMap<Utf8PathBuf, IndexMap<String, String>>,
) {
    if path.is_empty() {
        warn!("ignoring <directory> declaration with no path");
        return;
    }
    let root = helpers::normalize_path(path, &settings.working_dir);
    if !root.is_dir() {
        warn!("directory does not exist: {root}");
        return;
    }
    let suffix =
        attributes.get("suffix").cloned().unwrap_or_else(|| settings.default_suffix.clone());
    let metadata = stripped(attributes);

    // Sorted traversal keeps re-enumeration deterministic.
    for entry in WalkDir::new(root.as_std_path()).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                warn!("skipping unreadable directory entry: {error}");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if !entry.file_name().to_string_lossy().ends_with(&suffix) {
            continue;
        }
        match Utf8PathBuf::from_path_buf(entry.into_path()) {
            Ok(file) => {
                candidates.entry(file).or_insert_with(|| metadata.clone());
            }
            Err(file) => warn!("skipping non-UTF-8 path: {}", file.display()),
        }
    }
}

/// Returns `attributes` without the `suffix` key, which is a discovery
/// directive rather than runtime metadata.
fn stripped(attributes: &IndexMap<String, String>) -> IndexMap<String, String> {
    let mut metadata = attributes.clone();
    metadata.shift_remove("suffix");
    metadata
}

fn resolve_priority(entry: &TestFileEntry, settings: &RunSettings) -> Option<i64> {
    // An external manifest always wins over an inline attribute.
    if let Some(priority) = settings.priorities.get(&entry.path) {
        return Some(*priority);
    }
    let raw = entry.metadata.get("priority")?;
    match raw.parse() {
        Ok(priority) => Some(priority),
        Err(_) => {
            warn!("ignoring non-numeric priority attribute `{raw}` on {}", entry.path);
            None
        }
    }
}

/// A compiled `<exclude>` declaration.
#[derive(Debug)]
enum ExcludePattern {
    /// Exact file path or directory prefix.
    Path(Utf8PathBuf),
    /// Wildcard pattern.
    Glob(GlobMatcher),
}

impl ExcludePattern {
    fn compile(pattern: &str, settings: &RunSettings) -> Self {
        if pattern.contains(['*', '?', '[']) {
            let absolute = if Utf8Path::new(pattern).is_absolute() {
                pattern.to_owned()
            } else {
                settings.working_dir.join(pattern).into_string()
            };
            match Glob::new(&absolute) {
                Ok(glob) => return ExcludePattern::Glob(glob.compile_matcher()),
                Err(error) => {
                    warn!("treating unparsable exclude pattern `{pattern}` literally: {error}");
                }
            }
        }
        ExcludePattern::Path(helpers::normalize_path(pattern, &settings.working_dir))
    }

    fn matches(&self, path: &Utf8Path) -> bool {
        match self {
            // Either the file itself or a directory containing it.
            ExcludePattern::Path(exclude) => path == exclude || path.starts_with(exclude),
            ExcludePattern::Glob(matcher) => matcher.is_match(path.as_std_path()),
        }
    }
}

fn matches_any(path: &Utf8Path, patterns: &[ExcludePattern]) -> bool {
    patterns.iter().any(|pattern| pattern.matches(path))
}
