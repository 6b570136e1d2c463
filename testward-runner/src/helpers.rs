// Copyright (c) The testward Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! General support code for testward-runner.

use bstr::ByteSlice;
use camino::{Utf8Component, Utf8Path, Utf8PathBuf};

/// Resolves `path` against `base` and removes `.` and `..` components
/// lexically, without touching the filesystem. The result may not exist.
pub(crate) fn normalize_path(path: &str, base: &Utf8Path) -> Utf8PathBuf {
    let joined = if Utf8Path::new(path).is_absolute() {
        Utf8PathBuf::from(path)
    } else {
        base.join(path)
    };

    let mut out = Utf8PathBuf::new();
    for component in joined.components() {
        match component {
            Utf8Component::Prefix(_) | Utf8Component::RootDir => {
                out.push(component.as_str());
            }
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                // Popping past the root is a no-op, same as most shells.
                out.pop();
            }
            Utf8Component::Normal(part) => out.push(part),
        }
    }
    out
}

/// Rewrites `path` relative to `root`, returning it unchanged if it does not
/// live under `root`. Report keys and persisted error messages use this for
/// stable, machine-portable paths.
pub(crate) fn rel_to(path: &Utf8Path, root: &Utf8Path) -> Utf8PathBuf {
    match path.strip_prefix(root) {
        Ok(rel) => rel.to_owned(),
        Err(_) => path.to_owned(),
    }
}

/// Strips `root` prefixes from paths embedded anywhere in `text`.
pub(crate) fn strip_root_in_text(text: &str, root: &Utf8Path) -> String {
    let mut prefix = root.as_str().to_owned();
    if !prefix.ends_with('/') {
        prefix.push('/');
    }
    text.replace(&prefix, "")
}

/// Converts engine-produced bytes of unknown encoding into a `String`,
/// replacing invalid sequences. Everything persisted to the report goes
/// through this so the serialized form is uniformly UTF-8.
pub(crate) fn lossy_string(bytes: &[u8]) -> String {
    bytes.to_str_lossy().into_owned()
}
