// Copyright (c) The testward Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Documented exit codes for `testward` failures.

/// Documented exit codes for `testward` failures.
///
/// On a normal run testward exits with whatever code the engine reported.
/// The constants here cover testward's own failure modes. Unknown or
/// unexpected failures always result in exit code 1.
pub enum TestwardExitCode {}

impl TestwardExitCode {
    /// No errors occurred and testward exited normally.
    pub const OK: i32 = 0;

    /// A fatal engine crash occurred somewhere in the restart chain.
    ///
    /// This sentinel is published before each restart, so a chain whose
    /// replacement process is itself killed still reports failure rather
    /// than false success.
    pub const FATAL_CRASH: i32 = 6;

    /// A configuration problem happened while setting up an invocation.
    pub const SETUP_ERROR: i32 = 96;

    /// Writing the report or run-state file produced an error.
    pub const REPORT_WRITE_FAILED: i32 = 110;
}
