// Copyright (c) The testward Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for [testward](https://crates.io/crates/testward).
//!
//! testward wraps a file-based test-execution engine: it enumerates test
//! files from an XML suite definition, dispatches them to the engine, and
//! records per-test outcomes in a durable JSON report. If the engine dies
//! from a fatal error mid-run, the report and a small side-channel state
//! file carry enough information for a bounded chain of restarts to finish
//! the remaining work without losing or double-counting results.

pub mod errors;
pub mod exit_codes;
mod helpers;
pub mod list;
pub mod recovery;
pub mod report;
pub mod runner;
pub mod settings;
