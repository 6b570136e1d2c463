// Copyright (c) The testward Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A fatal-crash-tolerant wrapper around file-based test engines.
//!
//! This crate is the command-line frontend; the orchestration logic lives
//! in [`testward_runner`].

mod dispatch;
mod errors;
mod output;

pub use dispatch::TestwardApp;
pub use errors::ExpectedError;
