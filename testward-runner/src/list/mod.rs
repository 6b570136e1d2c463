// Copyright (c) The testward Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Suite definitions and test file enumeration.

mod enumerator;
mod suite;

pub use enumerator::{TestFileEntry, TestFileList};
pub use suite::{SuiteDefinition, SuiteEntry, SuiteMember};
