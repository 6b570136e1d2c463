// Copyright (c) The testward Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use clap::Args;
use tracing::Level;

#[derive(Copy, Clone, Debug, Args)]
#[must_use]
pub(crate) struct OutputOpts {
    /// Verbose output
    #[arg(long, short, global = true, env = "TESTWARD_VERBOSE")]
    pub(crate) verbose: bool,
}

impl OutputOpts {
    pub(crate) fn init(self) {
        let max_level = if self.verbose { Level::DEBUG } else { Level::INFO };
        tracing_subscriber::fmt()
            .with_max_level(max_level)
            .with_target(false)
            .with_ansi(false)
            .with_writer(std::io::stderr)
            .init();
    }
}
