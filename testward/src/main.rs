// Copyright (c) The testward Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use clap::Parser;
use testward::TestwardApp;

fn main() {
    let app = TestwardApp::parse();
    match app.exec() {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(error) => {
            error.display_to_stderr();
            std::process::exit(error.process_exit_code())
        }
    }
}
