//! abcd CLI entry point
//!
//! All logic lives in the cli module; errors are reported there.

use std::process::ExitCode;

fn main() -> ExitCode {
    abcd::cli::run()
}
