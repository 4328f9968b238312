//! Container entry point.
//!
//! Delegates to [`bootgate::run`], which launches the container's subsystems
//! in order and hands control to the worker. Any arguments replace the
//! configured worker command.

use std::io::{self, StderrLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    bootgate::run(std::env::args_os(), &mut stderr)
}
