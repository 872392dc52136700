#![deny(unsafe_code)]

use std::{env, process::ExitCode};

fn main() -> ExitCode {
    daemon::run(env::args_os())
}
