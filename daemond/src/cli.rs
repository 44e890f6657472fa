//! Command-line interface: `daemond [-t timeout] [next_program [arg...]]`

use clap::error::ErrorKind;
use clap::Parser;
use std::ffi::OsString;

/// Exit status for a malformed command line
pub const USAGE_EXIT: i32 = 1;

#[derive(Debug, Parser)]
#[command(name = "daemond", version, about = "Supervise every program found in ./exec")]
pub struct Args {
    /// Idle poll timeout in whole seconds (0 blocks indefinitely)
    #[arg(short = 't', long = "timeout", value_name = "SECONDS", default_value_t = 0)]
    pub timeout: u64,

    /// Program to exec in place of the supervisor once it is told to stop
    #[arg(value_name = "NEXT_PROGRAM", trailing_var_arg = true)]
    pub next_program: Vec<OsString>,
}

impl Args {
    /// Parse the process arguments, exiting with [`USAGE_EXIT`] on error.
    pub fn parse_or_exit() -> Self {
        Self::parse_from_or_exit(std::env::args_os())
    }

    pub fn parse_from_or_exit<I, T>(argv: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        match Self::try_parse_from(argv) {
            Ok(args) => args,
            Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
                e.exit()
            }
            Err(e) => {
                let _ = e.print();
                std::process::exit(USAGE_EXIT);
            }
        }
    }
}
