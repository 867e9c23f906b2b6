//! Process exit codes.
//!
//! - 0: success
//! - 1: input or I/O error, nothing was simulated or the output could not be written
//! - 2: the integration failed and its diagnostic was reported

use std::process::ExitCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CliExitCode {
    Success = 0,
    InputError = 1,
    NumericFailure = 2,
}

impl From<CliExitCode> for ExitCode {
    fn from(code: CliExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}
