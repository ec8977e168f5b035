pub mod acquire;
pub mod aws;
pub mod bootstrap;
pub mod error;
pub mod info;
pub mod launch;
pub mod network;
pub mod provider;
pub mod provision;
pub mod ssh;
pub mod types;

use execute::Execute;
use log::debug;
use std::process::{Command, Stdio};

pub use error::{Error, Result};

/// Runs a local command and returns its stdout. Arguments are kept out of the
/// log since some of them are secrets.
pub(crate) fn sh(mut command: Command) -> Result<String> {
    debug!("run: {:?}", command.get_program());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    let output = command
        .execute_output()
        .map_err(|e| Error::CommandFailed(format!("{:?}: {}", command.get_program(), e)))?;

    match output.status.code() {
        Some(0) => Ok(String::from_utf8_lossy(&output.stdout).to_string()),
        Some(code) => Err(Error::CommandFailed(format!(
            "{:?} exited with {}: {}",
            command.get_program(),
            code,
            String::from_utf8_lossy(&output.stderr).trim()
        ))),
        None => Err(Error::CommandFailed(format!(
            "{:?} was interrupted",
            command.get_program()
        ))),
    }
}
