//! Local process execution of the orchestrator binary.

use super::ExecOutput;
use crate::core::error::{Error, Result};
use std::process::{Command, Stdio};

/// Run `program` with `args`, capturing both streams.
pub fn exec_local(program: &str, args: &[String]) -> Result<ExecOutput> {
    tracing::debug!(program, ?args, "exec");
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| Error::Orchestrator {
            command: program.to_string(),
            message: format!("failed to spawn: {}", e),
        })?;

    Ok(ExecOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}
