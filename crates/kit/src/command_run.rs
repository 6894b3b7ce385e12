//! Synchronous helpers for driving external host tools.
//!
//! Every external invocation in the pipeline (curl, hdiutil, ditto,
//! utmctl) goes through [`CommandRun`] so failures surface uniformly as
//! an exit status plus a bounded stderr tail.

use std::process::{Command, Stdio};

use color_eyre::eyre::{eyre, Context, Result};

/// Trailing bytes of stderr to include in error reports.
const MAX_STDERR_TAIL: usize = 1024;

/// Helpers intended for [`std::process::Command`].
pub trait CommandRun {
    /// Execute the child process; an abnormal exit becomes an error
    /// carrying the tail of the child's stderr.
    fn run(&mut self) -> Result<()>;

    /// Execute the child process and capture its stdout as a string.
    fn run_get_string(&mut self) -> Result<String>;

    /// Execute the child process, parsing its stdout as JSON.
    fn run_and_parse_json<T: serde::de::DeserializeOwned>(&mut self) -> Result<T>;
}

fn stderr_tail(stderr: &[u8]) -> String {
    let start = stderr.len().saturating_sub(MAX_STDERR_TAIL);
    String::from_utf8_lossy(&stderr[start..]).trim_end().to_owned()
}

fn run_capturing(command: &mut Command) -> Result<Vec<u8>> {
    tracing::trace!("exec: {command:?}");
    let output = command
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("Failed to spawn {:?}", command.get_program()))?;
    if !output.status.success() {
        return Err(eyre!(
            "{:?} failed: {}\n{}",
            command.get_program(),
            output.status,
            stderr_tail(&output.stderr)
        ));
    }
    Ok(output.stdout)
}

impl CommandRun for Command {
    fn run(&mut self) -> Result<()> {
        run_capturing(self).map(|_| ())
    }

    fn run_get_string(&mut self) -> Result<String> {
        let stdout = run_capturing(self)?;
        String::from_utf8(stdout).context("Child stdout was not valid UTF-8")
    }

    fn run_and_parse_json<T: serde::de::DeserializeOwned>(&mut self) -> Result<T> {
        let stdout = run_capturing(self)?;
        serde_json::from_slice(&stdout).context("Failed to parse child stdout as JSON")
    }
}

/// Fail fast if any required host tool is missing from PATH.
///
/// Runs before any network or hypervisor activity so a missing tool is
/// reported as a precondition error, not a mid-pipeline failure.
pub fn ensure_host_commands(commands: &[&str]) -> Result<()> {
    let missing: Vec<String> = commands
        .iter()
        .filter(|c| which::which(c).is_err())
        .map(|c| format!("Missing required host command: {}", c))
        .collect();

    if !missing.is_empty() {
        return Err(eyre!("{}", missing.join("\n")));
    }

    tracing::debug!("All required host commands found: {commands:?}");
    Ok(())
}
