//! Remote provisioning of the guest over SSH.
//!
//! Host-key verification is disabled on purpose: the peer is a freshly
//! cloned VM under the operator's control, and its key changes with every
//! clone.

use std::io::Write;
use std::process::{Command, Stdio};

use color_eyre::eyre::{eyre, Context, Result};
use tracing::{debug, info};

use crate::config::Config;

/// Version of the embedded provisioning script, bumped on any change to
/// its steps.
const PROVISION_SCRIPT_VERSION: u32 = 1;

/// winget package id of the Node.js runtime.
const NODE_PACKAGE: &str = "OpenJS.NodeJS.LTS";

/// npm package that ships the agent CLI.
const AGENT_CLI_PACKAGE: &str = "@anthropic-ai/claude-code";

/// Binary installed by the agent CLI package.
const AGENT_CLI_BIN: &str = "claude";

/// PowerShell provisioning template run inside the guest.
///
/// `$ErrorActionPreference = "Stop"` makes every unhandled failure halt
/// the script, so the ssh exit status reflects the first broken step.
/// The OpenSSH capability install is the one tolerated failure: on an
/// image that already ships it the cmdlet throws, which is logged and
/// skipped. The firewall rule is guarded rather than tolerated because
/// creating it twice would fail with a less obvious diagnostic.
const PROVISION_SCRIPT_TEMPLATE: &str = r#"# uvk guest provisioning, script version @VERSION@
$ErrorActionPreference = "Stop"
$ProgressPreference = "SilentlyContinue"

if (-not (Get-Command winget -ErrorAction SilentlyContinue)) {
    Write-Error "winget is not available in this guest"
}

winget install --id @NODE_PACKAGE@ --exact --silent --accept-package-agreements --accept-source-agreements

npm install -g @AGENT_CLI_PACKAGE@

try {
    Add-WindowsCapability -Online -Name OpenSSH.Server~~~~0.0.1.0
} catch {
    Write-Output "OpenSSH server capability already present, continuing: $_"
}

Start-Service sshd
Set-Service -Name sshd -StartupType Automatic

if (-not (Get-NetFirewallRule -Name "OpenSSH-Server-In-TCP" -ErrorAction SilentlyContinue)) {
    New-NetFirewallRule -Name "OpenSSH-Server-In-TCP" -DisplayName "OpenSSH Server (sshd)" -Enabled True -Direction Inbound -Protocol TCP -Action Allow -LocalPort 22
}

@AGENT_CLI_BIN@ --version
"#;

/// Render the provisioning script with its package pins filled in.
fn render_script() -> String {
    PROVISION_SCRIPT_TEMPLATE
        .replace("@VERSION@", &PROVISION_SCRIPT_VERSION.to_string())
        .replace("@NODE_PACKAGE@", NODE_PACKAGE)
        .replace("@AGENT_CLI_PACKAGE@", AGENT_CLI_PACKAGE)
        .replace("@AGENT_CLI_BIN@", AGENT_CLI_BIN)
}

/// Run the provisioning script inside the guest over SSH.
///
/// The script is fed through the child's stdin; its stdout/stderr pass
/// straight through to the operator's terminal.
pub fn provision(config: &Config, address: &str) -> Result<()> {
    info!("Provisioning guest at {} as user '{}'", address, config.ssh_user);

    let script = render_script();
    debug!("Provisioning script:\n{script}");

    let mut child = Command::new("ssh")
        .args([
            "-o",
            "StrictHostKeyChecking=no",
            "-o",
            "UserKnownHostsFile=/dev/null",
            "-o",
            "ConnectTimeout=10",
        ])
        .arg(format!("{}@{}", config.ssh_user, address))
        .args(["powershell", "-NoProfile", "-NonInteractive", "-Command", "-"])
        .stdin(Stdio::piped())
        .spawn()
        .context("Failed to spawn ssh")?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| eyre!("Failed to open stdin of the ssh child"))?;
    stdin
        .write_all(script.as_bytes())
        .context("Failed to send provisioning script to the guest")?;
    drop(stdin);

    let status = child.wait().context("Failed to wait for ssh")?;
    if !status.success() {
        return Err(eyre!("Guest provisioning failed: ssh exited with {status}"));
    }

    info!("Guest provisioning finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_has_strict_error_mode() {
        let script = render_script();
        assert!(script.contains(r#"$ErrorActionPreference = "Stop""#));
    }

    #[test]
    fn test_script_pins_packages() {
        let script = render_script();
        assert!(script.contains("winget install --id OpenJS.NodeJS.LTS"));
        assert!(script.contains("npm install -g @anthropic-ai/claude-code"));
        assert!(script.contains("claude --version"));
    }

    #[test]
    fn test_script_tolerates_existing_capability() {
        let script = render_script();
        assert!(script.contains("Add-WindowsCapability"));
        assert!(script.contains("already present, continuing"));
    }

    #[test]
    fn test_script_guards_firewall_rule() {
        let script = render_script();
        assert!(script.contains(r#"Get-NetFirewallRule -Name "OpenSSH-Server-In-TCP""#));
        assert!(script.contains("New-NetFirewallRule"));
    }

    #[test]
    fn test_script_has_no_unrendered_placeholders() {
        let script = render_script();
        assert!(!script.contains("@VERSION@"));
        assert!(!script.contains("@NODE_PACKAGE@"));
        assert!(!script.contains("@AGENT_CLI_PACKAGE@"));
        assert!(!script.contains("@AGENT_CLI_BIN@"));
    }
}
