//! VM cloning, startup, and guest address discovery via `utmctl`.

use std::process::Command;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::{eyre, Context, Result};
use tracing::{debug, info};

use crate::command_run::CommandRun;
use crate::config::Config;
use crate::utils::wait_for_readiness;

/// Interval between guest address queries.
const ADDRESS_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Attempt budget for the guest address query (120 x 5s = 10 minutes).
const ADDRESS_POLL_ATTEMPTS: u32 = 120;

/// Create a `utmctl` invocation against the installed app bundle.
fn utmctl_command(config: &Config) -> Command {
    Command::new(config.utmctl_path().as_std_path())
}

/// Clone the template into the data directory and start the new VM.
///
/// Returns the bundle path of the running VM. Refuses to overwrite an
/// existing bundle; the operator picks a fresh name or removes the stale
/// one.
pub fn clone_and_start(config: &Config) -> Result<Utf8PathBuf> {
    if !config.template.exists() {
        return Err(eyre!("Template VM not found at {}", config.template));
    }

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("Failed to create data directory {}", config.data_dir))?;

    let target = config.target_vm_path();
    if target.exists() {
        return Err(eyre!(
            "VM bundle {} already exists; choose a different --name or remove it first",
            target
        ));
    }

    info!("Cloning {} to {}", config.template, target);
    utmctl_command(config)
        .arg("clone")
        .arg(&config.template)
        .arg(&target)
        .run()
        .context("utmctl clone failed")?;

    info!("Starting VM '{}'", config.vm_name);
    utmctl_command(config)
        .arg("start")
        .arg(&target)
        .run()
        .context("utmctl start failed")?;

    Ok(target)
}

/// First whitespace-delimited token of the first output line, if any.
fn first_address_token(output: &str) -> Option<String> {
    output.lines().next()?.split_whitespace().next().map(str::to_owned)
}

/// Poll the guest agent until the VM reports a network address.
///
/// Query failures and empty output both mean "not booted yet" and keep
/// the loop going; only an exhausted attempt budget is fatal.
pub fn wait_for_guest_address(config: &Config, vm: &Utf8Path) -> Result<String> {
    info!("Waiting for the guest to report an address");

    let probe = || {
        let output = match utmctl_command(config).arg("ip-address").arg(vm).run_get_string() {
            Ok(output) => output,
            Err(e) => {
                debug!("ip-address query not ready: {e:#}");
                return Ok(None);
            }
        };
        Ok(first_address_token(&output))
    };

    let address = wait_for_readiness(
        "Waiting for guest address",
        probe,
        ADDRESS_POLL_ATTEMPTS,
        ADDRESS_POLL_INTERVAL,
    )
    .context(
        "Guest never reported an address; check that the guest agent/tools are installed in the template",
    )?;

    info!("Guest is reachable at {address}");
    Ok(address)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &Utf8Path) -> Config {
        let mut config = Config::resolve(
            Some(dir.join("Base.utm")),
            Some("TestVM".to_string()),
            Some("alice".to_string()),
            false,
        )
        .unwrap();
        config.data_dir = dir.join("vms");
        config
    }

    fn tempdir_utf8() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        (dir, path)
    }

    #[test]
    fn test_clone_requires_template() {
        let (_dir, path) = tempdir_utf8();
        let config = test_config(&path);
        let err = clone_and_start(&config).unwrap_err();
        assert!(err.to_string().contains("Template VM not found"));
    }

    #[test]
    fn test_clone_refuses_existing_bundle() {
        let (_dir, path) = tempdir_utf8();
        let config = test_config(&path);
        std::fs::create_dir_all(&config.template).unwrap();
        std::fs::create_dir_all(config.target_vm_path()).unwrap();

        let err = clone_and_start(&config).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_first_address_token() {
        assert_eq!(
            first_address_token("192.168.64.5 fe80::1\n192.168.64.9\n"),
            Some("192.168.64.5".to_string())
        );
        assert_eq!(first_address_token("  10.0.0.2\n"), Some("10.0.0.2".to_string()));
        assert_eq!(first_address_token(""), None);
        assert_eq!(first_address_token("\n10.0.0.2\n"), None);
        assert_eq!(first_address_token("   \n"), None);
    }
}
