//! Pipeline configuration resolved once at startup.
//!
//! Every later stage reads from an immutable [`Config`] built from the
//! parsed CLI flags plus the invoking user's home directory, so no stage
//! depends on ambient environment lookups of its own.

use camino::Utf8PathBuf;
use color_eyre::eyre::{eyre, Result};

/// GitHub repository that publishes UTM releases.
pub const UTM_REPO: &str = "utmapp/UTM";

/// Release asset carrying the disk image, matched by exact name.
pub const UTM_DMG_ASSET: &str = "UTM.dmg";

/// Name of the app bundle, both inside the mounted disk image and at the
/// install location.
pub const UTM_APP_BUNDLE: &str = "UTM.app";

/// Install location of the app bundle on the host.
const UTM_APP_PATH: &str = "/Applications/UTM.app";

/// UTM data directory holding VM bundles, relative to the home directory.
const UTM_DATA_DIR: &str = "Library/Containers/com.utmapp.UTM/Data/Documents";

/// Default template bundle, relative to the home directory.
const DEFAULT_TEMPLATE: &str = "Documents/WinDev.utm";

/// Default name for the cloned VM.
const DEFAULT_VM_NAME: &str = "agent-dev";

/// Default SSH user inside the guest.
const DEFAULT_SSH_USER: &str = "admin";

/// Resolved settings for one provisioning run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Template VM bundle to clone.
    pub template: Utf8PathBuf,

    /// Name of the cloned VM.
    pub vm_name: String,

    /// SSH user inside the guest.
    pub ssh_user: String,

    /// Where the hypervisor app bundle is (or will be) installed.
    pub app_path: Utf8PathBuf,

    /// Hypervisor data directory that receives the cloned bundle.
    pub data_dir: Utf8PathBuf,

    /// Reinstall the hypervisor even if it is already present.
    pub force_install: bool,
}

impl Config {
    /// Build the configuration from CLI overrides and the home directory.
    pub fn resolve(
        template: Option<Utf8PathBuf>,
        name: Option<String>,
        user: Option<String>,
        force_install: bool,
    ) -> Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| eyre!("Could not determine home directory"))?;
        let home = Utf8PathBuf::from_path_buf(home)
            .map_err(|p| eyre!("Home directory is not valid UTF-8: {}", p.display()))?;

        Ok(Self {
            template: template.unwrap_or_else(|| home.join(DEFAULT_TEMPLATE)),
            vm_name: name.unwrap_or_else(|| DEFAULT_VM_NAME.to_owned()),
            ssh_user: user.unwrap_or_else(|| DEFAULT_SSH_USER.to_owned()),
            app_path: Utf8PathBuf::from(UTM_APP_PATH),
            data_dir: home.join(UTM_DATA_DIR),
            force_install,
        })
    }

    /// Path of the `utmctl` control utility inside the app bundle.
    pub fn utmctl_path(&self) -> Utf8PathBuf {
        self.app_path.join("Contents/MacOS/utmctl")
    }

    /// Bundle path the cloned VM will occupy in the data directory.
    pub fn target_vm_path(&self) -> Utf8PathBuf {
        self.data_dir.join(format!("{}.utm", self.vm_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_defaults() {
        let config = Config::resolve(None, None, None, false).unwrap();
        assert!(config.template.as_str().ends_with("Documents/WinDev.utm"));
        assert_eq!(config.vm_name, "agent-dev");
        assert_eq!(config.ssh_user, "admin");
        assert_eq!(config.app_path, Utf8PathBuf::from("/Applications/UTM.app"));
        assert!(config
            .data_dir
            .as_str()
            .ends_with("Library/Containers/com.utmapp.UTM/Data/Documents"));
        assert!(!config.force_install);
    }

    #[test]
    fn test_resolve_overrides() {
        let config = Config::resolve(
            Some(Utf8PathBuf::from("/tmp/Base.utm")),
            Some("TestVM".to_string()),
            Some("alice".to_string()),
            true,
        )
        .unwrap();
        assert_eq!(config.template, Utf8PathBuf::from("/tmp/Base.utm"));
        assert_eq!(config.vm_name, "TestVM");
        assert_eq!(config.ssh_user, "alice");
        assert!(config.force_install);
    }

    #[test]
    fn test_target_vm_path_uses_name_and_data_dir() {
        let mut config = Config::resolve(None, Some("TestVM".to_string()), None, false).unwrap();
        config.data_dir = Utf8PathBuf::from("/var/vms");
        assert_eq!(config.target_vm_path(), Utf8PathBuf::from("/var/vms/TestVM.utm"));
    }

    #[test]
    fn test_utmctl_path_is_inside_bundle() {
        let config = Config::resolve(None, None, None, false).unwrap();
        assert_eq!(
            config.utmctl_path(),
            Utf8PathBuf::from("/Applications/UTM.app/Contents/MacOS/utmctl")
        );
    }
}
