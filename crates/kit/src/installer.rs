//! UTM installation from GitHub releases.
//!
//! Ensures the hypervisor app bundle is present at its install location,
//! downloading the latest release disk image and copying the bundle into
//! place when it is absent or a reinstall is forced.

use std::path::Path;
use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::{eyre, Context, Result};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::command_run::{ensure_host_commands, CommandRun};
use crate::config::{Config, UTM_APP_BUNDLE, UTM_DMG_ASSET, UTM_REPO};

/// Host tools the installer shells out to.
const REQUIRED_COMMANDS: &[&str] = &["curl", "hdiutil", "ditto"];

/// Single downloadable asset in a release manifest.
#[derive(Debug, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
}

/// GitHub release manifest, reduced to the fields we consume.
#[derive(Debug, Deserialize)]
pub struct Release {
    pub tag_name: String,
    pub assets: Vec<ReleaseAsset>,
}

/// Find the release asset whose name matches exactly.
fn find_asset<'a>(release: &'a Release, name: &str) -> Option<&'a ReleaseAsset> {
    release.assets.iter().find(|a| a.name == name)
}

/// Query the GitHub API for the latest published release.
fn fetch_latest_release() -> Result<Release> {
    let url = format!("https://api.github.com/repos/{}/releases/latest", UTM_REPO);
    debug!("Fetching release manifest from {url}");
    Command::new("curl")
        .args(["-fsSL", "-H", "Accept: application/vnd.github+json"])
        .arg(&url)
        .run_and_parse_json()
        .context("Failed to query the latest UTM release")
}

/// Download a release asset to a local file.
fn download(url: &str, dest: &Path) -> Result<()> {
    info!("Downloading {url}");
    Command::new("curl")
        .args(["-fSL", "-o"])
        .arg(dest)
        .arg(url)
        .run()
        .context("Download failed")
}

/// Parse the mount point out of `hdiutil attach` output.
///
/// The attached volume is the final tab-separated field of the last
/// output line. Splitting on tabs keeps volume names with spaces intact.
fn parse_mount_point(output: &str) -> Result<Utf8PathBuf> {
    output
        .lines()
        .rev()
        .find_map(|line| {
            let field = line.rsplit('\t').next()?.trim();
            field.starts_with("/Volumes/").then(|| Utf8PathBuf::from(field))
        })
        .ok_or_else(|| eyre!("No mounted volume found in hdiutil output"))
}

/// Mount the disk image, returning the mount point of its volume.
fn attach_dmg(dmg_path: &Path) -> Result<Utf8PathBuf> {
    let output = Command::new("hdiutil")
        .args(["attach", "-nobrowse", "-readonly"])
        .arg(dmg_path)
        .run_get_string()
        .context("Failed to mount disk image")?;
    parse_mount_point(&output)
}

/// Unmount the disk image volume.
fn detach_dmg(mount_point: &Utf8Path) -> Result<()> {
    Command::new("hdiutil").arg("detach").arg(mount_point).run()
}

/// Copy the app bundle out of the mounted volume into the install path.
///
/// The existing install is only removed once the bundle has been located
/// inside the volume, so a bad disk image never destroys a working app.
fn install_app_bundle(config: &Config, mount_point: &Utf8Path) -> Result<()> {
    let bundle = mount_point.join(UTM_APP_BUNDLE);
    if !bundle.exists() {
        return Err(eyre!(
            "Mounted volume {} does not contain {}",
            mount_point,
            UTM_APP_BUNDLE
        ));
    }

    if config.app_path.exists() {
        info!("Removing existing install at {}", config.app_path);
        std::fs::remove_dir_all(&config.app_path)
            .with_context(|| format!("Failed to remove {}", config.app_path))?;
    }

    // ditto preserves resource forks and metadata that cp does not.
    Command::new("ditto")
        .arg(&bundle)
        .arg(&config.app_path)
        .run()
        .context("Failed to copy app bundle into place")?;

    info!("Installed {}", config.app_path);
    Ok(())
}

/// Guarantee the hypervisor app is installed at its known path.
///
/// A no-op when the bundle is already present and no reinstall was
/// forced.
pub fn ensure_installed(config: &Config) -> Result<()> {
    if config.app_path.exists() && !config.force_install {
        info!("UTM already installed at {}; skipping", config.app_path);
        return Ok(());
    }

    ensure_host_commands(REQUIRED_COMMANDS)?;

    let release = fetch_latest_release()?;
    let asset = find_asset(&release, UTM_DMG_ASSET).ok_or_else(|| {
        eyre!(
            "Release {} has no asset named {}",
            release.tag_name,
            UTM_DMG_ASSET
        )
    })?;
    info!("Installing UTM {}", release.tag_name);

    let workdir = tempfile::tempdir().context("Failed to create download directory")?;
    let dmg_path = workdir.path().join(UTM_DMG_ASSET);
    download(&asset.browser_download_url, &dmg_path)?;

    let mount_point = attach_dmg(&dmg_path)?;
    let result = install_app_bundle(config, &mount_point);

    // Best-effort cleanup; the install outcome is already decided.
    if let Err(e) = detach_dmg(&mount_point) {
        warn!("Failed to detach {}: {e:#}", mount_point);
    }

    result
}
