//! UTM virt kit (uvk) - provision a guest VM with the agent CLI installed
//!
//! uvk drives one sequential pipeline: install the UTM app from its
//! latest GitHub release if needed, clone and start a template VM, wait
//! for the guest agent to report an address, then install the agent CLI
//! inside the guest over SSH.

use camino::Utf8PathBuf;
use clap::Parser;
use color_eyre::{Report, Result};
use tracing::info;

mod command_run;
mod config;
mod installer;
mod ssh;
mod utils;
mod vm;

use config::Config;

/// Provision a development VM with the agent CLI installed.
///
/// Running with no flags installs UTM if it is missing, clones the
/// default template, boots it, and provisions the guest. The cloned VM
/// and the installed app are the deliverables; nothing is torn down on
/// success.
#[derive(Parser, Debug)]
#[command(version)]
struct Cli {
    /// Path to the template VM bundle to clone
    #[clap(long)]
    template: Option<Utf8PathBuf>,

    /// Name for the cloned VM
    #[clap(long)]
    name: Option<String>,

    /// SSH user inside the guest
    #[clap(long)]
    user: Option<String>,

    /// Reinstall UTM even if it is already present
    #[clap(long)]
    force_install: bool,
}

/// Install and configure the tracing/logging system.
///
/// Logs are filtered by the RUST_LOG environment variable, defaulting to
/// 'info', and written to stderr so stdout stays clean for the remote
/// session passthrough.
fn install_tracing() {
    use tracing_error::ErrorLayer;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let format = fmt::format().without_time().with_target(false).compact();

    let fmt_layer = fmt::layer()
        .event_format(format)
        .with_writer(std::io::stderr);
    let filter_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .init();
}

fn main() -> Result<(), Report> {
    install_tracing();
    color_eyre::install()?;

    let cli = Cli::parse();
    let config = Config::resolve(cli.template, cli.name, cli.user, cli.force_install)?;

    installer::ensure_installed(&config)?;
    let vm_path = vm::clone_and_start(&config)?;
    let address = vm::wait_for_guest_address(&config, &vm_path)?;
    ssh::provision(&config, &address)?;

    info!(
        "Done. Connect with: ssh {}@{}",
        config.ssh_user, address
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_rejects_unknown_flags() {
        assert!(Cli::try_parse_from(["uvk", "--bogus"]).is_err());
        assert!(Cli::try_parse_from(["uvk", "extra-positional"]).is_err());
    }

    #[test]
    fn test_cli_parses_all_flags() {
        let cli = Cli::try_parse_from([
            "uvk",
            "--template",
            "/tmp/Base.utm",
            "--name",
            "TestVM",
            "--user",
            "alice",
            "--force-install",
        ])
        .unwrap();
        assert_eq!(cli.template, Some(Utf8PathBuf::from("/tmp/Base.utm")));
        assert_eq!(cli.name.as_deref(), Some("TestVM"));
        assert_eq!(cli.user.as_deref(), Some("alice"));
        assert!(cli.force_install);
    }

    #[test]
    fn test_cli_help_is_not_an_execution() {
        let err = Cli::try_parse_from(["uvk", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }
}
