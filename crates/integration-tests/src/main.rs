//! Integration tests for uvk
//!
//! These drive the built binary from the outside. The CLI-surface tests
//! only need the binary; the full provisioning test creates a real VM and
//! is gated behind UVK_INTEGRATION=1 plus a prepared template.

use std::process::Output;

use camino::Utf8Path;
use color_eyre::eyre::{eyre, Result};
use libtest_mimic::{Arguments, Trial};
use xshell::{cmd, Shell};

/// Get the path to the uvk binary, checking UVK_PATH env var first, then
/// falling back to "uvk".
fn get_uvk_command() -> Result<String> {
    if let Ok(path) = std::env::var("UVK_PATH") {
        return Ok(path);
    }
    // Force the user to set this if we're running from the project dir
    if let Some(path) = ["target/debug/uvk", "target/release/uvk"]
        .into_iter()
        .find(|p| Utf8Path::new(p).exists())
    {
        return Err(eyre!(
            "Detected {path} - set UVK_PATH={path} to run using this binary"
        ));
    }
    Ok("uvk".to_owned())
}

/// Captured output from a command with decoded stdout/stderr strings
struct CapturedOutput {
    output: Output,
    stdout: String,
    stderr: String,
}

impl CapturedOutput {
    fn new(output: Output) -> Self {
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        Self {
            output,
            stdout,
            stderr,
        }
    }

    fn success(&self) -> bool {
        self.output.status.success()
    }
}

/// Run the uvk binary, capturing output
fn run_uvk(args: &[&str]) -> Result<CapturedOutput> {
    let uvk = get_uvk_command()?;
    let output = std::process::Command::new(&uvk).args(args).output()?;
    Ok(CapturedOutput::new(output))
}

fn test_help_lists_flags() -> Result<()> {
    let result = run_uvk(&["--help"])?;
    if !result.success() {
        return Err(eyre!("--help exited nonzero: {}", result.stderr));
    }
    for flag in ["--template", "--name", "--user", "--force-install"] {
        if !result.stdout.contains(flag) {
            return Err(eyre!("--help output is missing {flag}: {}", result.stdout));
        }
    }
    Ok(())
}

fn test_unknown_flag_is_fatal() -> Result<()> {
    let result = run_uvk(&["--definitely-not-a-flag"])?;
    if result.success() {
        return Err(eyre!("Unknown flag was accepted"));
    }
    if !result.stderr.contains("--definitely-not-a-flag") {
        return Err(eyre!(
            "Diagnostic does not name the unknown flag: {}",
            result.stderr
        ));
    }
    Ok(())
}

fn test_missing_template_fails_at_clone_stage() -> Result<()> {
    // Only meaningful on a host that already has the hypervisor
    // installed; otherwise the installer stage would hit the network
    // first.
    if !Utf8Path::new("/Applications/UTM.app").exists() {
        eprintln!("Skipping: UTM is not installed on this host");
        return Ok(());
    }
    let result = run_uvk(&[
        "--template",
        "/nonexistent/Base.utm",
        "--name",
        "uvk-integration-missing-template",
    ])?;
    if result.success() {
        return Err(eyre!("Pipeline succeeded with a missing template"));
    }
    if !result.stderr.contains("Template VM not found") {
        return Err(eyre!("Unexpected diagnostic: {}", result.stderr));
    }
    Ok(())
}

/// Full end-to-end provisioning run. Clones a real template, boots it,
/// and provisions the guest - minutes of wall time and real side effects.
fn test_full_provisioning() -> Result<()> {
    if std::env::var("UVK_INTEGRATION").as_deref() != Ok("1") {
        eprintln!("Skipping: set UVK_INTEGRATION=1 to run the full pipeline");
        return Ok(());
    }
    let template =
        std::env::var("UVK_TEST_TEMPLATE").map_err(|_| eyre!("UVK_TEST_TEMPLATE must be set"))?;

    let sh = Shell::new()?;
    let uvk = get_uvk_command()?;
    let name = "uvk-integration-e2e";

    cmd!(sh, "{uvk} --template {template} --name {name}").run()?;
    Ok(())
}

fn main() {
    let args = Arguments::from_args();

    let tests = vec![
        Trial::test("test_help_lists_flags", || {
            test_help_lists_flags().map_err(|e| format!("{:?}", e).into())
        }),
        Trial::test("test_unknown_flag_is_fatal", || {
            test_unknown_flag_is_fatal().map_err(|e| format!("{:?}", e).into())
        }),
        Trial::test("test_missing_template_fails_at_clone_stage", || {
            test_missing_template_fails_at_clone_stage().map_err(|e| format!("{:?}", e).into())
        }),
        Trial::test("test_full_provisioning", || {
            test_full_provisioning().map_err(|e| format!("{:?}", e).into())
        }),
    ];

    libtest_mimic::run(&args, tests).exit();
}
