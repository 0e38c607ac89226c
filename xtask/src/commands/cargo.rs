use anyhow::Result;
use xshell::{Shell, cmd};

/// Install a cargo subcommand unless `probe` already succeeds.
pub fn ensure_installed(sh: &Shell, probe: &str, install: &[&str]) -> Result<()> {
    let probe: Vec<_> = probe.split_whitespace().collect();
    if cmd!(sh, "cargo {probe...}").quiet().ignore_stderr().run().is_err() {
        eprintln!("Installing {}...", install.join(" "));
        cmd!(sh, "cargo {install...}").run()?;
    }
    Ok(())
}

/// The formatting config relies on nightly rustfmt.
pub fn ensure_nightly_rustfmt(sh: &Shell) -> Result<()> {
    if cmd!(sh, "cargo +nightly fmt --version")
        .quiet()
        .run()
        .is_err()
    {
        eprintln!("Installing nightly rustfmt...");
        cmd!(
            sh,
            "rustup toolchain install nightly --profile minimal --component rustfmt"
        )
        .run()?;
    }
    Ok(())
}

pub fn fmt(sh: &Shell, check: bool) -> Result<()> {
    ensure_nightly_rustfmt(sh)?;
    let check = check.then_some("--check");
    eprintln!("Running cargo fmt...");
    cmd!(sh, "cargo +nightly fmt --all -- {check...}").run()?;
    Ok(())
}

pub fn clippy(sh: &Shell) -> Result<()> {
    eprintln!("Running cargo clippy...");
    cmd!(
        sh,
        "cargo clippy --all-features --all-targets --workspace -- -D warnings"
    )
    .run()?;
    Ok(())
}

pub fn udeps(sh: &Shell) -> Result<()> {
    ensure_nightly_rustfmt(sh)?;
    ensure_installed(
        sh,
        "+nightly udeps --version",
        &["+nightly", "install", "cargo-udeps", "--locked"],
    )?;
    eprintln!("Running cargo udeps...");
    cmd!(sh, "cargo +nightly udeps --workspace --all-targets").run()?;
    Ok(())
}
