use anyhow::Result;
use clap::Subcommand;
use xshell::Shell;

pub mod cargo;
pub mod ci;
pub mod fuzz;
pub mod test;

#[derive(Subcommand)]
pub enum Command {
    /// Run the CI checks (fmt, clippy, udeps, test). Runs all without a subcommand.
    Ci(ci::Ci),
    /// Apply rustfmt to the workspace
    Fmt,
    /// Fuzz the motion profile properties with cargo-bolero
    Fuzz(fuzz::Fuzz),
    /// Run the workspace tests
    Test(test::Test),
}

impl Command {
    pub fn run(self, sh: &Shell) -> Result<()> {
        match self {
            Command::Ci(cmd) => cmd.run(sh),
            Command::Fmt => cargo::fmt(sh, false),
            Command::Fuzz(cmd) => cmd.run(sh),
            Command::Test(cmd) => cmd.run(sh),
        }
    }
}
