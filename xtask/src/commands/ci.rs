use anyhow::Result;
use clap::{Args, Subcommand};
use xshell::Shell;

use super::{cargo, test::Test};

#[derive(Args)]
pub struct Ci {
    #[command(subcommand)]
    command: Option<CiCommand>,
}

#[derive(Subcommand)]
pub enum CiCommand {
    /// Check formatting without changing files
    Fmt,
    Clippy,
    /// Check for unused dependencies
    Udeps,
    Test(Test),
}

impl Ci {
    pub fn run(self, sh: &Shell) -> Result<()> {
        match self.command {
            Some(cmd) => cmd.run(sh),
            None => {
                CiCommand::Fmt.run(sh)?;
                CiCommand::Clippy.run(sh)?;
                CiCommand::Udeps.run(sh)?;
                CiCommand::Test(Test::default()).run(sh)
            }
        }
    }
}

impl CiCommand {
    pub fn run(self, sh: &Shell) -> Result<()> {
        match self {
            CiCommand::Fmt => cargo::fmt(sh, true),
            CiCommand::Clippy => cargo::clippy(sh),
            CiCommand::Udeps => cargo::udeps(sh),
            // Snapshots are never accepted on CI.
            CiCommand::Test(test) => Test {
                accept_snapshots: false,
                ..test
            }
            .run(sh),
        }
    }
}
