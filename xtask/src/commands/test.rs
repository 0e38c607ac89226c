use anyhow::Result;
use clap::Args;
use xshell::{Shell, cmd};

#[derive(Args, Default)]
pub struct Test {
    /// Only test this package
    #[arg(long, short)]
    pub package: Option<String>,

    /// Write changed insta snapshots back into the sources
    #[arg(long)]
    pub accept_snapshots: bool,

    /// Additional arguments to pass to cargo test
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

impl Test {
    pub fn run(self, sh: &Shell) -> Result<()> {
        let package = match &self.package {
            Some(package) => vec!["--package", package.as_str()],
            None => vec!["--workspace"],
        };
        let args = &self.args;
        let update = if self.accept_snapshots {
            "always"
        } else {
            "no"
        };
        eprintln!("Running cargo test...");
        cmd!(sh, "cargo test {package...} {args...}")
            .env("INSTA_UPDATE", update)
            .run()?;
        Ok(())
    }
}
