use anyhow::Result;
use clap::Args;
use xshell::{Shell, cmd};

use super::cargo;

const TARGETS: &[&str] = &[
    "re_solving_with_solved_limits_is_idempotent",
    "re_solving_moving_boundaries_with_solved_limits_is_valid",
    "boundary_states_are_kept",
    "retiming_stretches_resting_profiles_only",
    "reversed_profiles_are_valid",
    "limits_are_contained",
];

#[derive(Args)]
pub struct Fuzz {
    /// Property to fuzz. Fuzzes all of them in turn when omitted.
    target: Option<String>,

    /// Time spent on each property, e.g. `30s` or `5m`
    #[arg(long, short = 'T', default_value = "60s")]
    time: String,
}

impl Fuzz {
    pub fn run(self, sh: &Shell) -> Result<()> {
        cargo::ensure_installed(
            sh,
            "bolero --version",
            &["install", "cargo-bolero", "--locked"],
        )?;
        let targets = match &self.target {
            Some(target) => vec![target.as_str()],
            None => TARGETS.to_vec(),
        };
        let time = &self.time;
        for target in targets {
            eprintln!("Fuzzing {target} for {time}...");
            cmd!(
                sh,
                "cargo bolero test --package legato-core --test profile_properties {target} -T {time}"
            )
            .run()?;
        }
        Ok(())
    }
}
