use anyhow::Result;
use clap::Args;
use legato_core::{Boundary, MotionProfile, ProfileLimits, ProfileOptions, profile::SEGMENTS};
use std::fmt::Write;

#[derive(Args)]
pub struct ProfileArgs {
    /// Entry location.
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub from: f64,

    /// Exit location.
    #[arg(long, allow_negative_numbers = true)]
    pub to: f64,

    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub entry_velocity: f64,

    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub exit_velocity: f64,

    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub entry_acceleration: f64,

    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub exit_acceleration: f64,

    #[arg(long, default_value_t = 1000.0)]
    pub velocity_max: f64,

    #[arg(long, default_value_t = 700.0)]
    pub acceleration_max: f64,

    /// Zero selects constant acceleration control.
    #[arg(long, default_value_t = 2000.0)]
    pub jerk_max: f64,

    /// Stretch the profile to last at least this many seconds.
    #[arg(long)]
    pub time_min: Option<f64>,

    /// Also report when the profile crosses this location.
    #[arg(long, allow_negative_numbers = true)]
    pub cross: Option<f64>,
}

impl ProfileArgs {
    pub fn run(&self) -> Result<()> {
        let profile = self.solve()?;
        print!("{}", report(&profile, self.cross)?);
        Ok(())
    }

    fn solve(&self) -> Result<MotionProfile> {
        let mut limits =
            ProfileLimits::new(self.velocity_max, self.acceleration_max, self.jerk_max);
        if let Some(time_min) = self.time_min {
            limits = limits.with_time_min(time_min);
        }
        let mut profile = MotionProfile::new(
            Boundary::new(self.from, self.entry_velocity, self.entry_acceleration),
            Boundary::new(self.to, self.exit_velocity, self.exit_acceleration),
            limits,
            ProfileOptions::new(),
        );
        profile.solve();
        tracing::debug!(evaluations = profile.evaluations(), "profile solved");

        if let Some(state) = profile.check_validity() {
            anyhow::bail!("no valid profile found: {state}\n{profile}");
        }
        Ok(profile)
    }
}

/// `-0.0` prints as `0.000`.
fn num(value: f64) -> f64 {
    value + 0.0
}

fn report(profile: &MotionProfile, cross: Option<f64>) -> Result<String> {
    let mut out = String::new();
    writeln!(
        out,
        "{:>7} {:>10} {:>12} {:>12} {:>12} {:>12}",
        "segment", "duration", "location", "velocity", "acceleration", "jerk"
    )?;
    for segment in 1..=SEGMENTS {
        writeln!(
            out,
            "{segment:>7} {:>10.4} {:>12.3} {:>12.3} {:>12.3} {:>12.3}",
            num(profile.segment_time(segment)),
            num(profile.location(segment - 1)),
            num(profile.velocity(segment - 1)),
            num(profile.acceleration(segment - 1)),
            num(profile.jerk(segment - 1)),
        )?;
    }
    writeln!(
        out,
        "time {:.4} s, peak velocity {:.3}",
        num(profile.time()),
        num(profile.profile_velocity())
    )?;

    if let Some(location) = cross {
        match profile.forward_crossing_time(location, false) {
            Some(time) => writeln!(out, "crosses {location} at {:.4} s", num(time))?,
            None => writeln!(out, "never crosses {location}")?,
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        args: ProfileArgs,
    }

    fn args(argv: &[&str]) -> ProfileArgs {
        Cli::parse_from(std::iter::once("profile").chain(argv.iter().copied())).args
    }

    #[test]
    fn long_move() {
        let profile = args(&["--to", "600"]).solve().unwrap();
        assert!(profile.profile_velocity() <= 1000.0 + 1e-6);
        assert!(profile.time() > 0.6);

        let report = report(&profile, None).unwrap();
        let lines: Vec<_> = report.lines().collect();
        assert_eq!(lines.len(), SEGMENTS + 2);
        assert!(lines[0].starts_with("segment"));
        assert!(lines[SEGMENTS + 1].starts_with("time "));
    }

    #[test]
    fn symmetric_move_crosses_its_middle_halfway() {
        let profile = args(&["--from", "-300", "--to", "300"]).solve().unwrap();
        let half = profile.forward_crossing_time(0.0, false).unwrap();
        assert!((half - profile.time() / 2.0).abs() < 1e-3 * profile.time());

        let report = report(&profile, Some(1000.0)).unwrap();
        assert!(report.ends_with("never crosses 1000\n"), "{report}");
    }

    #[test]
    fn minimum_time_stretches_the_profile() {
        let mut args = args(&["--to", "100"]);
        let unconstrained = args.solve().unwrap().time();
        args.time_min = Some(2.0 * unconstrained);
        let profile = args.solve().unwrap();
        let stretched = 2.0 * unconstrained;
        assert!((profile.time() - stretched).abs() < 1e-6, "{profile}");
    }
}
