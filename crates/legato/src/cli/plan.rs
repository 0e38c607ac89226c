use crate::config::{Config, Job};
use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use legato_core::{
    AxesLocation, Clock, CompletionType, Driver, ManualClock, Planner, PlannerStrategy,
    SimulatedDriver,
};
use std::{fmt::Write, path::PathBuf, sync::Arc};

#[derive(Args)]
pub struct PlanArgs {
    /// Path to the machine configuration (TOML or JSON).
    pub config: PathBuf,

    /// Path to the job listing the moves (TOML or JSON).
    pub job: PathBuf,

    /// Seconds between printed trajectory samples.
    #[arg(long, default_value_t = 0.1)]
    pub interval: f64,

    /// Override the configured planner strategy.
    #[arg(long, value_enum)]
    pub strategy: Option<Strategy>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Strategy {
    Null,
    Simple,
    Advanced,
}

impl From<Strategy> for PlannerStrategy {
    fn from(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Null => PlannerStrategy::Null,
            Strategy::Simple => PlannerStrategy::Simple,
            Strategy::Advanced => PlannerStrategy::Advanced,
        }
    }
}

impl PlanArgs {
    pub fn run(&self) -> Result<()> {
        if self.interval <= 0.0 {
            anyhow::bail!("--interval must be positive");
        }
        let mut config = Config::from_file(&self.config)?;
        config.validate()?;
        if let Some(strategy) = self.strategy {
            config.planner.strategy = strategy.into();
        }
        let job = Job::from_file(&self.job)?;

        tracing::info!(
            config = %self.config.display(),
            job = %self.job.display(),
            strategy = ?config.planner.strategy,
            "planning job"
        );
        print!("{}", run_job(&config, &job, self.interval)?);
        Ok(())
    }
}

/// Plan and execute `job` on a simulated machine, returning the report.
pub fn run_job(config: &Config, job: &Job, interval: f64) -> Result<String> {
    let axes = config.axes();
    let driver = Arc::new(SimulatedDriver::new("simulated", axes.ids().cloned()));
    let clock = Arc::new(ManualClock::new(0.0));
    let drivers: Vec<Arc<dyn Driver>> = vec![driver];
    let planner = Planner::new(axes, drivers, clock.clone(), config.planner.clone());

    let mut out = String::new();
    if job.home {
        planner.home().context("homing failed")?;
    }

    let start = clock.now();
    for (i, request) in job.moves.iter().enumerate() {
        let target = request.target(planner.axes())?;
        planner
            .move_to(&target, request.speed, request.options())
            .with_context(|| format!("move {} to {target} rejected", i + 1))?;
        writeln!(out, "move {}: {}", i + 1, coordinates(&target))?;
        if request.wait {
            planner.wait_for_completion(None, CompletionType::WaitForStillstand)?;
        }
    }
    planner.wait_for_completion(None, CompletionType::WaitForStillstand)?;
    if let Some(status) = planner.last_solver_status() {
        writeln!(out, "path solver: {status:?}")?;
    }

    let plan = planner.plan_snapshot();
    let first = plan
        .entries()
        .iter()
        .find(|entry| entry.time >= start)
        .map_or(start, |entry| entry.start_time().max(start));
    let end = plan.last().map_or(start, |entry| entry.time);
    let duration = end - start;
    writeln!(out, "planned {} motions in {duration:.3} s", plan.len())?;

    let mut time = first;
    while time < end {
        let location = planner.momentary_location(time);
        writeln!(out, "{:>8.3} {}", time - start, coordinates(&location))?;
        time += interval;
    }
    writeln!(out, "{:>8.3} {}", end - start, coordinates(&planner.momentary_location(end)))?;
    Ok(out)
}

fn coordinates(location: &AxesLocation) -> String {
    location
        .iter()
        .map(|(axis, c)| format!("{axis}={:.3}", c + 0.0))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MoveRequest;
    use legato_core::{AxisConfig, PlannerConfig};
    use std::collections::BTreeMap;

    fn config(strategy: PlannerStrategy) -> Config {
        Config {
            planner: PlannerConfig {
                strategy,
                ..PlannerConfig::default()
            },
            axes: vec![
                AxisConfig::linear("X")
                    .with_limits(500.0, 2000.0, 15000.0)
                    .with_soft_limits(Some(0.0), Some(200.0)),
                AxisConfig::linear("Y").with_limits(500.0, 2000.0, 15000.0),
            ],
        }
    }

    fn move_to(target: &[(&str, f64)]) -> MoveRequest {
        MoveRequest {
            target: target
                .iter()
                .map(|(name, c)| (name.to_string(), *c))
                .collect::<BTreeMap<_, _>>(),
            speed: 1.0,
            blend: false,
            uncoordinated: false,
            speed_over_precision: false,
            safe_zone: false,
            wait: false,
        }
    }

    #[test]
    fn null_strategy_report() {
        let job = Job {
            home: false,
            moves: vec![move_to(&[("X", 100.0), ("Y", 50.0)])],
        };
        let report = run_job(&config(PlannerStrategy::Null), &job, 0.1).unwrap();
        insta::assert_snapshot!(report, @r"
        move 1: X=100.000 Y=50.000
        planned 1 motions in 0.000 s
           0.000 X=100.000 Y=50.000
        ");
    }

    #[test]
    fn samples_follow_the_plan() {
        let job = Job {
            home: false,
            moves: vec![
                move_to(&[("X", 100.0)]),
                move_to(&[("Y", 40.0)]),
                move_to(&[("X", 0.0), ("Y", 0.0)]),
            ],
        };
        let report = run_job(&config(PlannerStrategy::Simple), &job, 0.05).unwrap();
        let samples: Vec<_> = report.lines().skip(4).collect();
        assert!(samples.len() > 3, "{report}");
        assert_eq!(samples[0], "   0.000 X=0.000 Y=0.000");
        let last = samples[samples.len() - 1];
        assert!(last.ends_with(" X=0.000 Y=0.000"), "{report}");
        assert!(report.contains("planned 3 motions"), "{report}");
    }

    #[test]
    fn rejected_moves_name_the_move() {
        let job = Job {
            home: false,
            moves: vec![move_to(&[("X", 100.0)]), move_to(&[("X", 250.0)])],
        };
        let err = run_job(&config(PlannerStrategy::Simple), &job, 0.1).unwrap_err();
        insta::assert_snapshot!(format!("{err:#}"), @"move 2 to (X:250.0000) rejected: can't move X to 250, higher than soft limit 200");
    }
}
