use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cli;
mod config;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Profile(args) => args.run(),
        Command::Plan(args) => args.run(),
    }
}

#[derive(Parser)]
#[command(name = "legato", about = "Jerk-limited motion planning")]
struct Cli {
    /// Log solver and planner details.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Solve a single-axis motion profile and print its segments.
    Profile(cli::profile::ProfileArgs),
    /// Plan a job of moves on a simulated machine and print the trajectory.
    Plan(cli::plan::PlanArgs),
}
