use anyhow::{Result, bail};
use clap::{Parser, command};
use std::path::PathBuf;

/// Apply pollutant treatments to a synthetic stormwater network
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Scenario directory holding network.json, treatment.json and the inflow files
    scenario_dir: PathBuf,

    /// Length of a routing step
    #[arg(short, long, default_value_t = 60)]
    routing_step_seconds: i64,

    /// Log every treated value
    #[arg(long)]
    debug: bool,
}

#[derive(Debug, Clone)]
pub struct RunArgs {
    pub scenario_dir: PathBuf,
    pub network_file: PathBuf,
    pub treatment_file: PathBuf,
    pub output_dir: PathBuf,
    pub routing_step_seconds: i64,
    pub debug: bool,
}

pub fn get_args() -> Result<RunArgs> {
    let args = Args::parse();

    let scenario_dir = args.scenario_dir;
    if !scenario_dir.is_dir() {
        bail!("Scenario directory {:?} does not exist", scenario_dir);
    }
    if args.routing_step_seconds <= 0 {
        bail!("Routing step must be positive");
    }

    Ok(RunArgs {
        network_file: scenario_dir.join("network.json"),
        treatment_file: scenario_dir.join("treatment.json"),
        output_dir: scenario_dir.join("outputs"),
        scenario_dir,
        routing_step_seconds: args.routing_step_seconds,
        debug: args.debug,
    })
}
