use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use tracing::{info, warn};

mod cli;

use cli::get_args;
use storm_reactor::config::{NetworkDefinition, TreatmentConfig};
use storm_reactor::engine::HydraulicEngine;
use storm_reactor::io::csv::{create_csv_writer, write_step};
use storm_reactor::logging::setup_tracing;
use storm_reactor::network::SyntheticNetwork;
use storm_reactor::simulation::{mass_balance_trackers, run_simulation};
use storm_reactor::water_quality::WaterQuality;

// Relative difference between link and downstream node loads worth flagging
const MASS_BALANCE_TOLERANCE: f64 = 0.03;

fn main() -> Result<()> {
    // Configuration
    let args = get_args()?;
    setup_tracing(args.debug)?;

    // Build the network
    let network_json = fs::read_to_string(&args.network_file)
        .with_context(|| format!("Failed to read network file: {:?}", args.network_file))?;
    let definition: NetworkDefinition = serde_json::from_str(&network_json)
        .with_context(|| format!("Failed to parse network file: {:?}", args.network_file))?;
    let mut network = SyntheticNetwork::from_definition(
        &definition,
        &args.scenario_dir,
        args.routing_step_seconds,
    )?;

    // Load treatments
    let config = TreatmentConfig::from_path(&args.treatment_file)
        .with_context(|| format!("Failed to load treatments: {:?}", args.treatment_file))?;
    let mut wq = WaterQuality::new(config, &network)?;
    let mut trackers = mass_balance_trackers(&network, &wq)?;

    // Set up CSV output
    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("Failed to create {:?}", args.output_dir))?;
    let output_file = args.output_dir.join("wq_results.csv");
    let mut csv_writer = create_csv_writer(&output_file, &network.pollutant_names())?;

    info!("Simulation Configuration:");
    info!("  Start: {}", network.start_time());
    info!("  Routing step: {} seconds", network.routing_step_seconds());
    info!("  Total steps: {}", network.total_steps());
    info!("  Treatments: {}", wq.config().len());

    // Create progress bar
    let pb = ProgressBar::new(network.total_steps());
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} steps ({eta})")?
            .progress_chars("#>-"),
    );

    let steps = run_simulation(&mut network, &mut wq, |step, time, engine| {
        for tracker in trackers.iter_mut() {
            tracker.record(engine)?;
        }
        write_step(&mut csv_writer, step, time, engine)?;
        pb.inc(1);
        Ok(())
    })?;
    pb.finish();

    csv_writer.flush().context("Failed to flush CSV writer")?;

    for tracker in &trackers {
        let balance = tracker.balance();
        let error = balance.relative_error();
        if error > MASS_BALANCE_TOLERANCE {
            warn!(
                "Link {} pollutant {}: load {:.3} vs {:.3} at node {} ({:.2}% apart)",
                balance.link_id,
                balance.pollutant,
                balance.link_load,
                balance.node_load,
                balance.node_id,
                error * 100.0
            );
        } else {
            info!(
                "Link {} pollutant {}: load {:.3}, node {} load {:.3}",
                balance.link_id,
                balance.pollutant,
                balance.link_load,
                balance.node_id,
                balance.node_load
            );
        }
    }

    info!(
        "Water quality run complete after {} steps. Output saved to {:?}",
        steps, output_file
    );
    Ok(())
}
