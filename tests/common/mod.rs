#![allow(dead_code)]

use chrono::{Duration, NaiveDateTime};
use storm_reactor::config::LinkDefinition;
use storm_reactor::io::results::{MassBalance, MassBalanceTracker};
use storm_reactor::network::{Hydrograph, SyntheticNetwork};
use storm_reactor::simulation::{mass_balance_trackers, run_simulation};
use storm_reactor::{TreatmentConfig, WaterQuality};

pub const ROUTING_STEP_SECONDS: i64 = 60;

fn conduit(id: &str, from: &str, to: &str, width: f64, slope: f64) -> LinkDefinition {
    LinkDefinition {
        id: id.to_string(),
        from: from.to_string(),
        to: to.to_string(),
        length: 200.0,
        width,
        slope,
        roughness: 0.015,
    }
}

/// Inflow -> Culvert -> Outlet -> Channel -> TailWater, fed by a storm
/// hydrograph that rises over half an hour and recedes to zero after two.
pub fn variable_inflow_network() -> SyntheticNetwork {
    let start = NaiveDateTime::parse_from_str("2020-05-01 00:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
    let mut network = SyntheticNetwork::new(
        start,
        Duration::hours(3),
        Duration::seconds(ROUTING_STEP_SECONDS),
        vec!["P1".to_string(), "P2".to_string()],
    )
    .unwrap();

    for id in ["Inflow", "Outlet", "TailWater"] {
        network.add_node(id).unwrap();
    }
    network
        .add_link(&conduit("Culvert", "Inflow", "Outlet", 1.5, 0.01))
        .unwrap();
    network
        .add_link(&conduit("Channel", "Outlet", "TailWater", 10.0, 0.001))
        .unwrap();

    let times: Vec<f64> = (0..=12).map(|i| i as f64 * 600.0).collect();
    let flows = vec![0.0, 0.5, 1.5, 3.0, 4.0, 3.2, 2.5, 1.8, 1.2, 0.7, 0.3, 0.1, 0.0];
    let p1 = [10.0, 12.0, 15.0, 20.0, 18.0, 14.0, 12.0, 10.0, 9.0, 8.0, 8.0, 8.0, 8.0];
    let concentrations = p1.iter().map(|c| vec![*c, 5.0]).collect();
    network
        .set_inflow("Inflow", Hydrograph::new(times, flows, concentrations).unwrap())
        .unwrap();

    network.build().unwrap();
    network
}

/// Run the scenario with `config` and return the mass balance of every
/// treated link/pollutant against its downstream node.
pub fn run_with_trackers(config: TreatmentConfig) -> Vec<MassBalance> {
    let mut network = variable_inflow_network();
    let mut wq = WaterQuality::new(config, &network).unwrap();
    let mut trackers: Vec<MassBalanceTracker> = mass_balance_trackers(&network, &wq).unwrap();

    run_simulation(&mut network, &mut wq, |_, _, engine| {
        for tracker in trackers.iter_mut() {
            tracker.record(engine)?;
        }
        Ok(())
    })
    .unwrap();

    trackers.iter().map(|t| t.balance()).collect()
}

/// Cumulative load reaching `node_id` for `pollutant`.
pub fn node_load(config: TreatmentConfig, node_id: &str, pollutant: usize) -> f64 {
    use storm_reactor::HydraulicEngine;

    let mut network = variable_inflow_network();
    let mut wq = WaterQuality::new(config, &network).unwrap();
    let mut load = 0.0;
    run_simulation(&mut network, &mut wq, |_, _, engine| {
        load += engine.node_inflow(node_id)? * engine.node_quality(node_id, pollutant)?;
        Ok(())
    })
    .unwrap();
    load
}
