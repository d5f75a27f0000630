use crate::engine::HydraulicEngine;
use crate::error::EngineError;
use crate::io::results::MassBalanceTracker;
use crate::water_quality::WaterQuality;
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use tracing::debug;

/// Step the engine to the end of the run, applying treatment after every
/// hydraulic step. `on_step` sees the engine once the step's treated
/// concentrations are in place. Returns the number of steps taken.
pub fn run_simulation<E, F>(engine: &mut E, wq: &mut WaterQuality, mut on_step: F) -> Result<usize>
where
    E: HydraulicEngine,
    F: FnMut(usize, &NaiveDateTime, &E) -> Result<()>,
{
    let mut step = 0;
    while let Some(time) = engine.advance().context("Hydraulic step failed")? {
        step += 1;
        debug!("Starting step {} at {}", step, time);

        wq.update_wq_state(engine)
            .with_context(|| format!("Water quality update failed at step {} ({})", step, time))?;
        on_step(step, &time, engine)?;
    }
    Ok(step)
}

/// One tracker per treated link/pollutant, following the load into the node
/// downstream of the link. Takes the bound evaluator so the configuration has
/// already been checked against the engine.
pub fn mass_balance_trackers<E: HydraulicEngine>(
    engine: &E,
    wq: &WaterQuality,
) -> Result<Vec<MassBalanceTracker>, EngineError> {
    wq.config()
        .entries()
        .iter()
        .map(|entry| MassBalanceTracker::new(engine, &entry.link_id, entry.pollutant))
        .collect()
}
