use crate::error::EngineError;
use chrono::NaiveDateTime;

/// The hydraulic simulation the treatment layer rides on.
///
/// An engine is stepped with [`HydraulicEngine::advance`]; between steps the
/// treatment layer reads link hydraulics and quality and may overwrite the
/// quality a link carries downstream with [`HydraulicEngine::set_link_quality`].
/// Flows are in m^3/s, depths in m, volumes in m^3 and concentrations in mg/L.
pub trait HydraulicEngine {
    fn start_time(&self) -> NaiveDateTime;

    fn current_time(&self) -> NaiveDateTime;

    /// Run one routing step. Returns the new simulation time, or `None` once the
    /// run has finished.
    fn advance(&mut self) -> Result<Option<NaiveDateTime>, EngineError>;

    fn pollutant_count(&self) -> usize;

    fn pollutant_names(&self) -> Vec<String>;

    fn link_ids(&self) -> Vec<String>;

    fn node_ids(&self) -> Vec<String>;

    fn has_link(&self, link_id: &str) -> bool;

    fn link_flow(&self, link_id: &str) -> Result<f64, EngineError>;

    fn link_depth(&self, link_id: &str) -> Result<f64, EngineError>;

    fn link_volume(&self, link_id: &str) -> Result<f64, EngineError>;

    fn link_quality(&self, link_id: &str, pollutant: usize) -> Result<f64, EngineError>;

    fn set_link_quality(
        &mut self,
        link_id: &str,
        pollutant: usize,
        value: f64,
    ) -> Result<(), EngineError>;

    /// Node the link discharges into.
    fn link_downstream_node(&self, link_id: &str) -> Result<String, EngineError>;

    fn node_inflow(&self, node_id: &str) -> Result<f64, EngineError>;

    fn node_quality(&self, node_id: &str, pollutant: usize) -> Result<f64, EngineError>;
}
