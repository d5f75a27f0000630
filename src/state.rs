use std::collections::BTreeMap;

// State carried from one step to the next for a treated link/pollutant
#[derive(Debug, Clone, PartialEq)]
pub struct TreatmentState {
    pub previous_conc: Option<f64>,
    pub elapsed: f64,
    pub steps: usize,
    pub cumulative_load: f64,
}

impl TreatmentState {
    pub fn new() -> Self {
        TreatmentState {
            previous_conc: None,
            elapsed: 0.0,
            steps: 0,
            cumulative_load: 0.0,
        }
    }

    /// Record the concentration applied this step. Load is in grams
    /// (mg/L * m^3/s * s).
    pub fn update(&mut self, conc: f64, flow: f64, dt: f64) {
        self.previous_conc = Some(conc);
        self.elapsed += dt;
        self.steps += 1;
        self.cumulative_load += conc * flow.max(0.0) * dt;
    }
}

impl Default for TreatmentState {
    fn default() -> Self {
        Self::new()
    }
}

// Treatment states keyed by (link id, pollutant index)
#[derive(Debug, Default)]
pub struct StateTable {
    states: BTreeMap<(String, usize), TreatmentState>,
}

impl StateTable {
    pub fn new() -> Self {
        StateTable {
            states: BTreeMap::new(),
        }
    }

    pub fn initialize(&mut self, link_id: &str, pollutant: usize) {
        self.states
            .insert((link_id.to_string(), pollutant), TreatmentState::new());
    }

    pub fn get(&self, link_id: &str, pollutant: usize) -> Option<&TreatmentState> {
        self.states.get(&(link_id.to_string(), pollutant))
    }

    pub fn get_mut(&mut self, link_id: &str, pollutant: usize) -> Option<&mut TreatmentState> {
        self.states.get_mut(&(link_id.to_string(), pollutant))
    }

    pub fn iter(&self) -> impl Iterator<Item = ((&str, usize), &TreatmentState)> {
        self.states
            .iter()
            .map(|((link_id, pollutant), state)| ((link_id.as_str(), *pollutant), state))
    }
}
