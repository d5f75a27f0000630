use crate::engine::HydraulicEngine;
use crate::error::EngineError;

// Flow and concentration recorded every step for one element
#[derive(Debug, Clone, Default)]
pub struct LoadSeries {
    pub flow: Vec<f64>,
    pub conc: Vec<f64>,
}

impl LoadSeries {
    pub fn new() -> Self {
        LoadSeries {
            flow: Vec::new(),
            conc: Vec::new(),
        }
    }

    pub fn push(&mut self, flow: f64, conc: f64) {
        self.flow.push(flow);
        self.conc.push(conc);
    }

    /// Concentration times flow for every recorded step.
    pub fn loads(&self) -> Vec<f64> {
        self.conc
            .iter()
            .zip(&self.flow)
            .map(|(c, q)| c * q)
            .collect()
    }

    pub fn cumulative_load(&self) -> f64 {
        self.loads().iter().sum()
    }

    pub fn len(&self) -> usize {
        self.flow.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flow.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MassBalance {
    pub link_id: String,
    pub node_id: String,
    pub pollutant: usize,
    pub link_load: f64,
    pub node_load: f64,
}

impl MassBalance {
    /// |node - link| / link. Zero when nothing moved at all.
    pub fn relative_error(&self) -> f64 {
        if self.link_load == 0.0 {
            if self.node_load == 0.0 { 0.0 } else { f64::INFINITY }
        } else {
            ((self.node_load - self.link_load) / self.link_load).abs()
        }
    }
}

/// Follows the load through a link and the node it discharges into.
#[derive(Debug, Clone)]
pub struct MassBalanceTracker {
    pub link_id: String,
    pub node_id: String,
    pub pollutant: usize,
    pub link: LoadSeries,
    pub node: LoadSeries,
}

impl MassBalanceTracker {
    pub fn new<E: HydraulicEngine>(
        engine: &E,
        link_id: &str,
        pollutant: usize,
    ) -> Result<Self, EngineError> {
        let node_id = engine.link_downstream_node(link_id)?;
        Ok(MassBalanceTracker {
            link_id: link_id.to_string(),
            node_id,
            pollutant,
            link: LoadSeries::new(),
            node: LoadSeries::new(),
        })
    }

    pub fn record<E: HydraulicEngine>(&mut self, engine: &E) -> Result<(), EngineError> {
        self.link.push(
            engine.link_flow(&self.link_id)?,
            engine.link_quality(&self.link_id, self.pollutant)?,
        );
        self.node.push(
            engine.node_inflow(&self.node_id)?,
            engine.node_quality(&self.node_id, self.pollutant)?,
        );
        Ok(())
    }

    pub fn balance(&self) -> MassBalance {
        MassBalance {
            link_id: self.link_id.clone(),
            node_id: self.node_id.clone(),
            pollutant: self.pollutant,
            link_load: self.link.cumulative_load(),
            node_load: self.node.cumulative_load(),
        }
    }
}
