use crate::config::{LinkDefinition, NetworkDefinition};
use crate::engine::HydraulicEngine;
use crate::error::EngineError;
use crate::io::csv::load_hydrograph;
use anyhow::{Context, Result};
use chrono::{Duration, NaiveDateTime};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use tracing::{debug, info};

const MAX_DEPTH_ITER: usize = 100;

/// Tabulated inflow: flow (m^3/s) and pollutant concentrations (mg/L) against
/// seconds since the start of the run. Linear in between rows, zero flow
/// outside the table.
#[derive(Debug, Clone, PartialEq)]
pub struct Hydrograph {
    times: Vec<f64>,
    flows: Vec<f64>,
    concentrations: Vec<Vec<f64>>,
}

impl Hydrograph {
    pub fn new(
        times: Vec<f64>,
        flows: Vec<f64>,
        concentrations: Vec<Vec<f64>>,
    ) -> Result<Self, EngineError> {
        if times.len() != flows.len() || times.len() != concentrations.len() {
            return Err(EngineError::InvalidNetwork(
                "hydrograph columns have different lengths".to_string(),
            ));
        }
        if times.iter().chain(&flows).any(|v| !v.is_finite()) {
            return Err(EngineError::InvalidNetwork(
                "hydrograph times and flows must be finite".to_string(),
            ));
        }
        if times.windows(2).any(|w| w[1] <= w[0]) {
            return Err(EngineError::InvalidNetwork(
                "hydrograph times must be strictly increasing".to_string(),
            ));
        }
        Ok(Hydrograph {
            times,
            flows,
            concentrations,
        })
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Flow and concentrations at `t` seconds.
    pub fn sample(&self, t: f64, pollutants: usize) -> (f64, Vec<f64>) {
        let zero = (0.0, vec![0.0; pollutants]);
        let (first, last) = match (self.times.first(), self.times.last()) {
            (Some(&first), Some(&last)) => (first, last),
            _ => return zero,
        };
        if t < first || t > last {
            return zero;
        }

        let upper = self.times.partition_point(|&x| x < t);
        if upper == 0 || self.times[upper] == t {
            return (self.flows[upper], self.row(upper, pollutants));
        }

        let lower = upper - 1;
        let frac = (t - self.times[lower]) / (self.times[upper] - self.times[lower]);
        let lerp = |a: f64, b: f64| a + (b - a) * frac;
        let flow = lerp(self.flows[lower], self.flows[upper]);
        let conc = self
            .row(lower, pollutants)
            .into_iter()
            .zip(self.row(upper, pollutants))
            .map(|(a, b)| lerp(a, b))
            .collect();
        (flow, conc)
    }

    fn row(&self, idx: usize, pollutants: usize) -> Vec<f64> {
        (0..pollutants)
            .map(|p| self.concentrations[idx].get(p).copied().unwrap_or(0.0))
            .collect()
    }
}

// Junction or outfall
#[derive(Debug, Clone)]
pub struct NetworkNode {
    pub id: String,
    pub downstream_link: Option<String>,
    pub upstream_links: Vec<String>,
    pub inflow: Option<Hydrograph>,
    pub total_inflow: f64,
    pub quality: Vec<f64>,
}

impl NetworkNode {
    pub fn new(id: &str, pollutants: usize) -> Self {
        NetworkNode {
            id: id.to_string(),
            downstream_link: None,
            upstream_links: Vec::new(),
            inflow: None,
            total_inflow: 0.0,
            quality: vec![0.0; pollutants],
        }
    }
}

// Rectangular conduit between two nodes
#[derive(Debug, Clone)]
pub struct NetworkLink {
    pub id: String,
    pub from: String,
    pub to: String,
    pub length: f64,
    pub width: f64,
    pub slope: f64,
    pub roughness: f64,
    pub flow: f64,
    pub depth: f64,
    pub volume: f64,
    pub quality: Vec<f64>,
}

/// A minimal plug-flow network used to host the treatment layer.
///
/// Every step each link hands the flow and quality it carried during the
/// previous step to its downstream node, nodes mix what they receive, and each
/// link then carries its upstream node's inflow. Whatever quality is written
/// into a link between steps is exactly what reaches the next node.
#[derive(Debug, Clone)]
pub struct SyntheticNetwork {
    start: NaiveDateTime,
    current: NaiveDateTime,
    end: NaiveDateTime,
    routing_step: Duration,
    pollutants: Vec<String>,
    pub nodes: BTreeMap<String, NetworkNode>,
    pub links: BTreeMap<String, NetworkLink>,
    pub routing_order: Vec<String>,
}

impl SyntheticNetwork {
    pub fn new(
        start: NaiveDateTime,
        duration: Duration,
        routing_step: Duration,
        pollutants: Vec<String>,
    ) -> Result<Self, EngineError> {
        if routing_step <= Duration::zero() {
            return Err(EngineError::InvalidNetwork(
                "routing step must be positive".to_string(),
            ));
        }
        let end = start.checked_add_signed(duration).ok_or_else(|| {
            EngineError::InvalidNetwork("run duration is out of range".to_string())
        })?;
        Ok(SyntheticNetwork {
            start,
            current: start,
            end,
            routing_step,
            pollutants,
            nodes: BTreeMap::new(),
            links: BTreeMap::new(),
            routing_order: Vec::new(),
        })
    }

    /// Build a network from a scenario definition. Hydrograph files are
    /// resolved relative to `scenario_dir`.
    pub fn from_definition(
        definition: &NetworkDefinition,
        scenario_dir: &Path,
        routing_step_seconds: i64,
    ) -> Result<Self> {
        let duration = i64::try_from(definition.duration_seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(|| {
                EngineError::InvalidNetwork(format!(
                    "duration of {} seconds is out of range",
                    definition.duration_seconds
                ))
            })?;
        let routing_step = Duration::try_seconds(routing_step_seconds).ok_or_else(|| {
            EngineError::InvalidNetwork(format!(
                "routing step of {} seconds is out of range",
                routing_step_seconds
            ))
        })?;
        let mut network = SyntheticNetwork::new(
            definition.start,
            duration,
            routing_step,
            definition.pollutants.clone(),
        )?;

        for node in &definition.nodes {
            network.add_node(&node.id)?;
            if let Some(file) = &node.inflow {
                let path = scenario_dir.join(file);
                let hydrograph = load_hydrograph(&path, &definition.pollutants)
                    .with_context(|| format!("Failed to load inflow for node {}", node.id))?;
                network.set_inflow(&node.id, hydrograph)?;
            }
        }
        for link in &definition.links {
            network.add_link(link)?;
        }
        network.build()?;

        info!(
            "Network built with {} nodes and {} links",
            network.nodes.len(),
            network.links.len()
        );
        Ok(network)
    }

    pub fn add_node(&mut self, id: &str) -> Result<(), EngineError> {
        if self.nodes.contains_key(id) {
            return Err(EngineError::InvalidNetwork(format!(
                "node {} defined twice",
                id
            )));
        }
        self.nodes
            .insert(id.to_string(), NetworkNode::new(id, self.pollutants.len()));
        Ok(())
    }

    pub fn add_link(&mut self, definition: &LinkDefinition) -> Result<(), EngineError> {
        if self.links.contains_key(&definition.id) {
            return Err(EngineError::InvalidNetwork(format!(
                "link {} defined twice",
                definition.id
            )));
        }
        if definition.width <= 0.0
            || definition.length <= 0.0
            || definition.slope <= 0.0
            || definition.roughness <= 0.0
        {
            return Err(EngineError::InvalidNetwork(format!(
                "link {} needs positive length, width, slope and roughness",
                definition.id
            )));
        }
        if !self.nodes.contains_key(&definition.to) {
            return Err(EngineError::NodeNotFound(definition.to.clone()));
        }
        let from = self
            .nodes
            .get_mut(&definition.from)
            .ok_or_else(|| EngineError::NodeNotFound(definition.from.clone()))?;
        if let Some(existing) = &from.downstream_link {
            return Err(EngineError::InvalidNetwork(format!(
                "node {} already drains through link {}",
                definition.from, existing
            )));
        }
        from.downstream_link = Some(definition.id.clone());

        self.links.insert(
            definition.id.clone(),
            NetworkLink {
                id: definition.id.clone(),
                from: definition.from.clone(),
                to: definition.to.clone(),
                length: definition.length,
                width: definition.width,
                slope: definition.slope,
                roughness: definition.roughness,
                flow: 0.0,
                depth: 0.0,
                volume: 0.0,
                quality: vec![0.0; self.pollutants.len()],
            },
        );
        Ok(())
    }

    pub fn set_inflow(&mut self, node_id: &str, hydrograph: Hydrograph) -> Result<(), EngineError> {
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| EngineError::NodeNotFound(node_id.to_string()))?;
        node.inflow = Some(hydrograph);
        Ok(())
    }

    /// Wire upstream links into their nodes and order the nodes for routing.
    pub fn build(&mut self) -> Result<(), EngineError> {
        self.build_upstream_connections();
        self.topological_sort()
    }

    fn build_upstream_connections(&mut self) {
        for node in self.nodes.values_mut() {
            node.upstream_links.clear();
        }
        for (id, link) in &self.links {
            if let Some(node) = self.nodes.get_mut(&link.to) {
                node.upstream_links.push(id.clone());
            }
        }
    }

    fn topological_sort(&mut self) -> Result<(), EngineError> {
        let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
        let mut queue: VecDeque<&str> = VecDeque::new();

        for (id, node) in &self.nodes {
            in_degree.insert(id.as_str(), node.upstream_links.len());
        }

        // Nodes nothing drains into
        for (id, &degree) in &in_degree {
            if degree == 0 {
                queue.push_back(*id);
            }
        }

        if queue.is_empty() && !self.nodes.is_empty() {
            return Err(EngineError::InvalidNetwork(
                "no upstream nodes found - possible cycle in network".to_string(),
            ));
        }

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(current) = queue.pop_front() {
            order.push(current.to_string());

            let downstream = self.nodes[current]
                .downstream_link
                .as_ref()
                .and_then(|link_id| self.links.get(link_id))
                .map(|link| link.to.as_str());
            if let Some(downstream) = downstream {
                if let Some(degree) = in_degree.get_mut(downstream) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(downstream);
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            return Err(EngineError::InvalidNetwork(format!(
                "cycle detected in network topology: ordered {} nodes out of {}",
                order.len(),
                self.nodes.len()
            )));
        }

        debug!("Routing order: {:?}", order);
        self.routing_order = order;
        Ok(())
    }

    pub fn routing_step_seconds(&self) -> f64 {
        self.routing_step.num_milliseconds() as f64 / 1000.0
    }

    /// Number of steps `advance` will produce from the start of the run.
    pub fn total_steps(&self) -> u64 {
        let span = (self.end - self.start).num_milliseconds().max(0);
        let step = self.routing_step.num_milliseconds();
        (span / step + i64::from(span % step != 0)) as u64
    }

    fn link(&self, link_id: &str) -> Result<&NetworkLink, EngineError> {
        self.links
            .get(link_id)
            .ok_or_else(|| EngineError::LinkNotFound(link_id.to_string()))
    }

    fn node(&self, node_id: &str) -> Result<&NetworkNode, EngineError> {
        self.nodes
            .get(node_id)
            .ok_or_else(|| EngineError::NodeNotFound(node_id.to_string()))
    }

    fn check_pollutant(&self, pollutant: usize) -> Result<(), EngineError> {
        if pollutant >= self.pollutants.len() {
            return Err(EngineError::PollutantIndexOutOfRange {
                index: pollutant,
                count: self.pollutants.len(),
            });
        }
        Ok(())
    }
}

impl HydraulicEngine for SyntheticNetwork {
    fn start_time(&self) -> NaiveDateTime {
        self.start
    }

    fn current_time(&self) -> NaiveDateTime {
        self.current
    }

    fn advance(&mut self) -> Result<Option<NaiveDateTime>, EngineError> {
        if self.current >= self.end {
            return Ok(None);
        }
        self.current = self
            .current
            .checked_add_signed(self.routing_step)
            .ok_or_else(|| EngineError::InvalidNetwork("simulation clock overflowed".to_string()))?;
        let t = (self.current - self.start).num_milliseconds() as f64 / 1000.0;
        let n_pollutants = self.pollutants.len();

        // What each link carried last step arrives downstream now
        let delivered: HashMap<&str, (f64, &[f64])> = self
            .links
            .iter()
            .map(|(id, link)| (id.as_str(), (link.flow, link.quality.as_slice())))
            .collect();

        let mut mixed: HashMap<String, (f64, Vec<f64>)> = HashMap::new();
        for id in &self.routing_order {
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            let (external_flow, external_conc) = match &node.inflow {
                Some(hydrograph) => hydrograph.sample(t, n_pollutants),
                None => (0.0, vec![0.0; n_pollutants]),
            };

            let mut flow = external_flow.max(0.0);
            let mut mass: Vec<f64> = external_conc.iter().map(|c| c * flow).collect();
            for upstream in &node.upstream_links {
                if let Some((q, conc)) = delivered.get(upstream.as_str()) {
                    flow += q;
                    for (m, c) in mass.iter_mut().zip(conc.iter()) {
                        *m += q * c;
                    }
                }
            }

            let quality = mass
                .iter()
                .map(|m| if flow > 0.0 { m / flow } else { 0.0 })
                .collect();
            mixed.insert(id.clone(), (flow, quality));
        }

        for (id, (flow, quality)) in mixed {
            if let Some(node) = self.nodes.get_mut(&id) {
                node.total_inflow = flow;
                node.quality = quality;
            }
        }

        for link in self.links.values_mut() {
            if let Some(from) = self.nodes.get(&link.from) {
                link.flow = from.total_inflow;
                link.quality = from.quality.clone();
                link.depth = normal_depth(link.flow, link.width, link.slope, link.roughness);
                link.volume = link.width * link.depth * link.length;
            }
        }

        Ok(Some(self.current))
    }

    fn pollutant_count(&self) -> usize {
        self.pollutants.len()
    }

    fn pollutant_names(&self) -> Vec<String> {
        self.pollutants.clone()
    }

    fn link_ids(&self) -> Vec<String> {
        self.links.keys().cloned().collect()
    }

    fn node_ids(&self) -> Vec<String> {
        self.routing_order.clone()
    }

    fn has_link(&self, link_id: &str) -> bool {
        self.links.contains_key(link_id)
    }

    fn link_flow(&self, link_id: &str) -> Result<f64, EngineError> {
        Ok(self.link(link_id)?.flow)
    }

    fn link_depth(&self, link_id: &str) -> Result<f64, EngineError> {
        Ok(self.link(link_id)?.depth)
    }

    fn link_volume(&self, link_id: &str) -> Result<f64, EngineError> {
        Ok(self.link(link_id)?.volume)
    }

    fn link_quality(&self, link_id: &str, pollutant: usize) -> Result<f64, EngineError> {
        self.check_pollutant(pollutant)?;
        Ok(self.link(link_id)?.quality[pollutant])
    }

    fn set_link_quality(
        &mut self,
        link_id: &str,
        pollutant: usize,
        value: f64,
    ) -> Result<(), EngineError> {
        self.check_pollutant(pollutant)?;
        let link = self
            .links
            .get_mut(link_id)
            .ok_or_else(|| EngineError::LinkNotFound(link_id.to_string()))?;
        link.quality[pollutant] = value;
        Ok(())
    }

    fn link_downstream_node(&self, link_id: &str) -> Result<String, EngineError> {
        Ok(self.link(link_id)?.to.clone())
    }

    fn node_inflow(&self, node_id: &str) -> Result<f64, EngineError> {
        Ok(self.node(node_id)?.total_inflow)
    }

    fn node_quality(&self, node_id: &str, pollutant: usize) -> Result<f64, EngineError> {
        self.check_pollutant(pollutant)?;
        Ok(self.node(node_id)?.quality[pollutant])
    }
}

/// Manning flow (m^3/s) through a rectangular section at depth `h`.
pub fn manning_flow(h: f64, width: f64, slope: f64, n: f64) -> f64 {
    if h <= 0.0 {
        return 0.0;
    }
    let area = width * h;
    let wp = width + 2.0 * h;
    (1.0 / n) * area * (area / wp).powf(2.0 / 3.0) * slope.sqrt()
}

/// Normal depth of a rectangular channel carrying `flow`, found with the
/// secant method on the Manning equation.
pub fn normal_depth(
    flow: f64,  // m^3/s
    width: f64, // bottom width (m)
    slope: f64, // bottom slope (m/m)
    n: f64,     // mannings coefficient
) -> f64 {
    if flow <= 0.0 || width <= 0.0 || slope <= 0.0 || n <= 0.0 {
        return 0.0;
    }

    // Wide channel estimate as the starting point
    let mut h = (flow * n / (width * slope.sqrt())).powf(0.6);
    let mut h_0 = 0.5 * h;
    let mut qj_0 = manning_flow(h_0, width, slope, n) - flow;
    let mut qj = manning_flow(h, width, slope, n) - flow;
    let mut h_1: f64;
    let mut rerror: f64 = 1.0;
    let mut iter = 0;

    while rerror > 1e-10 && iter < MAX_DEPTH_ITER {
        if qj_0 == qj {
            break;
        }
        h_1 = h - qj * (h_0 - h) / (qj_0 - qj);
        if h_1 <= 0.0 {
            h_1 = 0.5 * h;
        }
        rerror = ((h_1 - h) / h).abs();

        h_0 = h;
        qj_0 = qj;
        h = h_1;
        qj = manning_flow(h, width, slope, n) - flow;
        iter += 1;
    }

    h
}
