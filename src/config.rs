use crate::error::{ConfigError, WaterQualityError};
use crate::methods::Method;
use chrono::NaiveDateTime;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

// Treatment entry as written in the configuration file
#[derive(Debug, Clone, Deserialize)]
pub struct RawTreatment {
    pub pollutant: usize,
    pub method: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, f64>,
}

// A link maps to a single treatment or a list of them
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum LinkTreatments {
    One(RawTreatment),
    Many(Vec<RawTreatment>),
}

/// One treated (link, pollutant) pair with its resolved method.
#[derive(Debug, Clone, PartialEq)]
pub struct TreatmentEntry {
    pub link_id: String,
    pub pollutant: usize,
    pub method: Method,
}

/// Static mapping from links to the treatment applied to each of their
/// pollutants. Built once before the run and never changed afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TreatmentConfig {
    entries: Vec<TreatmentEntry>,
}

impl TreatmentConfig {
    pub fn new() -> Self {
        TreatmentConfig {
            entries: Vec::new(),
        }
    }

    /// Resolve `method` by name and add it for the given link and pollutant.
    pub fn add(
        &mut self,
        link_id: &str,
        pollutant: usize,
        method: &str,
        parameters: &BTreeMap<String, f64>,
    ) -> Result<(), ConfigError> {
        let method = Method::from_parameters(link_id, method, parameters)?;
        self.add_method(link_id, pollutant, method)
    }

    pub fn add_method(
        &mut self,
        link_id: &str,
        pollutant: usize,
        method: Method,
    ) -> Result<(), ConfigError> {
        if self
            .entries
            .iter()
            .any(|e| e.link_id == link_id && e.pollutant == pollutant)
        {
            return Err(ConfigError::DuplicateEntry {
                link: link_id.to_string(),
                pollutant,
            });
        }
        self.entries.push(TreatmentEntry {
            link_id: link_id.to_string(),
            pollutant,
            method,
        });
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self, WaterQualityError> {
        let raw: BTreeMap<String, LinkTreatments> = serde_json::from_str(json)?;
        let mut config = TreatmentConfig::new();

        for (link_id, treatments) in raw {
            let treatments = match treatments {
                LinkTreatments::One(t) => vec![t],
                LinkTreatments::Many(ts) => ts,
            };
            for t in treatments {
                config.add(&link_id, t.pollutant, &t.method, &t.parameters)?;
            }
        }

        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, WaterQualityError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn entries(&self) -> &[TreatmentEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// Synthetic network description (network.json)
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkDefinition {
    pub start: NaiveDateTime,
    pub duration_seconds: u64,
    pub pollutants: Vec<String>,
    pub nodes: Vec<NodeDefinition>,
    pub links: Vec<LinkDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeDefinition {
    pub id: String,
    /// Hydrograph CSV, relative to the scenario directory
    #[serde(default)]
    pub inflow: Option<String>,
}

// Rectangular channel geometry
#[derive(Debug, Clone, Deserialize)]
pub struct LinkDefinition {
    pub id: String,
    pub from: String,
    pub to: String,
    pub length: f64,
    pub width: f64,
    pub slope: f64,
    pub roughness: f64,
}
