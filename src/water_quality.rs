use crate::config::TreatmentConfig;
use crate::engine::HydraulicEngine;
use crate::error::{ConfigError, WaterQualityError};
use crate::methods::StepInputs;
use crate::state::{StateTable, TreatmentState};
use chrono::NaiveDateTime;
use tracing::{debug, info};

/// Applies the configured treatments to an engine once per simulation step.
#[derive(Debug)]
pub struct WaterQuality {
    config: TreatmentConfig,
    states: StateTable,
    last_time: NaiveDateTime,
}

impl WaterQuality {
    /// Bind a configuration to an engine. Every treated link must exist and
    /// every pollutant index must be known to the engine.
    pub fn new<E: HydraulicEngine>(
        config: TreatmentConfig,
        engine: &E,
    ) -> Result<Self, WaterQualityError> {
        let count = engine.pollutant_count();
        let mut states = StateTable::new();

        for entry in config.entries() {
            if !engine.has_link(&entry.link_id) {
                return Err(ConfigError::UnknownLink(entry.link_id.clone()).into());
            }
            if entry.pollutant >= count {
                return Err(ConfigError::PollutantOutOfRange {
                    link: entry.link_id.clone(),
                    pollutant: entry.pollutant,
                    count,
                }
                .into());
            }
            states.initialize(&entry.link_id, entry.pollutant);
            info!(
                "Link {} pollutant {}: {}",
                entry.link_id,
                entry.pollutant,
                entry.method.name()
            );
        }

        Ok(WaterQuality {
            config,
            states,
            last_time: engine.current_time(),
        })
    }

    /// Recompute and write back the concentration of every configured
    /// link/pollutant for the engine's current step.
    ///
    /// The step length is the time the engine clock moved since the previous
    /// call. All values are computed before any is written, and a failed write
    /// puts back the values already written, so an error leaves the engine
    /// untouched.
    pub fn update_wq_state<E: HydraulicEngine>(
        &mut self,
        engine: &mut E,
    ) -> Result<(), WaterQualityError> {
        let now = engine.current_time();
        let dt = ((now - self.last_time).num_milliseconds() as f64 / 1000.0).max(0.0);

        let mut updates = Vec::with_capacity(self.config.len());
        for entry in self.config.entries() {
            let link_id = entry.link_id.as_str();
            let inputs = StepInputs {
                flow: engine.link_flow(link_id)?,
                depth: engine.link_depth(link_id)?,
                volume: engine.link_volume(link_id)?,
                inflow_conc: engine.link_quality(link_id, entry.pollutant)?,
                dt,
            };
            let state = self.states.get(link_id, entry.pollutant).ok_or_else(|| {
                WaterQualityError::MissingState {
                    link: link_id.to_string(),
                    pollutant: entry.pollutant,
                }
            })?;
            let conc = entry.method.evaluate(&inputs, state);
            updates.push((entry, conc, inputs));
        }

        for (written, (entry, conc, _)) in updates.iter().enumerate() {
            if let Err(err) = engine.set_link_quality(&entry.link_id, entry.pollutant, *conc) {
                // Put back what this step already wrote
                for (entry, _, inputs) in &updates[..written] {
                    engine.set_link_quality(&entry.link_id, entry.pollutant, inputs.inflow_conc)?;
                }
                return Err(err.into());
            }
        }

        for (entry, conc, inputs) in updates {
            if let Some(state) = self.states.get_mut(&entry.link_id, entry.pollutant) {
                state.update(conc, inputs.flow, dt);
            }
            debug!(
                "{} link {} pollutant {} -> {:.6}",
                now, entry.link_id, entry.pollutant, conc
            );
        }

        self.last_time = now;
        Ok(())
    }

    pub fn config(&self) -> &TreatmentConfig {
        &self.config
    }

    pub fn state(&self, link_id: &str, pollutant: usize) -> Option<&TreatmentState> {
        self.states.get(link_id, pollutant)
    }

    /// Every treatment state, ordered by link id then pollutant index.
    pub fn states(&self) -> impl Iterator<Item = ((&str, usize), &TreatmentState)> {
        self.states.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::methods::Method;
    use chrono::Duration;
    use std::collections::HashMap;

    // Engine with fixed hydraulics and a hand-driven clock
    struct FixedEngine {
        time: NaiveDateTime,
        flows: HashMap<String, f64>,
        quality: HashMap<(String, usize), f64>,
        broken: Option<String>,
        read_only: Option<String>,
    }

    impl FixedEngine {
        fn new() -> Self {
            let time =
                NaiveDateTime::parse_from_str("2021-06-01 00:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
            let mut flows = HashMap::new();
            let mut quality = HashMap::new();
            for link in ["Culvert", "Channel"] {
                flows.insert(link.to_string(), 2.0);
                quality.insert((link.to_string(), 0), 20.0);
                quality.insert((link.to_string(), 1), 8.0);
            }
            FixedEngine {
                time,
                flows,
                quality,
                broken: None,
                read_only: None,
            }
        }

        fn check(&self, link_id: &str) -> Result<(), EngineError> {
            if self.broken.as_deref() == Some(link_id) || !self.flows.contains_key(link_id) {
                return Err(EngineError::LinkNotFound(link_id.to_string()));
            }
            Ok(())
        }
    }

    impl HydraulicEngine for FixedEngine {
        fn start_time(&self) -> NaiveDateTime {
            self.time
        }
        fn current_time(&self) -> NaiveDateTime {
            self.time
        }
        fn advance(&mut self) -> Result<Option<NaiveDateTime>, EngineError> {
            self.time += Duration::seconds(60);
            Ok(Some(self.time))
        }
        fn pollutant_count(&self) -> usize {
            2
        }
        fn pollutant_names(&self) -> Vec<String> {
            vec!["TSS".to_string(), "TP".to_string()]
        }
        fn link_ids(&self) -> Vec<String> {
            self.flows.keys().cloned().collect()
        }
        fn node_ids(&self) -> Vec<String> {
            vec![]
        }
        fn has_link(&self, link_id: &str) -> bool {
            self.flows.contains_key(link_id)
        }
        fn link_flow(&self, link_id: &str) -> Result<f64, EngineError> {
            self.check(link_id)?;
            Ok(self.flows[link_id])
        }
        fn link_depth(&self, link_id: &str) -> Result<f64, EngineError> {
            self.check(link_id)?;
            Ok(0.5)
        }
        fn link_volume(&self, link_id: &str) -> Result<f64, EngineError> {
            self.check(link_id)?;
            Ok(100.0)
        }
        fn link_quality(&self, link_id: &str, pollutant: usize) -> Result<f64, EngineError> {
            self.check(link_id)?;
            Ok(self.quality[&(link_id.to_string(), pollutant)])
        }
        fn set_link_quality(
            &mut self,
            link_id: &str,
            pollutant: usize,
            value: f64,
        ) -> Result<(), EngineError> {
            self.check(link_id)?;
            if self.read_only.as_deref() == Some(link_id) {
                return Err(EngineError::InvalidNetwork(format!("{} is read only", link_id)));
            }
            self.quality.insert((link_id.to_string(), pollutant), value);
            Ok(())
        }
        fn link_downstream_node(&self, link_id: &str) -> Result<String, EngineError> {
            Err(EngineError::LinkNotFound(link_id.to_string()))
        }
        fn node_inflow(&self, node_id: &str) -> Result<f64, EngineError> {
            Err(EngineError::NodeNotFound(node_id.to_string()))
        }
        fn node_quality(&self, node_id: &str, _pollutant: usize) -> Result<f64, EngineError> {
            Err(EngineError::NodeNotFound(node_id.to_string()))
        }
    }

    fn config(entries: &[(&str, usize, Method)]) -> TreatmentConfig {
        let mut config = TreatmentConfig::new();
        for (link, pollutant, method) in entries {
            config.add_method(link, *pollutant, *method).unwrap();
        }
        config
    }

    #[test]
    fn writes_treated_concentrations() {
        let mut engine = FixedEngine::new();
        let mut wq = WaterQuality::new(
            config(&[
                ("Culvert", 0, Method::ConstantRemoval { r: 0.5 }),
                ("Culvert", 1, Method::EventMeanConc { c: 1.5 }),
            ]),
            &engine,
        )
        .unwrap();

        engine.advance().unwrap();
        wq.update_wq_state(&mut engine).unwrap();

        assert_eq!(engine.link_quality("Culvert", 0).unwrap(), 10.0);
        assert_eq!(engine.link_quality("Culvert", 1).unwrap(), 1.5);
        assert_eq!(engine.link_quality("Channel", 0).unwrap(), 20.0);

        let state = wq.state("Culvert", 0).unwrap();
        assert_eq!(state.previous_conc, Some(10.0));
        assert_eq!(state.elapsed, 60.0);
        assert_eq!(state.cumulative_load, 10.0 * 2.0 * 60.0);
    }

    #[test]
    fn step_length_follows_engine_clock() {
        let mut engine = FixedEngine::new();
        let method = Method::GravitySettling { k: 0.01, c_s: 10.0 };
        let mut wq = WaterQuality::new(config(&[("Culvert", 0, method)]), &engine).unwrap();

        // Clock has not moved: nothing settles
        wq.update_wq_state(&mut engine).unwrap();
        assert_eq!(engine.link_quality("Culvert", 0).unwrap(), 20.0);

        engine.advance().unwrap();
        wq.update_wq_state(&mut engine).unwrap();
        let expected = 10.0 + 10.0 * (-0.6f64).exp();
        assert!((engine.link_quality("Culvert", 0).unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn failing_entry_leaves_engine_untouched() {
        let mut engine = FixedEngine::new();
        let mut wq = WaterQuality::new(
            config(&[
                ("Culvert", 0, Method::EventMeanConc { c: 1.0 }),
                ("Channel", 0, Method::EventMeanConc { c: 1.0 }),
            ]),
            &engine,
        )
        .unwrap();

        engine.broken = Some("Channel".to_string());
        engine.advance().unwrap();
        let err = wq.update_wq_state(&mut engine).unwrap_err();

        assert!(matches!(err, WaterQualityError::Engine(EngineError::LinkNotFound(_))));
        assert_eq!(engine.quality[&("Culvert".to_string(), 0)], 20.0);
        assert_eq!(wq.state("Culvert", 0).unwrap().steps, 0);
    }

    #[test]
    fn failed_write_restores_earlier_links() {
        let mut engine = FixedEngine::new();
        let mut wq = WaterQuality::new(
            config(&[
                ("Channel", 0, Method::ConstantRemoval { r: 0.5 }),
                ("Culvert", 0, Method::ConstantRemoval { r: 0.5 }),
            ]),
            &engine,
        )
        .unwrap();

        engine.read_only = Some("Culvert".to_string());
        engine.advance().unwrap();
        let err = wq.update_wq_state(&mut engine).unwrap_err();

        assert!(matches!(err, WaterQualityError::Engine(EngineError::InvalidNetwork(_))));
        assert_eq!(engine.quality[&("Channel".to_string(), 0)], 20.0);
        assert_eq!(engine.quality[&("Culvert".to_string(), 0)], 20.0);
        assert_eq!(wq.state("Channel", 0).unwrap().steps, 0);

        // The next step starts from a consistent engine
        engine.read_only = None;
        wq.update_wq_state(&mut engine).unwrap();
        assert_eq!(engine.quality[&("Channel".to_string(), 0)], 10.0);
        assert_eq!(engine.quality[&("Culvert".to_string(), 0)], 10.0);
    }

    #[test]
    fn states_lists_every_entry_in_order() {
        let mut engine = FixedEngine::new();
        let mut wq = WaterQuality::new(
            config(&[
                ("Culvert", 1, Method::EventMeanConc { c: 1.0 }),
                ("Channel", 0, Method::EventMeanConc { c: 2.0 }),
                ("Culvert", 0, Method::EventMeanConc { c: 3.0 }),
            ]),
            &engine,
        )
        .unwrap();
        engine.advance().unwrap();
        wq.update_wq_state(&mut engine).unwrap();

        let states: Vec<_> = wq
            .states()
            .map(|((link, pollutant), state)| (link.to_string(), pollutant, state.previous_conc))
            .collect();
        assert_eq!(
            states,
            vec![
                ("Channel".to_string(), 0, Some(2.0)),
                ("Culvert".to_string(), 0, Some(3.0)),
                ("Culvert".to_string(), 1, Some(1.0)),
            ]
        );
    }

    #[test]
    fn rejects_unknown_link_and_pollutant() {
        let engine = FixedEngine::new();
        let err = WaterQuality::new(
            config(&[("Weir", 0, Method::EventMeanConc { c: 1.0 })]),
            &engine,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            WaterQualityError::Config(ConfigError::UnknownLink(_))
        ));

        let err = WaterQuality::new(
            config(&[("Culvert", 2, Method::EventMeanConc { c: 1.0 })]),
            &engine,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            WaterQualityError::Config(ConfigError::PollutantOutOfRange { count: 2, .. })
        ));
    }

    #[test]
    fn cstr_carries_previous_concentration() {
        let mut engine = FixedEngine::new();
        let method = Method::Cstr {
            k: 0.0,
            n: 1.0,
            c0: 0.0,
        };
        let mut wq = WaterQuality::new(config(&[("Culvert", 0, method)]), &engine).unwrap();

        engine.advance().unwrap();
        wq.update_wq_state(&mut engine).unwrap();
        let first = engine.link_quality("Culvert", 0).unwrap();

        // Reset the inflow concentration the way an engine step would
        engine.quality.insert(("Culvert".to_string(), 0), 20.0);
        engine.advance().unwrap();
        wq.update_wq_state(&mut engine).unwrap();
        let second = engine.link_quality("Culvert", 0).unwrap();

        assert!(first > 0.0 && first < 20.0);
        assert!(second > first && second < 20.0);
    }
}
