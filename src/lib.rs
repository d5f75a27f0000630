pub mod config;
pub mod engine;
pub mod error;
pub mod io;
pub mod logging;
pub mod methods;
pub mod network;
pub mod simulation;
pub mod state;
pub mod water_quality;

pub use config::TreatmentConfig;
pub use engine::HydraulicEngine;
pub use error::{ConfigError, EngineError, WaterQualityError};
pub use methods::Method;
pub use network::SyntheticNetwork;
pub use water_quality::WaterQuality;
