use thiserror::Error;

/// Problems with the treatment configuration. All of these are raised while the
/// configuration is loaded or bound to an engine, never mid-run.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("unknown treatment method `{method}` on link `{link}`")]
    UnknownMethod { link: String, method: String },
    #[error("method `{method}` on link `{link}` is missing parameter `{name}`")]
    MissingParameter {
        link: String,
        method: String,
        name: String,
    },
    #[error("method `{method}` on link `{link}` does not take parameter `{name}`")]
    UnexpectedParameter {
        link: String,
        method: String,
        name: String,
    },
    #[error("parameter `{name}` = {value} of method `{method}` on link `{link}` {reason}")]
    InvalidParameter {
        link: String,
        method: String,
        name: String,
        value: f64,
        reason: &'static str,
    },
    #[error("link `{0}` is not part of the network")]
    UnknownLink(String),
    #[error("pollutant index {pollutant} on link `{link}` is out of range ({count} pollutants)")]
    PollutantOutOfRange {
        link: String,
        pollutant: usize,
        count: usize,
    },
    #[error("pollutant {pollutant} on link `{link}` is configured more than once")]
    DuplicateEntry { link: String, pollutant: usize },
}

/// Errors raised by a hydraulic engine when asked about elements it does not have.
#[derive(Error, Debug, PartialEq)]
pub enum EngineError {
    #[error("link `{0}` not found")]
    LinkNotFound(String),
    #[error("node `{0}` not found")]
    NodeNotFound(String),
    #[error("pollutant index {index} out of range ({count} pollutants)")]
    PollutantIndexOutOfRange { index: usize, count: usize },
    #[error("invalid network: {0}")]
    InvalidNetwork(String),
}

#[derive(Error, Debug)]
pub enum WaterQualityError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("no treatment state for pollutant {pollutant} on link `{link}`")]
    MissingState { link: String, pollutant: usize },
    #[error("unable to parse treatment configuration")]
    Json(#[from] serde_json::Error),
    #[error("unable to read treatment configuration")]
    Io(#[from] std::io::Error),
}
