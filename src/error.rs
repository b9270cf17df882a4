use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("need at least {required} points to fit, got {found}")]
    InsufficientPoints { required: usize, found: usize },
    #[error("the normal matrix of the design is singular")]
    SingularDesign,
    #[error("averaging weights sum to zero")]
    ZeroTotalWeight,
    #[error("no models to average")]
    EmptyModelSet,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid series for {key:?}: {reason}")]
    InvalidSeries { key: String, reason: String },
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),
    #[error("failed to parse input: {0}")]
    InputParse(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
