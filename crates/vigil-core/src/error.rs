use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Failure inside a learned spoof classifier. Never surfaced to callers of
/// the texture analyzer: it triggers the frequency-domain fallback instead.
#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("failed to load classifier model: {0}")]
    Load(String),
    #[error("classifier inference failed: {0}")]
    Inference(String),
    #[error("classifier returned no output")]
    EmptyOutput,
    #[error("unexpected classifier tensor shape: {0}")]
    Shape(String),
}
