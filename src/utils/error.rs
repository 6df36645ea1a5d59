use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong in the publish/subscribe layer.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration could not be loaded or a required value is absent.
    /// Fatal, raised before any broker interaction.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A payload would not serialize. Local and caller-recoverable.
    #[error("failed to serialize payload")]
    Serialization(#[source] serde_json::Error),

    /// Message bytes would not parse back into a payload.
    #[error("failed to deserialize message data")]
    Deserialization(#[source] serde_json::Error),

    /// The broker rejected a publish or the transport failed. Surfaces
    /// synchronously to the caller; never retried internally.
    #[error("publish to topic `{topic}` failed: {reason}")]
    Publish { topic: String, reason: String },

    /// A handler reported failure while processing a delivery.
    #[error("message processing failed: {0}")]
    Processing(String),
}

impl Error {
    /// A [`Error::Configuration`] for a missing required key.
    pub fn missing_config(key: impl AsRef<str>) -> Self {
        Error::Configuration(format!("missing required value `{}`", key.as_ref()))
    }

    pub fn publish(topic: impl Into<String>, reason: impl ToString) -> Self {
        Error::Publish {
            topic: topic.into(),
            reason: reason.to_string(),
        }
    }

    pub fn processing(reason: impl Into<String>) -> Self {
        Error::Processing(reason.into())
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Configuration(err.to_string())
    }
}
