//! Error types for the model test bench campaign

use thiserror::Error;

/// Main error type for campaign operations
#[derive(Error, Debug)]
pub enum CampaignError {
    /// No session with the simulation platform could be established
    #[error("Platform unreachable: {0}")]
    PlatformUnreachable(String),

    /// The platform has no active project
    #[error("No active project")]
    NoActiveProject,

    /// The platform has no active study case
    #[error("Please activate a study case")]
    NoActiveStudyCase,

    /// No grid in the network data is calculation relevant
    #[error("No active grids")]
    NoActiveGrids,

    /// A binding references a channel the registry does not contain
    #[error("Channel {0} not found")]
    UnknownChannel(String),

    /// Two channels share a name
    #[error("Duplicate channel name: {0}")]
    DuplicateChannel(String),

    /// A channel has a different variant than the caller requires
    #[error("Channel {name} is not a {expected} channel")]
    ChannelKindMismatch { name: String, expected: &'static str },

    /// A channel has no value for the requested case
    #[error("Channel {name} has no value for rank {rank}")]
    MissingChannelValue { name: String, rank: u32 },

    /// Two cases share a rank
    #[error("Duplicate case rank: {0}")]
    DuplicateRank(u32),

    /// A transform expression could not be parsed
    #[error("Invalid transform expression '{expression}': {message}")]
    InvalidExpression { expression: String, message: String },

    /// A transform expression produced an unusable value
    #[error("Transform evaluation failed: {0}")]
    Evaluation(String),

    /// A required object is missing from the model tree
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    /// The single-active-context protocol was violated
    #[error("Context protocol violation: {0}")]
    ContextProtocol(String),

    /// The batch run reported a failure
    #[error("Task batch failed with code {0}")]
    TaskFailed(i64),

    /// The platform bridge answered with an error or malformed data
    #[error("Bridge error: {0}")]
    Bridge(String),

    /// Invalid process-level configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML (de)serialization error
    #[error("Serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias using CampaignError
pub type CampaignResult<T> = Result<T, CampaignError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CampaignError::UnknownChannel("doesNotExist".to_string());
        assert_eq!(format!("{}", err), "Channel doesNotExist not found");

        let err = CampaignError::ChannelKindMismatch {
            name: "mtb_s_1".to_string(),
            expected: "signal",
        };
        assert_eq!(format!("{}", err), "Channel mtb_s_1 is not a signal channel");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: CampaignError = io_err.into();
        assert!(matches!(err, CampaignError::Io(_)));
    }
}
