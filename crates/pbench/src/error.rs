//! Error types for schedule generation and run control.

use thiserror::Error;

/// Result type alias using PbenchError.
pub type Result<T> = std::result::Result<T, PbenchError>;

/// Errors raised while preparing or driving a PBench run.
#[derive(Debug, Error)]
pub enum PbenchError {
    // === Scheduling ===
    #[error("Unsupported load profile: {0}")]
    UnsupportedLoadProfile(String),

    #[error("No test cases to schedule")]
    EmptyTestCaseSet,

    // === Request compilation ===
    #[error("All requests must target the same address, found both {first} and {second}")]
    ConflictingTargets { first: String, second: String },

    #[error("Invalid request '{url}': {message}")]
    InvalidRequest { url: String, message: String },

    // === Tooling and process ===
    #[error("PBench tool not found at '{path}', please install it manually")]
    MissingTool { path: String },

    #[error("Load generator process failed: {0}")]
    Process(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid test case data: {0}")]
    InvalidTestCase(String),

    // === Wrapped ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse run file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl PbenchError {
    /// Short machine-friendly name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnsupportedLoadProfile(_) => "unsupported_load_profile",
            Self::EmptyTestCaseSet => "empty_test_case_set",
            Self::ConflictingTargets { .. } => "conflicting_targets",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::MissingTool { .. } => "missing_tool",
            Self::Process(_) => "process",
            Self::InvalidConfig(_) => "invalid_config",
            Self::InvalidTestCase(_) => "invalid_test_case",
            Self::Io(_) => "io",
            Self::Yaml(_) => "yaml",
            Self::Url(_) => "url",
        }
    }
}
