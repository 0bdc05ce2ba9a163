//! Error types for the gate, its backend and its configuration.
//!
//! Nothing here is fatal to a host page: reporting errors are logged by the
//! caller and detection errors downgrade to "cannot monitor".

use thiserror::Error;

/// Errors talking to the media backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request to {endpoint} failed: {source}")]
    Request {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} answered with status {status}")]
    Status { endpoint: String, status: u16 },

    #[error("invalid endpoint url: {0}")]
    Url(#[from] url::ParseError),

    /// Used by non-HTTP backends (tests, embedders).
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Errors from the camera sub-mode.
#[derive(Debug, Error)]
pub enum CameraError {
    #[error("camera access denied: {0}")]
    PermissionDenied(String),

    #[error("no camera device available")]
    NoDevice,

    #[error("frame capture failed: {0}")]
    Capture(String),
}

/// Errors loading or validating [`GateConfig`](crate::config::GateConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Errors surfaced by a mounted gate handle.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("gate {0} is no longer mounted")]
    Unmounted(uuid::Uuid),

    #[error("no gate with id {0}")]
    NotFound(uuid::Uuid),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T, E = GateError> = std::result::Result<T, E>;
