//! Error types for background keying operations

use thiserror::Error;

/// Result type alias for background keying operations
pub type Result<T> = std::result::Result<T, BgKeyError>;

/// Error taxonomy for the keying engine and its job protocol
///
/// Cancellation is intentionally absent: a cancelled job finishes with
/// [`crate::processor::JobOutcome::Cancelled`].
#[derive(Error, Debug)]
pub enum BgKeyError {
    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding or encoding errors
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// JSON (de)serialization errors at the protocol boundary
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Zero-size buffers, mismatched data lengths, seeds outside the image
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    /// Invalid settings or engine configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Malformed run-length encoded mask data
    #[error("Invalid mask: {0}")]
    InvalidMask(String),

    /// Request kind the worker does not understand
    #[error("Unsupported request type: {0}")]
    UnsupportedRequest(String),

    /// The execution context could not be started; not retryable
    #[error("Worker initialization failed: {0}")]
    WorkerInit(String),

    /// The worker's channels are closed
    #[error("Worker channel closed")]
    WorkerClosed,

    /// A job was submitted while another one is still running
    #[error("A processing job is already in flight")]
    JobInFlight,
}

impl BgKeyError {
    /// Create a new invalid geometry error
    pub fn invalid_geometry<S: Into<String>>(msg: S) -> Self {
        Self::InvalidGeometry(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new invalid mask error
    pub fn invalid_mask<S: Into<String>>(msg: S) -> Self {
        Self::InvalidMask(msg.into())
    }

    /// Create a new unsupported request error
    pub fn unsupported_request<S: Into<String>>(kind: S) -> Self {
        Self::UnsupportedRequest(kind.into())
    }

    /// Create a new worker initialization error
    pub fn worker_init<S: Into<String>>(msg: S) -> Self {
        Self::WorkerInit(msg.into())
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
    ) -> Self {
        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {})",
            parameter, value, valid_range
        ))
    }

    /// Create geometry error for a point outside the image
    pub fn out_of_bounds(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self::InvalidGeometry(format!(
            "Seed ({}, {}) lies outside the {}x{} image",
            x, y, width, height
        ))
    }

    /// Whether retrying the same call could succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::JobInFlight)
    }
}
