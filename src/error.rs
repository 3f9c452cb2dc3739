//! Custom error types for the application.
//!
//! Each concern gets its own `thiserror` enum so callers can decide how to
//! present a failure without string matching:
//!
//! - **`LinkError`**: everything that can go wrong between the process and the
//!   gate microcontroller (discovery, open, liveness probe, write). None of
//!   these are fatal; the next triggered operation retries from scratch.
//! - **`NotifyError`**: failures posting a result to the inventory service.
//!   Reported as warnings, never retried.
//! - **`ClassifierError`**: the external classifier failed or timed out. No
//!   hardware action and no notification follow.
//! - **`SortgateError`**: the application-level wrapper used by configuration
//!   loading, logging setup and the CLI.
//!
//! By using `#[from]`, `SortgateError` can be created from the concern-level
//! errors with the `?` operator.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, SortgateError>;

/// Serial link failures seen by the connection manager and dispatcher.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// A connection attempt was skipped because the previous one started
    /// less than the minimum reconnect interval ago.
    #[error("Reconnect suppressed: last attempt was {elapsed:?} ago (minimum {interval:?})")]
    RateLimited {
        /// Time since the previous attempt started.
        elapsed: Duration,
        /// Configured minimum interval.
        interval: Duration,
    },

    /// Every candidate path failed to open or probe.
    #[error("No gate controller found ({candidates} candidate port(s) tried)")]
    NoDeviceFound {
        /// Number of paths attempted, including the remembered fast path.
        candidates: usize,
    },

    /// A single path could not be opened.
    #[error("Failed to open serial port '{path}': {reason}")]
    Open {
        /// Device path.
        path: String,
        /// Underlying error text.
        reason: String,
    },

    /// The port opened but the null-byte liveness write failed.
    #[error("Liveness probe failed on '{path}': {reason}")]
    Probe {
        /// Device path.
        path: String,
        /// Underlying error text.
        reason: String,
    },

    /// A command byte could not be written after all attempts.
    #[error("Command write failed after {attempts} attempt(s): {reason}")]
    WriteFailed {
        /// Attempts made.
        attempts: u32,
        /// Error text from the final attempt.
        reason: String,
    },

    /// One write or flush on the port returned an I/O error.
    #[error("Serial I/O error: {0}")]
    Io(String),

    /// A write did not complete within the configured write timeout.
    #[error("Serial write timed out after {0:?}")]
    WriteTimeout(Duration),

    /// No device handle is open.
    #[error("Serial port not connected")]
    NotConnected,

    /// Serial support was compiled out.
    #[error("Serial support not enabled. Rebuild with --features serial or use --mock")]
    SerialFeatureDisabled,
}

impl LinkError {
    /// Whether the error means "device absent" rather than "device misbehaving".
    pub fn is_absent(&self) -> bool {
        matches!(
            self,
            LinkError::NoDeviceFound { .. } | LinkError::NotConnected | LinkError::RateLimited { .. }
        )
    }
}

/// Inventory notification failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// No `notification.base_url` was configured; the post was skipped.
    #[error("Inventory base URL not configured")]
    NotConfigured,

    /// The configured base URL cannot carry an item path.
    #[error("Invalid inventory URL: {0}")]
    InvalidUrl(String),

    /// Transport-level failure (DNS, refused, timeout).
    #[error("Network error posting to inventory: {0}")]
    Network(String),

    /// The service answered with a non-2xx status.
    #[error("Inventory service returned {status} for {url}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Endpoint that was posted to.
        url: String,
    },
}

/// The external classifier failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Classifier error: {0}")]
pub struct ClassifierError(pub String);

/// Application-level error.
#[derive(Error, Debug)]
pub enum SortgateError {
    /// The configuration could not be read or deserialized.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// The configuration loaded but a value is out of range.
    #[error("Configuration validation error: {0}")]
    Validation(String),

    /// The tracing subscriber could not be installed.
    #[error("Logging setup error: {0}")]
    Logging(String),

    /// Filesystem or terminal I/O.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial link failure.
    #[error(transparent)]
    Link(#[from] LinkError),

    /// Inventory notification failure.
    #[error(transparent)]
    Notify(#[from] NotifyError),

    /// Classifier failure.
    #[error(transparent)]
    Classifier(#[from] ClassifierError),

    /// A category name on the command line did not match any gate.
    #[error("Unknown category '{0}'. Expected one of: Flammable, Cold storage, Corrosive, Other chemicals")]
    UnknownCategory(String),
}

impl From<figment::Error> for SortgateError {
    fn from(value: figment::Error) -> Self {
        SortgateError::Config(Box::new(value))
    }
}
