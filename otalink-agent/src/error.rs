//! Error types for the update agent.

use thiserror::Error;

/// Errors raised by the update collaborators (release service, platform drivers, stores).
///
/// None of these is fatal to the agent: handlers resolve every failure into a
/// valid update state, optionally with an event for observers.
#[derive(Error, Debug)]
pub enum OtaError {
    /// The release service could not be queried.
    #[error("Release check failed: {0}")]
    CheckFailed(String),

    /// The platform update engine rejected a request or could not be bound.
    #[error("Update engine error: {0}")]
    Engine(String),

    /// A package download could not be started or completed.
    #[error("Download failed: {0}")]
    DownloadFailed(String),

    /// A downloaded package did not pass verification.
    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    /// The recovery installation could not be handed off.
    #[error("Installation failed: {0}")]
    InstallFailed(String),

    /// The reboot primitive failed.
    #[error("Reboot failed: {0}")]
    RebootFailed(String),

    /// A persisted record could not be read or written.
    #[error("Storage error: {0}")]
    Storage(String),

    /// An external command exited unsuccessfully.
    #[error("Command `{command}` failed: {message}")]
    Command { command: String, message: String },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for update operations.
pub type Result<T> = std::result::Result<T, OtaError>;
