//! # Errors
//!
//! One error enum for the whole client. Core goals:
//! - argument and configuration failures are detectable before any I/O
//! - each variant maps onto a stable [`ErrorKind`] name for logs and callers
//! - the enum is `Clone` so a single failure can be fanned out to several
//!   listeners of a shared stream

use thiserror::Error;

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Stable classification of [`ClientError`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    UnknownArgument,
    UploadFailed,
    ConfigUnresolved,
    ProtocolError,
    TransportClosed,
    EndpointNotFound,
    SubmitFailed,
    JobFailed,
    InvalidPath,
    UnresolvedBlob,
    Transport,
    Serialization,
}

impl ErrorKind {
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "InvalidArgument",
            ErrorKind::UnknownArgument => "UnknownArgument",
            ErrorKind::UploadFailed => "UploadFailed",
            ErrorKind::ConfigUnresolved => "ConfigUnresolved",
            ErrorKind::ProtocolError => "ProtocolError",
            ErrorKind::TransportClosed => "TransportClosed",
            ErrorKind::EndpointNotFound => "EndpointNotFound",
            ErrorKind::SubmitFailed => "SubmitFailed",
            ErrorKind::JobFailed => "JobFailed",
            ErrorKind::InvalidPath => "InvalidPath",
            ErrorKind::UnresolvedBlob => "UnresolvedBlob",
            ErrorKind::Transport => "Transport",
            ErrorKind::Serialization => "Serialization",
        }
    }

    /// Errors raised before the request leaves the process.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            ErrorKind::InvalidArgument
                | ErrorKind::UnknownArgument
                | ErrorKind::ConfigUnresolved
                | ErrorKind::EndpointNotFound
                | ErrorKind::InvalidPath
                | ErrorKind::UnresolvedBlob
        )
    }
}

/// Errors surfaced by the job client
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    #[error("No value provided for required argument: {0}")]
    InvalidArgument(String),

    #[error("Parameter `{0}` is not a valid keyword argument")]
    UnknownArgument(String),

    #[error("Upload failed: {reason}")]
    UploadFailed { reason: String },

    #[error("Could not resolve app config: {0}")]
    ConfigUnresolved(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Stream closed: {0}")]
    TransportClosed(String),

    #[error("There is no endpoint matching {0}")]
    EndpointNotFound(String),

    #[error("Job submission failed with status {status}: {message}")]
    SubmitFailed { status: u16, message: String },

    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Path does not resolve: {0}")]
    InvalidPath(String),

    #[error("Binary value at {path} was neither uploaded nor inlined")]
    UnresolvedBlob { path: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::UnknownArgument(_) => ErrorKind::UnknownArgument,
            Self::UploadFailed { .. } => ErrorKind::UploadFailed,
            Self::ConfigUnresolved(_) => ErrorKind::ConfigUnresolved,
            Self::ProtocolError(_) => ErrorKind::ProtocolError,
            Self::TransportClosed(_) => ErrorKind::TransportClosed,
            Self::EndpointNotFound(_) => ErrorKind::EndpointNotFound,
            Self::SubmitFailed { .. } => ErrorKind::SubmitFailed,
            Self::JobFailed(_) => ErrorKind::JobFailed,
            Self::InvalidPath(_) => ErrorKind::InvalidPath,
            Self::UnresolvedBlob { .. } => ErrorKind::UnresolvedBlob,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Serialization(_) => ErrorKind::Serialization,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    // ---- Constructors ----

    pub fn upload_failed(reason: impl Into<String>) -> Self {
        Self::UploadFailed {
            reason: reason.into(),
        }
    }

    pub fn config_unresolved(reason: impl Into<String>) -> Self {
        Self::ConfigUnresolved(reason.into())
    }

    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::ProtocolError(reason.into())
    }

    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport(reason.into())
    }

    pub fn transport_closed(reason: impl Into<String>) -> Self {
        Self::TransportClosed(reason.into())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
