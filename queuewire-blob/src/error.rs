use queuewire_core::ClientError;
use thiserror::Error;

/// Result type for blob operations
pub type BlobResult<T> = Result<T, BlobError>;

/// Errors that can occur while extracting, uploading or reinserting blobs
#[derive(Error, Debug)]
pub enum BlobError {
    #[error("Invalid request: {message}")]
    Invalid { message: String },

    #[error("Upload failed: {reason}")]
    UploadFailed { reason: String },

    #[error("Upload returned {got} names for {expected} files")]
    CountMismatch { expected: usize, got: usize },

    #[error("Path no longer resolves: {path}")]
    InvalidPath { path: String },

    #[error("Uploader error: {source}")]
    Backend {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl BlobError {
    /// Wrap a failure of the underlying uploader.
    pub fn backend<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            source: Box::new(error),
        }
    }

    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    pub fn upload_failed<S: Into<String>>(reason: S) -> Self {
        Self::UploadFailed {
            reason: reason.into(),
        }
    }
}

impl From<BlobError> for ClientError {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::InvalidPath { path } => ClientError::InvalidPath(path),
            BlobError::UploadFailed { reason } => ClientError::UploadFailed { reason },
            other => ClientError::upload_failed(other.to_string()),
        }
    }
}
