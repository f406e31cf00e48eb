use queuewire_core::ClientOptions;

/// Rules for sending extracted blobs to the server
#[derive(Debug, Clone)]
pub struct UploadRules {
    /// Upload requests allowed in flight at once
    pub max_concurrent: usize,

    /// Files per multipart request
    pub chunk_size: usize,
}

impl Default for UploadRules {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            chunk_size: 1000,
        }
    }
}

impl UploadRules {
    /// Create new upload rules
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the concurrency bound (at least one)
    pub fn with_max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = n.max(1);
        self
    }

    /// Set files per request (at least one)
    pub fn with_chunk_size(mut self, n: usize) -> Self {
        self.chunk_size = n.max(1);
        self
    }
}

impl From<&ClientOptions> for UploadRules {
    fn from(options: &ClientOptions) -> Self {
        Self::new()
            .with_max_concurrent(options.max_concurrent_uploads)
            .with_chunk_size(options.upload_chunk_size)
    }
}
