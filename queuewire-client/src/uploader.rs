use std::sync::Arc;

use async_trait::async_trait;
use queuewire_blob::{BlobError, BlobResult, BlobUploader};
use queuewire_core::BlobHandle;
use tracing::instrument;

use crate::transport::{Headers, MultipartFile, Transport, TransportRequest};

/// [`BlobUploader`] posting multipart `files` to `{root}/upload`.
pub struct TransportUploader {
    transport: Arc<dyn Transport>,
    url: String,
    headers: Headers,
}

impl TransportUploader {
    pub fn new(transport: Arc<dyn Transport>, root: &str, headers: Headers) -> Self {
        Self {
            transport,
            url: format!("{}/upload", root),
            headers,
        }
    }
}

#[async_trait]
impl BlobUploader for TransportUploader {
    #[instrument(skip_all, fields(url = %self.url, files = batch.len()))]
    async fn upload(&self, batch: &[BlobHandle]) -> BlobResult<Vec<String>> {
        let files = batch.iter().map(MultipartFile::from_handle).collect();
        let request = TransportRequest::post_multipart(self.url.clone(), files).with_headers(&self.headers);

        let response = self
            .transport
            .request(request)
            .await
            .map_err(BlobError::backend)?;

        if !response.is_success() {
            return Err(BlobError::upload_failed(format!(
                "status {}: {}",
                response.status,
                response.error_text().unwrap_or_else(|| response.body.to_string())
            )));
        }

        let names = response
            .body
            .as_array()
            .ok_or_else(|| BlobError::upload_failed(format!("unexpected upload response: {}", response.body)))?;
        names
            .iter()
            .map(|name| {
                name.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| BlobError::invalid(format!("file name is not a string: {}", name)))
            })
            .collect()
    }
}
