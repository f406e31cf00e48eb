use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use queuewire_core::BlobHandle;
use tracing::{debug, instrument};

use crate::config::UploadRules;
use crate::error::{BlobError, BlobResult};

/// Sends binary content to the server and returns the names it assigned.
#[async_trait]
pub trait BlobUploader: Send + Sync {
    /// Upload one batch; the result holds one server file name per handle, in order.
    async fn upload(&self, batch: &[BlobHandle]) -> BlobResult<Vec<String>>;
}

/// Upload every handle, `rules.chunk_size` per request with at most
/// `rules.max_concurrent` requests in flight. Names come back in input order.
/// The first failure aborts the whole set.
#[instrument(skip_all, fields(files = handles.len()))]
pub async fn upload_all<U>(
    uploader: &U,
    handles: &[BlobHandle],
    rules: &UploadRules,
) -> BlobResult<Vec<String>>
where
    U: BlobUploader + ?Sized,
{
    if handles.is_empty() {
        return Ok(Vec::new());
    }

    let chunk_size = rules.chunk_size.max(1);
    let batches: Vec<Vec<String>> = stream::iter(handles.chunks(chunk_size))
        .map(|batch| async move {
            let names = uploader.upload(batch).await?;
            if names.len() != batch.len() {
                return Err(BlobError::CountMismatch {
                    expected: batch.len(),
                    got: names.len(),
                });
            }
            debug!(files = batch.len(), "uploaded batch");
            Ok(names)
        })
        .buffered(rules.max_concurrent.max(1))
        .try_collect()
        .await?;

    Ok(batches.into_iter().flatten().collect())
}
