//! # queuewire-blob: binary payloads for queued job requests
//!
//! Requests may carry binary content anywhere inside their argument tree. The
//! server only accepts JSON, so each call goes through three steps:
//!
//! 1. [`extract`] records every [`BlobHandle`](queuewire_core::BlobHandle) with
//!    its path. Aliased handles share one upload slot.
//! 2. [`upload_all`] sends the canonical handles through a [`BlobUploader`],
//!    chunked and concurrently, and returns server file names in slot order.
//! 3. [`reinsert`] writes a file reference at every recorded path.
//!
//! Handles under image-like components are withheld from upload and inlined
//! as data URIs by [`inline_withheld`].
//!
//! On the way back, [`resolve_output_files`] turns file references in a call's
//! outputs into URLs served by the app.
//!
//! ```rust
//! use queuewire_blob::prelude::*;
//! use queuewire_core::{BlobHandle, Payload};
//!
//! # fn main() -> BlobResult<()> {
//! let file = BlobHandle::new(b"hello".to_vec()).with_filename("hello.txt");
//! let args = Payload::from(vec![Payload::Blob(file), Payload::from("en")]);
//!
//! let refs = extract(&args, None, &[], true, None);
//! assert_eq!(upload_set(&refs).len(), 1);
//!
//! let ready = reinsert(args, &refs, &["/tmp/abc/hello.txt".to_string()])?;
//! assert!(!ready.contains_blob());
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod output;
pub mod upload;

pub use codec::{
    data_uri, extract, file_reference, inline_withheld, reinsert, upload_set, BlobPayload, BlobRef,
    RefKind,
};
pub use config::UploadRules;
pub use error::{BlobError, BlobResult};
pub use output::{resolve_output_files, FileRoot};
pub use upload::{upload_all, BlobUploader};

pub mod prelude {
    pub use crate::{
        extract, inline_withheld, reinsert, resolve_output_files, upload_all, upload_set, BlobError,
        BlobPayload, BlobRef, BlobResult, BlobUploader, FileRoot, RefKind, UploadRules,
    };
}
