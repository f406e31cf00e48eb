//! queuewire-client: submit jobs to a queue-backed app and follow their progress.
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use queuewire_client::prelude::*;
//!
//! # async fn run() -> ClientResult<()> {
//! let client = Client::connect("owner/space", ClientOptions::default()).await?;
//!
//! let mut job = client.submit("/predict", vec![Payload::from("hello")]).await?;
//! while let Some(event) = job.next().await {
//!     println!("{}: {:?}", event.kind().as_str(), event.status().map(|s| s.stage));
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod metadata;
pub mod protocol;
pub mod stream;
pub mod transport;
pub mod types;
pub mod uploader;

pub use auth::{AuthProvider, Credentials, NoAuth, TokenAuth};
pub use client::{Client, JobStream};
pub use metadata::{AppConfig, AppConnection, HttpMetadataResolver, MetadataResolver};
pub use protocol::{ProtocolHandler, ProtocolVersion};
pub use stream::{StreamConsumer, StreamItem, StreamManager};
pub use transport::{HttpTransport, Transport, TransportRequest, TransportResponse};
pub use types::{ClientEvent, EventId, EventKind, JobStatus, SessionHash, Stage};
pub use uploader::TransportUploader;

pub use queuewire_core::{CallArgs, ClientError, ClientOptions, ClientResult, EndpointRef, ErrorKind, Payload};

pub mod prelude {
    pub use crate::{
        CallArgs, Client, ClientError, ClientEvent, ClientOptions, ClientResult, EndpointRef,
        EventId, JobStatus, JobStream, Payload, Stage,
    };
}

/// Install a `fmt` subscriber filtered by `RUST_LOG` (default `info`).
#[cfg(feature = "tracing-basic")]
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
