//! Transport seam.
//!
//! Everything the client sends or receives goes through a [`Transport`]:
//! request/response exchanges and one long-lived push stream of text frames.
//! [`HttpTransport`] is the default; tests script their own.

pub mod http;

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_core::Stream;
use queuewire_core::{BlobHandle, ClientResult};
use serde_json::Value;

pub use http::HttpTransport;

/// Header name/value pairs, in send order.
pub type Headers = Vec<(String, String)>;

/// Text frames of a push stream; an `Err` item ends the stream.
pub type FrameStream = Pin<Box<dyn Stream<Item = ClientResult<String>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => f.write_str("GET"),
            Method::Post => f.write_str("POST"),
        }
    }
}

/// One file part of a multipart body.
#[derive(Debug, Clone)]
pub struct MultipartFile {
    pub field: String,
    pub filename: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl MultipartFile {
    /// A `files` part for an upload request.
    pub fn from_handle(handle: &BlobHandle) -> Self {
        Self {
            field: "files".to_string(),
            filename: handle
                .filename()
                .map(str::to_string)
                .unwrap_or_else(|| format!("{}.bin", handle.identity()).replace('#', "-")),
            content_type: handle.content_type().to_string(),
            bytes: handle.bytes().clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    Multipart(Vec<MultipartFile>),
}

#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: Headers,
    pub body: RequestBody,
}

impl TransportRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn post_json(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: Vec::new(),
            body: RequestBody::Json(body),
        }
    }

    pub fn post_multipart(url: impl Into<String>, files: Vec<MultipartFile>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: Vec::new(),
            body: RequestBody::Multipart(files),
        }
    }

    pub fn with_headers(mut self, headers: &[(String, String)]) -> Self {
        self.headers.extend(headers.iter().cloned());
        self
    }
}

/// Status code and parsed body. Non-JSON bodies arrive as a JSON string.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Value,
}

impl TransportResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Server-supplied error text, if any.
    pub fn error_text(&self) -> Option<String> {
        ["error", "detail", "message"]
            .iter()
            .find_map(|key| self.body.get(*key).and_then(Value::as_str))
            .map(str::to_string)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// One request/response exchange. Only connection failures are errors;
    /// any HTTP status is returned as a response.
    async fn request(&self, request: TransportRequest) -> ClientResult<TransportResponse>;

    /// Open a server-sent event stream and yield each event's data.
    async fn open_stream(&self, url: &str, headers: &[(String, String)]) -> ClientResult<FrameStream>;
}
