//! # Payload value tree
//!
//! Request and result values are modelled as a sum type instead of raw JSON
//! so that binary content can sit anywhere inside a request until it has been
//! uploaded. Every non-blob value converts losslessly to and from
//! `serde_json::Value`; objects keep insertion order.
//!
//! Binary content is carried by [`BlobHandle`]. Each handle gets a
//! process-unique [`BlobIdentity`] at construction time and clones share it,
//! which is how the blob codec recognises the same file referenced from two
//! places without relying on pointer equality.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use indexmap::IndexMap;
use serde_json::{Map, Number, Value};

use crate::errors::{ClientError, ClientResult};

/// Ordered key/value storage used by [`Payload::Object`].
pub type PayloadMap = IndexMap<String, Payload>;

/// Identity of a binary handle. Clones of a handle share it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobIdentity(u64);

static BLOB_IDENTITY: AtomicU64 = AtomicU64::new(1);

fn next_blob_identity() -> BlobIdentity {
    BlobIdentity(BLOB_IDENTITY.fetch_add(1, Ordering::Relaxed))
}

impl fmt::Display for BlobIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blob#{}", self.0)
    }
}

/// Opaque handle to raw binary content destined for upload.
#[derive(Clone)]
pub struct BlobHandle {
    identity: BlobIdentity,
    bytes: Bytes,
    filename: Option<String>,
    mime_type: Option<String>,
}

impl BlobHandle {
    /// Wrap raw bytes in a fresh handle with its own identity.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            identity: next_blob_identity(),
            bytes: bytes.into(),
            filename: None,
            mime_type: None,
        }
    }

    /// Attach the file name sent with the multipart upload.
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Attach a MIME type.
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn identity(&self) -> BlobIdentity {
        self.identity
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    /// MIME type, falling back to `application/octet-stream`.
    pub fn content_type(&self) -> &str {
        self.mime_type
            .as_deref()
            .unwrap_or("application/octet-stream")
    }

    /// True when both handles refer to the same blob instance.
    pub fn same_blob(&self, other: &BlobHandle) -> bool {
        self.identity == other.identity
    }
}

impl PartialEq for BlobHandle {
    fn eq(&self, other: &Self) -> bool {
        self.same_blob(other)
    }
}

impl fmt::Debug for BlobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobHandle")
            .field("identity", &self.identity)
            .field("len", &self.bytes.len())
            .field("filename", &self.filename)
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

/// One step of a path into a [`Payload`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathKey {
    Index(usize),
    Key(String),
}

impl PathKey {
    /// Parse a JSON path step: non-negative integers index arrays, strings key objects.
    pub fn from_json(value: &Value) -> ClientResult<Self> {
        match value {
            Value::Number(n) => n
                .as_u64()
                .map(|i| PathKey::Index(i as usize))
                .ok_or_else(|| ClientError::protocol(format!("invalid path index: {}", n))),
            Value::String(s) => Ok(PathKey::Key(s.clone())),
            other => Err(ClientError::protocol(format!(
                "invalid path step: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathKey::Index(i) => write!(f, "[{}]", i),
            PathKey::Key(k) => write!(f, ".{}", k),
        }
    }
}

impl From<usize> for PathKey {
    fn from(index: usize) -> Self {
        PathKey::Index(index)
    }
}

impl From<&str> for PathKey {
    fn from(key: &str) -> Self {
        PathKey::Key(key.to_string())
    }
}

impl From<String> for PathKey {
    fn from(key: String) -> Self {
        PathKey::Key(key)
    }
}

/// Render a path as `$[0].image` for error messages and logs.
pub fn display_path(path: &[PathKey]) -> String {
    let mut out = String::from("$");
    for step in path {
        out.push_str(&step.to_string());
    }
    out
}

/// Request/result value with first-class binary leaves.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Payload {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<Payload>),
    Object(PayloadMap),
    Blob(BlobHandle),
}

impl Payload {
    /// Build an object from key/value pairs, keeping their order.
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Payload)>,
    {
        Payload::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Payload::Null)
    }

    pub fn is_blob(&self) -> bool {
        matches!(self, Payload::Blob(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Payload::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Payload::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Payload::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Payload::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Payload>> {
        match self {
            Payload::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&PayloadMap> {
        match self {
            Payload::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&BlobHandle> {
        match self {
            Payload::Blob(handle) => Some(handle),
            _ => None,
        }
    }

    /// Short variant name for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Payload::Null => "null",
            Payload::Bool(_) => "bool",
            Payload::Number(_) => "number",
            Payload::String(_) => "string",
            Payload::Array(_) => "array",
            Payload::Object(_) => "object",
            Payload::Blob(_) => "blob",
        }
    }

    /// Child addressed by a single path step.
    pub fn get(&self, key: &PathKey) -> Option<&Payload> {
        match (self, key) {
            (Payload::Array(items), PathKey::Index(i)) => items.get(*i),
            (Payload::Object(map), PathKey::Key(k)) => map.get(k),
            _ => None,
        }
    }

    /// Mutable child addressed by a single path step.
    pub fn get_mut(&mut self, key: &PathKey) -> Option<&mut Payload> {
        match (self, key) {
            (Payload::Array(items), PathKey::Index(i)) => items.get_mut(*i),
            (Payload::Object(map), PathKey::Key(k)) => map.get_mut(k),
            _ => None,
        }
    }

    /// Value at `path`, or `None` if any step does not resolve.
    pub fn get_path(&self, path: &[PathKey]) -> Option<&Payload> {
        path.iter().try_fold(self, |current, key| current.get(key))
    }

    /// Mutable value at `path`, or `None` if any step does not resolve.
    pub fn get_path_mut(&mut self, path: &[PathKey]) -> Option<&mut Payload> {
        path.iter().try_fold(self, |current, key| current.get_mut(key))
    }

    /// Overwrite the value at an existing `path`.
    pub fn set_path(&mut self, path: &[PathKey], value: Payload) -> ClientResult<()> {
        let slot = self
            .get_path_mut(path)
            .ok_or_else(|| ClientError::InvalidPath(display_path(path)))?;
        *slot = value;
        Ok(())
    }

    /// True if any blob handle remains anywhere in the tree.
    pub fn contains_blob(&self) -> bool {
        match self {
            Payload::Blob(_) => true,
            Payload::Array(items) => items.iter().any(Payload::contains_blob),
            Payload::Object(map) => map.values().any(Payload::contains_blob),
            _ => false,
        }
    }

    /// Convert to JSON. Fails if a blob was never uploaded or inlined.
    pub fn to_json(&self) -> ClientResult<Value> {
        self.to_json_at(&mut Vec::new())
    }

    fn to_json_at(&self, path: &mut Vec<PathKey>) -> ClientResult<Value> {
        Ok(match self {
            Payload::Null => Value::Null,
            Payload::Bool(b) => Value::Bool(*b),
            Payload::Number(n) => Value::Number(n.clone()),
            Payload::String(s) => Value::String(s.clone()),
            Payload::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    path.push(PathKey::Index(i));
                    out.push(item.to_json_at(path)?);
                    path.pop();
                }
                Value::Array(out)
            }
            Payload::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (k, v) in map {
                    path.push(PathKey::Key(k.clone()));
                    out.insert(k.clone(), v.to_json_at(path)?);
                    path.pop();
                }
                Value::Object(out)
            }
            Payload::Blob(_) => {
                return Err(ClientError::UnresolvedBlob {
                    path: display_path(path),
                })
            }
        })
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Payload::Null,
            Value::Bool(b) => Payload::Bool(b),
            Value::Number(n) => Payload::Number(n),
            Value::String(s) => Payload::String(s),
            Value::Array(items) => Payload::Array(items.into_iter().map(Payload::from).collect()),
            Value::Object(map) => {
                Payload::Object(map.into_iter().map(|(k, v)| (k, Payload::from(v))).collect())
            }
        }
    }
}

impl From<BlobHandle> for Payload {
    fn from(handle: BlobHandle) -> Self {
        Payload::Blob(handle)
    }
}

impl From<bool> for Payload {
    fn from(b: bool) -> Self {
        Payload::Bool(b)
    }
}

impl From<i64> for Payload {
    fn from(n: i64) -> Self {
        Payload::Number(n.into())
    }
}

impl From<u64> for Payload {
    fn from(n: u64) -> Self {
        Payload::Number(n.into())
    }
}

impl From<f64> for Payload {
    fn from(n: f64) -> Self {
        Number::from_f64(n).map_or(Payload::Null, Payload::Number)
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::String(s.to_string())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::String(s)
    }
}

impl From<Vec<Payload>> for Payload {
    fn from(items: Vec<Payload>) -> Self {
        Payload::Array(items)
    }
}

impl From<PayloadMap> for Payload {
    fn from(map: PayloadMap) -> Self {
        Payload::Object(map)
    }
}
