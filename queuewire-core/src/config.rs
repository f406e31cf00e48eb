//! # Client configuration
//!
//! A minimal string key/value store, layered however the application likes,
//! plus an immutable snapshot with typed getters. Nothing here reads or
//! writes files.
//!
//! ## Setting and reading values
//! ```rust
//! use queuewire_core::ClientConfig;
//! let mut config = ClientConfig::new();
//!
//! config.set("upload.max_concurrent", "8");
//! assert_eq!(config.get("upload.max_concurrent"), Some("8"));
//!
//! let options = queuewire_core::ClientOptions::from_snapshot(&config.snapshot());
//! assert_eq!(options.max_concurrent_uploads, 8);
//! ```
//!
//! ## Environment overrides
//! `ClientConfig::from_env("QUEUEWIRE__")` maps
//! `QUEUEWIRE__UPLOAD__MAX_CONCURRENT=8` to `upload.max_concurrent = "8"`.

use std::collections::HashMap;
use std::time::Duration;

pub const KEY_AUTH_TOKEN: &str = "auth.token";
pub const KEY_UPLOAD_MAX_CONCURRENT: &str = "upload.max_concurrent";
pub const KEY_UPLOAD_CHUNK_SIZE: &str = "upload.chunk_size";
pub const KEY_HTTP_USER_AGENT: &str = "http.user_agent";
pub const KEY_HTTP_CONNECT_TIMEOUT_SECS: &str = "http.connect_timeout_secs";
pub const KEY_OUTPUT_NORMALIZE_FILES: &str = "output.normalize_files";

#[derive(Debug, Default, Clone)]
pub struct ClientConfig {
    values: HashMap<String, String>,
}

impl ClientConfig {
    /// Create an empty config store.
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    /// Load every `PREFIX__A__B=value` environment variable as `a.b = value`.
    pub fn from_env(prefix: &str) -> Self {
        Self::from_vars(prefix, std::env::vars())
    }

    /// Same as [`ClientConfig::from_env`] over an explicit variable list.
    pub fn from_vars<I>(prefix: &str, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut config = Self::new();
        for (key, value) in vars {
            if let Some(stripped) = key.strip_prefix(prefix) {
                let normalized = stripped.to_lowercase().replace("__", ".");
                config.set(normalized, value);
            }
        }
        config
    }

    /// Set a configuration key to a string value.
    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.values.insert(key.into(), value.into());
    }

    /// Get a configuration value by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn snapshot(&self) -> ClientConfigSnapshot {
        ClientConfigSnapshot::new(self.values.clone())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfigSnapshot {
    map: HashMap<String, String>,
}

impl ClientConfigSnapshot {
    pub(crate) fn new(map: HashMap<String, String>) -> Self {
        Self { map }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(|s| s.as_str())
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.map.get(key).cloned()
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(|v| v.parse::<usize>().ok())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.parse::<bool>().ok())
    }

    pub fn get_secs(&self, key: &str) -> Option<Duration> {
        self.get(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
    }
}

/// Typed options consumed by the client.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Bearer token attached to every request
    pub token: Option<String>,
    /// Upper bound on blob uploads in flight for one call
    pub max_concurrent_uploads: usize,
    /// Files per multipart request when uploading a batch
    pub upload_chunk_size: usize,
    /// User-Agent header for the HTTP transport
    pub user_agent: String,
    /// TCP connect timeout for the HTTP transport
    pub connect_timeout: Option<Duration>,
    /// Rewrite returned file references into fetchable URLs
    pub normalize_files: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            token: None,
            max_concurrent_uploads: 4,
            upload_chunk_size: 1000,
            user_agent: concat!("queuewire/", env!("CARGO_PKG_VERSION")).to_string(),
            connect_timeout: None,
            normalize_files: true,
        }
    }
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overlay snapshot values on the defaults.
    pub fn from_snapshot(snapshot: &ClientConfigSnapshot) -> Self {
        let defaults = Self::default();
        Self {
            token: snapshot.get_string(KEY_AUTH_TOKEN).filter(|t| !t.is_empty()),
            max_concurrent_uploads: snapshot
                .get_usize(KEY_UPLOAD_MAX_CONCURRENT)
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_concurrent_uploads),
            upload_chunk_size: snapshot
                .get_usize(KEY_UPLOAD_CHUNK_SIZE)
                .filter(|n| *n > 0)
                .unwrap_or(defaults.upload_chunk_size),
            user_agent: snapshot
                .get_string(KEY_HTTP_USER_AGENT)
                .unwrap_or(defaults.user_agent),
            connect_timeout: snapshot.get_secs(KEY_HTTP_CONNECT_TIMEOUT_SECS),
            normalize_files: snapshot
                .get_bool(KEY_OUTPUT_NORMALIZE_FILES)
                .unwrap_or(defaults.normalize_files),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_max_concurrent_uploads(mut self, n: usize) -> Self {
        self.max_concurrent_uploads = n.max(1);
        self
    }

    pub fn with_upload_chunk_size(mut self, n: usize) -> Self {
        self.upload_chunk_size = n.max(1);
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Hand back output file references exactly as the server sent them.
    pub fn with_raw_files(mut self) -> Self {
        self.normalize_files = false;
        self
    }
}
