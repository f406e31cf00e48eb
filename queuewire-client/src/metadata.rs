//! App metadata: where an app lives, how it speaks, what it exposes.
//!
//! An app reference is one of:
//! - `owner/space`, looked up through the hub's `/api/spaces/{ref}/host`
//! - a `*.hf.space` URL, whose subdomain doubles as the space id
//! - any other URL; a missing scheme means `https` (`http` for localhost)

use std::sync::Arc;

use async_trait::async_trait;
use queuewire_core::{ApiInfo, ClientError, ClientResult, DependencySpec};
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

use crate::auth::Credentials;
use crate::protocol::ProtocolVersion;
use crate::transport::{Transport, TransportRequest};

pub const DEFAULT_HUB_URL: &str = "https://huggingface.co";

const SPACE_DOMAIN: &str = ".hf.space";

/// Connection parameters for one app
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConnection {
    /// `{http_protocol}//{host}`, no trailing slash
    pub root: String,
    /// Host, port and path prefix
    pub host: String,
    /// `ws` or `wss`
    pub ws_protocol: String,
    /// `http:` or `https:`
    pub http_protocol: String,
    pub space_id: Option<String>,
}

impl AppConnection {
    /// Derive connection parameters from a URL-like reference.
    pub fn from_url(reference: &str) -> ClientResult<Self> {
        let reference = reference.trim().trim_end_matches('/');
        let with_scheme = if reference.contains("://") {
            reference.to_string()
        } else if reference.starts_with("localhost") || reference.starts_with("127.0.0.1") {
            format!("http://{}", reference)
        } else {
            format!("https://{}", reference)
        };

        let url = Url::parse(&with_scheme)
            .map_err(|e| ClientError::config_unresolved(format!("invalid app url `{}`: {}", reference, e)))?;
        let hostname = url
            .host_str()
            .ok_or_else(|| ClientError::config_unresolved(format!("app url `{}` has no host", reference)))?;

        let (http_protocol, ws_protocol) = match url.scheme() {
            "https" | "wss" => ("https:", "wss"),
            "http" | "ws" => ("http:", "ws"),
            other => {
                return Err(ClientError::config_unresolved(format!(
                    "unsupported scheme `{}`",
                    other
                )))
            }
        };

        let mut host = hostname.to_string();
        if let Some(port) = url.port() {
            host.push_str(&format!(":{}", port));
        }
        host.push_str(url.path().trim_end_matches('/'));

        let space_id = hostname
            .strip_suffix(SPACE_DOMAIN)
            .map(str::to_string);

        Ok(Self {
            root: format!("{}//{}", http_protocol, host),
            host,
            ws_protocol: ws_protocol.to_string(),
            http_protocol: http_protocol.to_string(),
            space_id,
        })
    }
}

/// The parts of an app's `/config` the client needs
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Base URL every endpoint is relative to
    pub root: String,
    pub protocol: ProtocolVersion,
    pub dependencies: Vec<DependencySpec>,
    /// App-wide queue switch, overridden per dependency
    pub enable_queue: bool,
    pub version: Option<String>,
    /// Public URL of an app served behind a proxy
    pub root_url: Option<String>,
}

impl AppConfig {
    /// Parse a `/config` document served from `connection`.
    ///
    /// A missing `protocol` is read as `sse_v1`.
    pub fn parse(body: &Value, connection: &AppConnection) -> ClientResult<Self> {
        let object = body
            .as_object()
            .ok_or_else(|| ClientError::config_unresolved("config is not an object"))?;

        let root = match object.get("root").and_then(Value::as_str) {
            Some(root) if root.starts_with("http://") || root.starts_with("https://") => {
                root.trim_end_matches('/').to_string()
            }
            Some(path) if !path.trim_matches('/').is_empty() => {
                format!("{}/{}", connection.root, path.trim_matches('/'))
            }
            _ => connection.root.clone(),
        };

        let protocol = object
            .get("protocol")
            .and_then(Value::as_str)
            .map(ProtocolVersion::parse)
            .unwrap_or(ProtocolVersion::SseV1);

        let dependencies = match object.get("dependencies") {
            Some(deps) => serde_json::from_value(deps.clone())
                .map_err(|e| ClientError::config_unresolved(format!("invalid dependencies: {}", e)))?,
            None => Vec::new(),
        };

        Ok(Self {
            root,
            protocol,
            dependencies,
            enable_queue: object
                .get("enable_queue")
                .and_then(Value::as_bool)
                .unwrap_or(true),
            version: object
                .get("version")
                .and_then(Value::as_str)
                .map(str::to_string),
            root_url: object
                .get("root_url")
                .and_then(Value::as_str)
                .filter(|url| !url.is_empty())
                .map(str::to_string),
        })
    }

    /// Calls to `fn_index` are answered directly by `POST /run/...`.
    pub fn skips_queue(&self, fn_index: usize) -> bool {
        !self
            .dependencies
            .get(fn_index)
            .and_then(|dep| dep.queue)
            .unwrap_or(self.enable_queue)
    }
}

#[async_trait]
pub trait MetadataResolver: Send + Sync {
    /// Turn an app reference into connection parameters.
    async fn resolve(&self, app_reference: &str) -> ClientResult<AppConnection>;

    /// Load the app's config.
    async fn fetch_config(
        &self,
        connection: &AppConnection,
        credentials: &Credentials,
    ) -> ClientResult<AppConfig>;

    /// Load the endpoint map.
    async fn fetch_api_info(&self, config: &AppConfig, credentials: &Credentials) -> ClientResult<ApiInfo>;
}

/// [`MetadataResolver`] over plain GET requests.
#[derive(Clone)]
pub struct HttpMetadataResolver {
    transport: Arc<dyn Transport>,
    hub_url: String,
}

impl HttpMetadataResolver {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            hub_url: DEFAULT_HUB_URL.to_string(),
        }
    }

    pub fn with_hub_url(mut self, hub_url: impl Into<String>) -> Self {
        self.hub_url = hub_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn get_json(&self, url: String, credentials: &Credentials) -> ClientResult<Value> {
        let response = self
            .transport
            .request(TransportRequest::get(url.clone()).with_headers(&credentials.headers()))
            .await?;
        if response.status != 200 {
            return Err(ClientError::config_unresolved(format!(
                "GET {} returned {}",
                url, response.status
            )));
        }
        Ok(response.body)
    }
}

fn is_space_name(reference: &str) -> bool {
    !reference.contains("://")
        && !reference.contains('.')
        && reference.split('/').count() == 2
        && reference.split('/').all(|part| !part.is_empty())
}

#[async_trait]
impl MetadataResolver for HttpMetadataResolver {
    #[instrument(skip(self))]
    async fn resolve(&self, app_reference: &str) -> ClientResult<AppConnection> {
        let reference = app_reference.trim().trim_end_matches('/');
        if !is_space_name(reference) {
            return AppConnection::from_url(reference);
        }

        let body = self
            .get_json(
                format!("{}/api/spaces/{}/host", self.hub_url, reference),
                &Credentials::default(),
            )
            .await?;
        let host = body
            .get("host")
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::config_unresolved(format!("no host for space `{}`", reference)))?;
        debug!(space = reference, host, "resolved space host");

        let mut connection = AppConnection::from_url(host)?;
        connection.space_id = Some(reference.to_string());
        Ok(connection)
    }

    #[instrument(skip_all, fields(root = %connection.root))]
    async fn fetch_config(
        &self,
        connection: &AppConnection,
        credentials: &Credentials,
    ) -> ClientResult<AppConfig> {
        let body = self
            .get_json(format!("{}/config", connection.root), credentials)
            .await?;
        AppConfig::parse(&body, connection)
    }

    #[instrument(skip_all, fields(root = %config.root))]
    async fn fetch_api_info(&self, config: &AppConfig, credentials: &Credentials) -> ClientResult<ApiInfo> {
        let body = self
            .get_json(format!("{}/info", config.root), credentials)
            .await?;
        ApiInfo::parse(&body, &config.dependencies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn urls_map_to_protocols() {
        let c = AppConnection::from_url("https://owner-app.hf.space/").unwrap();
        assert_eq!(c.root, "https://owner-app.hf.space");
        assert_eq!(c.ws_protocol, "wss");
        assert_eq!(c.space_id.as_deref(), Some("owner-app"));

        let c = AppConnection::from_url("localhost:7860").unwrap();
        assert_eq!(c.root, "http://localhost:7860");
        assert_eq!(c.http_protocol, "http:");
        assert_eq!(c.ws_protocol, "ws");
        assert!(c.space_id.is_none());

        let c = AppConnection::from_url("example.com/apps/demo").unwrap();
        assert_eq!(c.root, "https://example.com/apps/demo");
        assert_eq!(c.host, "example.com/apps/demo");
    }

    #[test]
    fn space_names() {
        assert!(is_space_name("owner/space"));
        assert!(!is_space_name("https://owner/space"));
        assert!(!is_space_name("example.com/app"));
        assert!(!is_space_name("owner/"));
        assert!(!is_space_name("a/b/c"));
    }

    #[test]
    fn config_parsing() {
        let connection = AppConnection::from_url("http://localhost:7860").unwrap();
        let config = AppConfig::parse(
            &json!({
                "protocol": "sse_v3",
                "version": "4.36.0",
                "root": "/proxy",
                "dependencies": [{"api_name": "predict", "types": {"generator": true}}]
            }),
            &connection,
        )
        .unwrap();
        assert_eq!(config.root, "http://localhost:7860/proxy");
        assert_eq!(config.protocol, ProtocolVersion::SseV3);
        assert!(config.enable_queue);
        assert_eq!(config.version.as_deref(), Some("4.36.0"));
        assert!(config.root_url.is_none());
        assert_eq!(config.dependencies[0].api_name(), Some("predict"));

        let config = AppConfig::parse(&json!({}), &connection).unwrap();
        assert_eq!(config.root, "http://localhost:7860");
        assert_eq!(config.protocol, ProtocolVersion::SseV1);

        assert!(AppConfig::parse(&json!([1]), &connection).is_err());
    }

    #[test]
    fn queue_switch_per_dependency() {
        let connection = AppConnection::from_url("http://localhost:7860").unwrap();
        let config = AppConfig::parse(
            &json!({
                "enable_queue": false,
                "root_url": "https://proxy.example/app/",
                "dependencies": [{"api_name": "a"}, {"api_name": "b", "queue": true}, {"api_name": "c", "queue": null}]
            }),
            &connection,
        )
        .unwrap();
        assert!(config.skips_queue(0));
        assert!(!config.skips_queue(1));
        assert!(config.skips_queue(2));
        assert!(config.skips_queue(9));
        assert_eq!(config.root_url.as_deref(), Some("https://proxy.example/app/"));

        let queued = AppConfig::parse(&json!({"dependencies": [{"api_name": "a", "queue": false}]}), &connection).unwrap();
        assert!(queued.skips_queue(0));
        assert!(!queued.skips_queue(1));
    }
}
