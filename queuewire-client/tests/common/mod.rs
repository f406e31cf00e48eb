#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use queuewire_client::transport::{FrameStream, RequestBody, TransportRequest, TransportResponse};
use queuewire_client::{Client, ClientEvent, ClientOptions, HttpMetadataResolver, JobStream, NoAuth, Transport};
use queuewire_core::ClientResult;
use serde_json::{json, Value};

pub const ROOT: &str = "http://app.test";

/// One scripted push connection.
#[derive(Debug, Clone, Default)]
pub struct StreamScript {
    pub frames: Vec<Value>,
    /// End the stream after the frames instead of idling.
    pub hang_up: bool,
}

impl StreamScript {
    pub fn frames(frames: Vec<Value>) -> Self {
        Self {
            frames,
            hang_up: false,
        }
    }

    pub fn then_hang_up(mut self) -> Self {
        self.hang_up = true;
        self
    }
}

/// Transport answering by URL suffix and serving scripted streams.
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<&'static str, VecDeque<TransportResponse>>>,
    streams: Mutex<VecDeque<StreamScript>>,
    requests: Mutex<Vec<TransportRequest>>,
    opened: Mutex<Vec<String>>,
}

const ROUTES: [&str; 6] = ["/config", "/info", "/upload", "/queue/join", "/reset", "/run/ping"];

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Self::with_config(config())
    }

    /// Serve `config` from `/config` instead of the default app.
    pub fn with_config(config: Value) -> Arc<Self> {
        let transport = Arc::new(Self::default());
        transport.respond("/config", 200, config);
        transport.respond("/info", 200, info());
        transport
    }

    /// Queue a response for `route`; the last one queued repeats.
    pub fn respond(&self, route: &'static str, status: u16, body: Value) {
        self.routes
            .lock()
            .entry(route)
            .or_default()
            .push_back(TransportResponse::new(status, body));
    }

    pub fn script(&self, script: StreamScript) {
        self.streams.lock().push_back(script);
    }

    pub fn requests_to(&self, route: &str) -> Vec<TransportRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.url.ends_with(route))
            .cloned()
            .collect()
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().clone()
    }

    fn route_of(url: &str) -> Option<&'static str> {
        ROUTES.iter().copied().find(|route| url.ends_with(route))
    }

    fn upload_names(request: &TransportRequest) -> Value {
        match &request.body {
            RequestBody::Multipart(files) => Value::Array(
                files
                    .iter()
                    .map(|f| Value::String(format!("/tmp/gradio/{}", f.filename)))
                    .collect(),
            ),
            _ => json!([]),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn request(&self, request: TransportRequest) -> ClientResult<TransportResponse> {
        self.requests.lock().push(request.clone());

        let route = Self::route_of(&request.url);
        let scripted = route.and_then(|route| {
            let mut routes = self.routes.lock();
            let queue = routes.get_mut(route)?;
            if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            }
        });

        Ok(match (scripted, route) {
            (Some(response), _) => response,
            (None, Some("/upload")) => TransportResponse::new(200, Self::upload_names(&request)),
            (None, Some("/reset")) => TransportResponse::new(200, Value::Null),
            _ => TransportResponse::new(404, json!({"detail": "Not Found"})),
        })
    }

    async fn open_stream(&self, url: &str, _headers: &[(String, String)]) -> ClientResult<FrameStream> {
        self.opened.lock().push(url.to_string());
        let script = self.streams.lock().pop_front().unwrap_or_default();

        let frames = futures::stream::iter(
            script
                .frames
                .into_iter()
                .map(|frame| Ok(frame.to_string()))
                .collect::<Vec<_>>(),
        );
        if script.hang_up {
            Ok(Box::pin(frames))
        } else {
            Ok(Box::pin(frames.chain(futures::stream::pending())))
        }
    }
}

pub fn config() -> Value {
    json!({
        "version": "4.36.0",
        "protocol": "sse_v3",
        "enable_queue": true,
        "dependencies": [
            {"api_name": "predict", "types": {"generator": false}},
            {"api_name": "caption", "types": {"generator": false}},
            {"api_name": "count", "types": {"generator": true}},
            {"api_name": "render", "types": {"generator": false}},
            {"api_name": "ping", "queue": false}
        ]
    })
}

pub fn info() -> Value {
    json!({
        "named_endpoints": {
            "/predict": {
                "parameters": [
                    {"label": "Text", "parameter_name": "text", "parameter_has_default": false,
                     "python_type": {"type": "str", "description": ""}, "component": "Textbox"},
                    {"label": "Lang", "parameter_name": "lang", "parameter_has_default": true,
                     "parameter_default": "en", "component": "Dropdown"}
                ],
                "returns": [{"label": "Out", "component": "Textbox"}]
            },
            "/caption": {
                "parameters": [
                    {"label": "Doc", "parameter_name": "doc", "parameter_has_default": false,
                     "python_type": {"type": "filepath", "description": ""}, "component": "File"}
                ],
                "returns": [{"label": "Caption", "component": "Textbox"}]
            },
            "/count": {
                "parameters": [],
                "returns": [{"label": "Text", "component": "Textbox"}]
            },
            "/render": {
                "parameters": [],
                "returns": [
                    {"label": "Report", "component": "File"},
                    {"label": "Summary", "component": "Textbox"}
                ]
            },
            "/ping": {
                "parameters": [],
                "returns": [{"label": "Reply", "component": "Textbox"}]
            }
        },
        "unnamed_endpoints": {}
    })
}

pub async fn try_connect(transport: Arc<MockTransport>, options: ClientOptions) -> ClientResult<Client> {
    Client::connect_with(
        ROOT,
        options,
        transport.clone(),
        Arc::new(HttpMetadataResolver::new(transport)),
        Arc::new(NoAuth),
    )
    .await
}

pub async fn connect(transport: Arc<MockTransport>) -> Client {
    try_connect(transport, ClientOptions::default())
        .await
        .expect("connect")
}

pub fn joined(event_id: &str) -> Value {
    json!({ "event_id": event_id })
}

/// Every event of `job`, failing the test if it stalls.
pub async fn collect(job: JobStream) -> Vec<ClientEvent> {
    tokio::time::timeout(Duration::from_secs(2), job.collect::<Vec<_>>())
        .await
        .expect("job stream stalled")
}

pub fn join_body(request: &TransportRequest) -> Value {
    match &request.body {
        RequestBody::Json(body) => body.clone(),
        other => panic!("join without JSON body: {:?}", other),
    }
}
