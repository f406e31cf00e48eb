//! Job orchestration.
//!
//! [`Client::submit`] runs one call end to end:
//! endpoint lookup, argument mapping, blob extraction, inlining of withheld
//! blobs, concurrent upload, reinsertion, `POST /queue/join`, registration on
//! the shared stream. The returned [`JobStream`] yields [`ClientEvent`]s until
//! the first terminal one.
//!
//! Endpoints the app config keeps out of the queue are answered in one
//! `POST /run/{name}` instead; their stream holds a `pending` update and the
//! final event. Output file references are turned into fetchable URLs unless
//! [`ClientOptions::normalize_files`] is off.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::StreamExt;
use futures_core::Stream;
use queuewire_blob::{
    extract, inline_withheld, reinsert, resolve_output_files, upload_all, upload_set, FileRoot,
    UploadRules,
};
use queuewire_core::{
    map_params, ApiInfo, CallArgs, ClientError, ClientOptions, ClientResult, EndpointDescriptor,
    EndpointRef, Payload, ReturnSpec,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::auth::{AuthProvider, TokenAuth};
use crate::metadata::{AppConfig, AppConnection, HttpMetadataResolver, MetadataResolver};
use crate::protocol::{ProtocolHandler, BROKEN_CONNECTION_MSG, QUEUE_FULL_MSG};
use crate::stream::{StreamItem, StreamManager};
use crate::transport::{Headers, HttpTransport, Transport, TransportRequest};
use crate::types::{ClientEvent, EventId, JobStatus, SessionHash, Stage};
use crate::uploader::TransportUploader;

struct ClientInner {
    connection: AppConnection,
    config: AppConfig,
    api: ApiInfo,
    headers: Headers,
    transport: Arc<dyn Transport>,
    rules: UploadRules,
    normalize_files: bool,
    session_hash: SessionHash,
    stream: StreamManager,
}

impl ClientInner {
    fn call_body(&self, fn_index: usize, data: Value) -> Value {
        json!({
            "data": data,
            "fn_index": fn_index,
            "session_hash": self.session_hash.as_str(),
            "event_data": null,
            "trigger_id": null,
        })
    }

    async fn join(&self, fn_index: usize, data: Value) -> ClientResult<EventId> {
        let body = self.call_body(fn_index, data);
        let request = TransportRequest::post_json(format!("{}/queue/join", self.config.root), body)
            .with_headers(&self.headers);
        let response = self.transport.request(request).await?;

        match response.status {
            200 => {}
            503 => {
                return Err(ClientError::SubmitFailed {
                    status: 503,
                    message: QUEUE_FULL_MSG.to_string(),
                })
            }
            status => {
                return Err(ClientError::SubmitFailed {
                    status,
                    message: response
                        .error_text()
                        .unwrap_or_else(|| BROKEN_CONNECTION_MSG.to_string()),
                })
            }
        }

        response
            .body
            .get("event_id")
            .and_then(Value::as_str)
            .map(EventId::from)
            .ok_or_else(|| ClientError::protocol(format!("join response without event_id: {}", response.body)))
    }

    /// Answer an unqueued call in one request. The events end terminal.
    async fn run(&self, descriptor: &EndpointDescriptor, data: Value) -> Vec<ClientEvent> {
        let name = descriptor.name.as_deref().unwrap_or("predict");
        let request = TransportRequest::post_json(
            format!("{}/run/{}", self.config.root, name),
            self.call_body(descriptor.fn_index, data),
        )
        .with_headers(&self.headers);
        let pending = ClientEvent::Update(JobStatus::new(Stage::Pending).outside_queue());

        let last = match self.transport.request(request).await {
            Ok(response) if response.status == 200 => {
                let mut status = JobStatus::new(Stage::Complete).outside_queue();
                status.eta = response.body.get("average_duration").and_then(Value::as_f64);
                ClientEvent::Complete {
                    status,
                    output: response.body.get("data").cloned().map(Payload::from).unwrap_or_default(),
                }
            }
            Ok(response) => {
                let message = response
                    .body
                    .get("error")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or_else(|| response.error_text())
                    .unwrap_or_else(|| BROKEN_CONNECTION_MSG.to_string());
                warn!(endpoint = name, status = response.status, "direct call failed");
                ClientEvent::Update(JobStatus::new(Stage::Error).outside_queue().with_message(message))
            }
            Err(err) => {
                warn!(endpoint = name, error = %err, "direct call failed");
                ClientEvent::Update(JobStatus::new(Stage::Error).outside_queue().with_message(err.to_string()))
            }
        };
        vec![pending, last]
    }

    /// Point file outputs of `event` at the app's file route.
    fn resolve_files(&self, returns: &[ReturnSpec], event: ClientEvent) -> ClientEvent {
        if !self.normalize_files {
            return event;
        }
        let files = FileRoot::new(&self.config.root, self.config.root_url.as_deref());
        match event {
            ClientEvent::Generating { status, output } => ClientEvent::Generating {
                status,
                output: output.map(|output| resolve_output_files(output, returns, files)),
            },
            ClientEvent::Complete { status, output } => ClientEvent::Complete {
                status,
                output: resolve_output_files(output, returns, files),
            },
            other => other,
        }
    }

    async fn reset(&self, event_id: &EventId) {
        let request = TransportRequest::post_json(
            format!("{}/reset", self.config.root),
            json!({ "event_id": event_id.as_str() }),
        )
        .with_headers(&self.headers);

        match self.transport.request(request).await {
            Ok(response) if response.is_success() => debug!(event_id = %event_id, "job reset"),
            Ok(response) => warn!(event_id = %event_id, status = response.status, "reset rejected"),
            Err(err) => warn!(event_id = %event_id, error = %err, "reset failed"),
        }
    }
}

/// Handle to one connected app. Cheap to clone.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Connect over HTTP with the default resolver and token provider.
    #[instrument(skip(options))]
    pub async fn connect(app_reference: &str, options: ClientOptions) -> ClientResult<Self> {
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(&options)?);
        let resolver = Arc::new(HttpMetadataResolver::new(Arc::clone(&transport)));
        let auth = Arc::new(TokenAuth::from_option(options.token.clone()));
        Self::connect_with(app_reference, options, transport, resolver, auth).await
    }

    /// Connect with explicit collaborators.
    pub async fn connect_with(
        app_reference: &str,
        options: ClientOptions,
        transport: Arc<dyn Transport>,
        resolver: Arc<dyn MetadataResolver>,
        auth: Arc<dyn AuthProvider>,
    ) -> ClientResult<Self> {
        let connection = resolver.resolve(app_reference).await?;
        let credentials = auth.credentials(&connection.root).await?;
        let config = resolver.fetch_config(&connection, &credentials).await?;
        if !config.protocol.is_sse() {
            return Err(ClientError::config_unresolved(format!(
                "protocol `{}` is not supported",
                config.protocol
            )));
        }
        let api = resolver.fetch_api_info(&config, &credentials).await?;

        let session_hash = SessionHash::new();
        let headers = credentials.headers();
        let stream = StreamManager::new(
            Arc::clone(&transport),
            format!("{}/queue/data?session_hash={}", config.root, session_hash),
            headers.clone(),
        );

        info!(
            root = %config.root,
            protocol = %config.protocol,
            version = config.version.as_deref().unwrap_or("unknown"),
            endpoints = api.len(),
            "connected"
        );

        Ok(Self {
            inner: Arc::new(ClientInner {
                connection,
                config,
                api,
                headers,
                transport,
                rules: UploadRules::from(&options),
                normalize_files: options.normalize_files,
                session_hash,
                stream,
            }),
        })
    }

    /// Every endpoint the app exposes.
    pub fn view_api(&self) -> &ApiInfo {
        &self.inner.api
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    pub fn connection(&self) -> &AppConnection {
        &self.inner.connection
    }

    pub fn session_hash(&self) -> &SessionHash {
        &self.inner.session_hash
    }

    /// Submit a job and follow it.
    pub async fn submit(
        &self,
        endpoint: impl Into<EndpointRef>,
        args: impl Into<CallArgs>,
    ) -> ClientResult<JobStream> {
        self.submit_to(&endpoint.into(), args.into()).await
    }

    #[instrument(skip(self, endpoint, args), fields(endpoint = %endpoint))]
    async fn submit_to(&self, endpoint: &EndpointRef, args: CallArgs) -> ClientResult<JobStream> {
        let inner = &self.inner;
        let descriptor = inner.api.lookup(endpoint)?;
        let payload = Payload::Array(map_params(args, descriptor)?);

        let refs = extract(&payload, None, &[], true, Some(descriptor));
        let payload = inline_withheld(payload, &refs)?;

        let uploads = upload_set(&refs);
        let names = if uploads.is_empty() {
            Vec::new()
        } else {
            let uploader = TransportUploader::new(
                Arc::clone(&inner.transport),
                &inner.config.root,
                inner.headers.clone(),
            );
            upload_all(&uploader, &uploads, &inner.rules).await?
        };
        let payload = reinsert(payload, &refs, &names)?;

        if inner.config.skips_queue(descriptor.fn_index) {
            let events = inner.run(descriptor, payload.to_json()?).await;
            debug!(uploads = uploads.len(), "direct call answered");
            return Ok(JobStream::answered(Arc::clone(&self.inner), descriptor.returns.clone(), events));
        }

        let event_id = inner.join(descriptor.fn_index, payload.to_json()?).await?;
        debug!(event_id = %event_id, uploads = uploads.len(), "job joined");

        let (tx, rx) = mpsc::unbounded_channel();
        inner.stream.register(event_id.clone(), Arc::new(tx));
        if let Err(err) = inner.stream.open().await {
            inner.stream.unregister(&event_id);
            return Err(err);
        }

        Ok(JobStream::new(
            Arc::clone(&self.inner),
            descriptor.returns.clone(),
            event_id,
            rx,
        ))
    }

    /// Submit and wait for the final output.
    #[instrument(skip(self, endpoint, args))]
    pub async fn predict(
        &self,
        endpoint: impl Into<EndpointRef>,
        args: impl Into<CallArgs>,
    ) -> ClientResult<Payload> {
        let mut job = self.submit(endpoint, args).await?;
        while let Some(event) = job.next().await {
            if !event.is_terminal() {
                continue;
            }
            return match event {
                ClientEvent::Complete { output, .. } => Ok(output),
                other => Err(ClientError::JobFailed(
                    other
                        .status()
                        .and_then(|status| status.message.clone())
                        .unwrap_or_else(|| "job ended with an error".to_string()),
                )),
            };
        }
        Err(ClientError::transport_closed("stream ended before a terminal event"))
    }

    /// Ask the server to stop `event_id` and stop following it.
    #[instrument(skip(self))]
    pub async fn cancel(&self, event_id: &EventId) {
        self.inner.reset(event_id).await;
        self.inner.stream.unregister(event_id);
    }
}

/// Unregisters its event id when dropped.
struct ConsumerGuard {
    stream: StreamManager,
    event_id: EventId,
}

impl Drop for ConsumerGuard {
    fn drop(&mut self) {
        self.stream.unregister(&self.event_id);
    }
}

/// Lazy, single-pass sequence of events for one job.
///
/// Ends after the first terminal event. Dropping it early stops forwarding
/// for its event id.
pub struct JobStream {
    event_id: Option<EventId>,
    client: Arc<ClientInner>,
    events: Pin<Box<dyn Stream<Item = ClientEvent> + Send>>,
}

impl JobStream {
    fn new(
        client: Arc<ClientInner>,
        returns: Vec<ReturnSpec>,
        event_id: EventId,
        mut rx: mpsc::UnboundedReceiver<StreamItem>,
    ) -> Self {
        let guard = ConsumerGuard {
            stream: client.stream.clone(),
            event_id: event_id.clone(),
        };
        let mut handler = ProtocolHandler::new(&client.config.protocol).with_event_id(event_id.clone());
        let inner = Arc::clone(&client);

        let events = async_stream::stream! {
            let _guard = guard;
            while let Some(item) = rx.recv().await {
                let event = match item {
                    StreamItem::Message(message) => handler.handle(&message),
                    StreamItem::TransportError(reason) | StreamItem::TransportClosed(reason) => {
                        handler.connection_lost(&reason)
                    }
                };
                if let Some(event) = event {
                    yield inner.resolve_files(&returns, event);
                }
                if handler.is_terminal() {
                    break;
                }
            }
        };

        Self {
            event_id: Some(event_id),
            client,
            events: Box::pin(events),
        }
    }

    /// A call already answered outside the queue.
    fn answered(client: Arc<ClientInner>, returns: Vec<ReturnSpec>, events: Vec<ClientEvent>) -> Self {
        let events: Vec<ClientEvent> = events
            .into_iter()
            .map(|event| client.resolve_files(&returns, event))
            .collect();
        Self {
            event_id: None,
            client,
            events: Box::pin(futures::stream::iter(events)),
        }
    }

    /// Queue event id; `None` for calls answered outside the queue.
    pub fn event_id(&self) -> Option<&EventId> {
        self.event_id.as_ref()
    }

    /// Ask the server to stop this job, then stop following it.
    pub async fn cancel(self) {
        if let Some(event_id) = &self.event_id {
            self.client.reset(event_id).await;
        }
    }
}

impl Stream for JobStream {
    type Item = ClientEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().events.as_mut().poll_next(cx)
    }
}
