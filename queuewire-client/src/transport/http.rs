use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use queuewire_core::{ClientError, ClientOptions, ClientResult};
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use tracing::{debug, instrument};

use super::{FrameStream, Method, RequestBody, Transport, TransportRequest, TransportResponse};

/// [`Transport`] over `reqwest` with `eventsource-stream` framing.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(options: &ClientOptions) -> ClientResult<Self> {
        let mut builder = reqwest::Client::builder().user_agent(options.user_agent.clone());
        if let Some(timeout) = options.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ClientError::transport(format!("http client: {}", e)))?;
        Ok(Self { client })
    }

    /// Wrap an already configured client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn build(&self, request: TransportRequest) -> ClientResult<reqwest::RequestBuilder> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(body) => builder.json(&body),
            RequestBody::Multipart(files) => {
                let mut form = Form::new();
                for file in files {
                    let part = Part::stream_with_length(file.bytes.clone(), file.bytes.len() as u64)
                        .file_name(file.filename)
                        .mime_str(&file.content_type)
                        .map_err(|e| ClientError::transport(format!("invalid mime type: {}", e)))?;
                    form = form.part(file.field, part);
                }
                builder.multipart(form)
            }
        };
        Ok(builder)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip_all, fields(method = %request.method, url = %request.url))]
    async fn request(&self, request: TransportRequest) -> ClientResult<TransportResponse> {
        let response = self
            .build(request)?
            .send()
            .await
            .map_err(|e| ClientError::transport(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| ClientError::transport(e.to_string()))?;
        let body = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        debug!(status, "response received");
        Ok(TransportResponse::new(status, body))
    }

    #[instrument(skip_all, fields(url = %url))]
    async fn open_stream(&self, url: &str, headers: &[(String, String)]) -> ClientResult<FrameStream> {
        let mut builder = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "text/event-stream");
        for (name, value) in headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ClientError::transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ClientError::transport(format!(
                "stream request returned {}",
                response.status()
            )));
        }

        let frames = response.bytes_stream().eventsource().map(|event| {
            event
                .map(|event| event.data)
                .map_err(|e| ClientError::transport(e.to_string()))
        });
        Ok(Box::pin(frames))
    }
}
