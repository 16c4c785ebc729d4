//! Transport collaborator: "send a request, get bytes" and "send a request,
//! get a stream of lines"

use crate::error::{HttpFailure, TransportError};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::{Client, Response};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

/// Lines of a streamed response body, without trailing newlines
pub type LineStream = BoxStream<'static, Result<String, TransportError>>;

/// Default cap on how much of an error body is buffered
pub const DEFAULT_MAX_ERROR_BODY_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// A provider request as built by an adapter
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub url: String,
    pub method: HttpMethod,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl HttpRequest {
    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            url: url.into(),
            method: HttpMethod::Post,
            headers: Vec::new(),
            body: Some(body),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Case-insensitive header lookup
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Moves bytes for the provider adapters
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and return the full body of a 2xx response
    async fn send_once(&self, request: HttpRequest) -> Result<Vec<u8>, TransportError>;

    /// Send a request and return the response body split into lines
    async fn stream_lines(&self, request: HttpRequest) -> Result<LineStream, TransportError>;
}

/// Timeouts and limits for [`HttpTransport`]
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub request_timeout: Option<Duration>,
    pub connect_timeout: Duration,
    pub max_error_body_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: None,
            connect_timeout: Duration::from_secs(15),
            max_error_body_bytes: DEFAULT_MAX_ERROR_BODY_BYTES,
        }
    }
}

/// reqwest-backed transport
pub struct HttpTransport {
    client: Client,
    max_error_body_bytes: usize,
}

impl HttpTransport {
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let mut builder = Client::builder().connect_timeout(config.connect_timeout);
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        Ok(Self {
            client,
            max_error_body_bytes: config.max_error_body_bytes,
        })
    }

    async fn execute(&self, request: HttpRequest) -> Result<Response, TransportError> {
        debug!(url = %request.url, "Sending provider request");

        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(TransportError::Http(
                read_failure(response, self.max_error_body_bytes).await,
            ))
        }
    }
}

/// Capture status, headers and at most `limit` bytes of an error body
async fn read_failure(response: Response, limit: usize) -> HttpFailure {
    let mut failure = HttpFailure::new(response.status().as_u16());
    for (name, value) in response.headers() {
        if let Ok(value) = value.to_str() {
            failure = failure.with_header(name.as_str(), value);
        }
    }

    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                let room = limit.saturating_sub(body.len());
                body.extend_from_slice(&bytes[..bytes.len().min(room)]);
                if body.len() >= limit {
                    break;
                }
            }
            Err(e) => {
                warn!("Failed to read error body: {}", e);
                break;
            }
        }
    }

    warn!(status = failure.status, bytes = body.len(), "Provider returned error status");
    if !body.is_empty() {
        failure = failure.with_body(body);
    }
    failure
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send_once(&self, request: HttpRequest) -> Result<Vec<u8>, TransportError> {
        let response = self.execute(request).await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn stream_lines(&self, request: HttpRequest) -> Result<LineStream, TransportError> {
        let response = self.execute(request).await?;
        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();

            while let Some(chunk_result) = stream.next().await {
                match chunk_result {
                    Ok(bytes) => {
                        buffer.extend_from_slice(&bytes);

                        // Split on raw bytes so multi-byte characters are never cut
                        while let Some(newline_pos) = buffer.iter().position(|b| *b == b'\n') {
                            let line: Vec<u8> = buffer.drain(..=newline_pos).collect();
                            let line = String::from_utf8_lossy(&line)
                                .trim_end_matches(['\r', '\n'])
                                .to_string();
                            if tx.send(Ok(line)).await.is_err() {
                                return; // Receiver dropped
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(TransportError::from(e))).await;
                        return;
                    }
                }
            }

            if !buffer.is_empty() {
                let line = String::from_utf8_lossy(&buffer).trim_end().to_string();
                let _ = tx.send(Ok(line)).await;
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }
}
