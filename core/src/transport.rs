//! The boundary between the executor and the network.
//!
//! # Design
//! A `Transport` performs exactly one HTTP exchange against one URL and
//! reports either the raw response (any status code) or a `TransportError`
//! when no response was received. It never retries and never interprets the
//! status. TLS, DNS and connection reuse are its own business.
//!
//! `ReqwestTransport` is the default. Its exchange is a plain future on the
//! caller's runtime, so no thread waits on the socket, and dropping the
//! future tears the connection down.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};

use crate::error::{ApiError, TransportError};
use crate::http::{HttpMethod, HttpResponse};

/// One physical attempt, fully resolved against a host.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// Serialized JSON. Only present for POST and PUT.
    pub body: Option<String>,
    pub timeout: Duration,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<HttpResponse, TransportError>;
}

/// reqwest-backed transport.
///
/// Status codes are returned as data rather than errors so the classifier
/// sees 4xx and 5xx bodies.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, ApiError> {
        let client = Client::builder()
            .build()
            .map_err(|e| ApiError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wrap an existing client, e.g. one with custom TLS roots or a proxy.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<HttpResponse, TransportError> {
        let timeout = request.timeout;
        let mut builder = self
            .client
            .request(method(request.method), &request.url)
            .timeout(timeout);
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| map_error(e, timeout))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(key, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (key.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response.text().await.map_err(|e| map_error(e, timeout))?;

        Ok(HttpResponse { status, headers, body })
    }
}

fn method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Delete => Method::DELETE,
    }
}

fn map_error(err: reqwest::Error, timeout: Duration) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(timeout)
    } else if err.is_connect() {
        TransportError::Connection(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;

    fn get(url: String, timeout: Duration) -> TransportRequest {
        TransportRequest {
            method: HttpMethod::Get,
            url,
            headers: Vec::new(),
            body: None,
            timeout,
        }
    }

    #[tokio::test]
    async fn refused_connection_is_a_connection_error() {
        // Bind then drop to obtain a port nothing listens on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let transport = ReqwestTransport::new().unwrap();
        let result = transport
            .send(get(format!("http://127.0.0.1:{port}/1/indexes"), Duration::from_secs(2)))
            .await;
        assert!(
            matches!(result, Err(TransportError::Connection(_))),
            "expected a connection error, got {result:?}"
        );
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            // Drain the request, never answer.
            while socket.read(&mut buf).await.unwrap_or(0) > 0 {}
        });

        let timeout = Duration::from_millis(200);
        let result = ReqwestTransport::new()
            .unwrap()
            .send(get(format!("http://{addr}/1/indexes"), timeout))
            .await;

        assert_eq!(result, Err(TransportError::Timeout(timeout)));
        server.abort();
    }
}
