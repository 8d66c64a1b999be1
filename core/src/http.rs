//! HTTP request and response types as plain data.
//!
//! # Design
//! `HttpRequest` describes one logical API call: the caller-visible operation
//! that the executor may turn into several physical attempts against
//! different hosts. It never names a host; the path is everything after
//! `{scheme}://{host}/`, query string included.
//!
//! `HttpResponse` is what a transport hands back after one attempt. Status
//! interpretation is left to the classifier.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde_json::Value;

use crate::error::ApiError;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// Only POST and PUT carry a JSON body.
    pub fn allows_body(self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable logical request.
///
/// Built by the `build_*` methods of `SearchClient` and `Index`, or directly
/// through the constructors below. The body is only ever present for POST and
/// PUT; `with_body` rejects anything else.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    method: HttpMethod,
    path: String,
    headers: BTreeMap<String, String>,
    body: Option<Value>,
    timeout: Option<Duration>,
}

impl HttpRequest {
    /// A bodiless request. A leading `/` on `path` is dropped.
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            method,
            path: path.trim_start_matches('/').to_string(),
            headers: BTreeMap::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            body: Some(body),
            ..Self::new(HttpMethod::Post, path)
        }
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self {
            body: Some(body),
            ..Self::new(HttpMethod::Put, path)
        }
    }

    /// Attach a JSON body. Fails for GET and DELETE.
    pub fn with_body(mut self, body: Value) -> Result<Self, ApiError> {
        if !self.method.allows_body() {
            return Err(ApiError::InvalidRequest(format!(
                "{} requests cannot carry a body",
                self.method
            )));
        }
        self.body = Some(body);
        Ok(self)
    }

    /// Add an operation-specific header. Keys are unique; a later call with
    /// the same key replaces the earlier value.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Override the client's base timeout for this call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// An HTTP response described as plain data.
///
/// Produced by a `Transport` after one attempt and consumed by
/// `classify::classify`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }
}
