//! Retry and failover across a host pool.
//!
//! # Design
//! One logical request becomes a strictly sequential chain of attempts. The
//! rotation starts at `first_host_index` and advances one host per transient
//! failure; it stops as soon as the next host would be the first one again,
//! so a pool of N hosts yields at most N attempts. Each retry raises the
//! per-attempt timeout by the base timeout (T, 2T, 3T, ...).
//!
//! The only suspension point is the transport call, which races against the
//! cancellation token. Cancellation is also checked before each attempt and
//! after each attempt resumes; once observed, nothing is delivered.
//!
//! All mutable state lives in `AttemptState`, owned by a single execution.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cancel::CancellationToken;
use crate::classify::{classify, Outcome};
use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::host_pool::HostPool;
use crate::http::HttpRequest;
use crate::transport::{Transport, TransportRequest};

/// Terminal state of one execution.
#[derive(Debug, Clone, PartialEq)]
pub enum Execution {
    Succeeded(Value),
    /// Permanent error, or the last transient error after the rotation came
    /// full circle.
    Failed(ApiError),
    Cancelled,
}

impl Execution {
    /// `None` when cancelled: cancellation suppresses delivery.
    pub fn into_result(self) -> Option<Result<Value, ApiError>> {
        match self {
            Execution::Succeeded(value) => Some(Ok(value)),
            Execution::Failed(err) => Some(Err(err)),
            Execution::Cancelled => None,
        }
    }
}

#[derive(Debug)]
struct AttemptState {
    first_host_index: usize,
    host_index: usize,
    base_timeout: Duration,
    timeout: Duration,
    attempt: usize,
}

impl AttemptState {
    fn new(first_host_index: usize, base_timeout: Duration) -> Self {
        Self {
            first_host_index,
            host_index: first_host_index,
            base_timeout,
            timeout: base_timeout,
            attempt: 1,
        }
    }

    /// Move to the next host, or `false` if the rotation is exhausted.
    fn advance(&mut self, pool: &HostPool) -> bool {
        let next = pool.next(self.host_index);
        if next == self.first_host_index {
            return false;
        }
        self.host_index = next;
        self.timeout = self.timeout.saturating_add(self.base_timeout);
        self.attempt += 1;
        true
    }
}

pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
}

impl RequestExecutor {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Run `request` against `pool`, starting at `first_host_index`.
    pub async fn execute(
        &self,
        config: &ClientConfig,
        request: &HttpRequest,
        pool: &HostPool,
        first_host_index: usize,
        token: &CancellationToken,
    ) -> Execution {
        if token.is_cancelled() {
            debug!(method = %request.method(), path = request.path(), "cancelled before first attempt");
            return Execution::Cancelled;
        }
        if first_host_index >= pool.size() {
            return Execution::Failed(ApiError::Configuration(format!(
                "first host index {first_host_index} out of range for pool of {}",
                pool.size()
            )));
        }

        let body = match request.body().map(serde_json::to_string).transpose() {
            Ok(body) => body,
            Err(e) => return Execution::Failed(ApiError::Serialization(e.to_string())),
        };
        let headers = merge_headers(config.headers(), request, body.is_some());
        let mut state = AttemptState::new(first_host_index, request.timeout().unwrap_or(config.timeout));

        loop {
            if token.is_cancelled() {
                debug!(attempt = state.attempt, "cancelled before attempt");
                return Execution::Cancelled;
            }

            let host = pool.host_at(state.host_index);
            let attempt = TransportRequest {
                method: request.method(),
                url: config.url_for(host, request.path()),
                headers: headers.clone(),
                body: body.clone(),
                timeout: state.timeout,
            };
            debug!(
                method = %request.method(),
                host,
                path = request.path(),
                attempt = state.attempt,
                timeout = ?state.timeout,
                "sending request"
            );

            let raw = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!(host, attempt = state.attempt, "cancelled in flight");
                    return Execution::Cancelled;
                }
                raw = self.transport.send(attempt) => raw,
            };
            if token.is_cancelled() {
                debug!(host, attempt = state.attempt, "cancelled after attempt, discarding response");
                return Execution::Cancelled;
            }

            match classify(raw) {
                Outcome::Success(value) => {
                    debug!(host, attempt = state.attempt, "request succeeded");
                    return Execution::Succeeded(value);
                }
                Outcome::Transient(err) => {
                    if !state.advance(pool) {
                        warn!(host, attempts = state.attempt, error = %err, "all hosts failed");
                        return Execution::Failed(err);
                    }
                    warn!(
                        host,
                        next_host = pool.host_at(state.host_index),
                        error = %err,
                        "transient failure, retrying on next host"
                    );
                }
                Outcome::Permanent(err) => {
                    debug!(host, attempt = state.attempt, error = %err, "permanent failure");
                    return Execution::Failed(err);
                }
            }
        }
    }

    /// Run `request` on the tokio runtime and hand the result to
    /// `on_complete`, which is called exactly once unless `token` is
    /// cancelled first, in which case it is never called.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F>(
        self: &Arc<Self>,
        config: Arc<ClientConfig>,
        request: HttpRequest,
        pool: Arc<HostPool>,
        first_host_index: usize,
        token: CancellationToken,
        on_complete: F,
    ) -> RequestHandle
    where
        F: FnOnce(Result<Value, ApiError>) + Send + 'static,
    {
        let executor = Arc::clone(self);
        let task_token = token.clone();
        let task = tokio::spawn(async move {
            let execution = executor
                .execute(&config, &request, &pool, first_host_index, &task_token)
                .await;
            if task_token.is_cancelled() {
                return;
            }
            if let Some(result) = execution.into_result() {
                on_complete(result);
            }
        });
        RequestHandle { token, task }
    }
}

/// Handle to a request submitted with `RequestExecutor::spawn`.
///
/// Cancelling stops further attempts and suppresses the completion callback.
/// A write that already reached the server is not undone.
#[derive(Debug)]
pub struct RequestHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl RequestHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait until the request has finished or observed its cancellation.
    pub async fn finished(self) {
        if let Err(e) = self.task.await {
            warn!(error = %e, "request task did not complete");
        }
    }
}

/// Config headers, overridden case-insensitively by the request's own
/// headers, plus the JSON content type when a body is sent.
fn merge_headers(
    defaults: BTreeMap<String, String>,
    request: &HttpRequest,
    has_body: bool,
) -> Vec<(String, String)> {
    let mut merged: Vec<(String, String)> = defaults.into_iter().collect();
    let mut set = |key: &str, value: &str| {
        merged.retain(|(existing, _)| !existing.eq_ignore_ascii_case(key));
        merged.push((key.to_string(), value.to_string()));
    };
    for (key, value) in request.headers() {
        set(key, value);
    }
    if has_body {
        set("Content-Type", "application/json");
    }
    merged
}
