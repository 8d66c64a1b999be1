//! Entry point of the search API.
//!
//! # Design
//! Each operation is split into a `build_*` method that produces an
//! `HttpRequest` without touching the network and an async method that runs
//! it through the executor against the read or write host pool. Responses are
//! returned as the decoded JSON object; their schema belongs to the service.
//!
//! `SearchClient` is cheap to clone and safe to share across tasks. The
//! configuration and both host pools sit behind `Arc`s that calls snapshot, so
//! the only locking is a brief read to clone those `Arc`s.

use std::sync::Arc;

use parking_lot::RwLock;
use rand::Rng;
use serde_json::{json, Value};
use tracing::debug;

use crate::cancel::CancellationToken;
use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::executor::{Execution, RequestExecutor, RequestHandle};
use crate::host_pool::HostPool;
use crate::http::HttpRequest;
use crate::index::Index;
use crate::query::Query;
use crate::transport::{ReqwestTransport, Transport};

/// Which host pool serves a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostRole {
    Read,
    Write,
}

#[derive(Clone)]
pub struct SearchClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: RwLock<Arc<ClientConfig>>,
    read_hosts: RwLock<Arc<HostPool>>,
    write_hosts: RwLock<Arc<HostPool>>,
    executor: Arc<RequestExecutor>,
}

impl SearchClient {
    /// A client over HTTPS with a randomly shuffled host order.
    pub fn new(config: ClientConfig) -> Result<Self, ApiError> {
        let transport = ReqwestTransport::new()?;
        Self::with_transport(config, Arc::new(transport), &mut rand::thread_rng())
    }

    /// A client over `transport`, shuffling hosts with `rng`.
    pub fn with_transport<R: Rng + ?Sized>(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        rng: &mut R,
    ) -> Result<Self, ApiError> {
        config.validate()?;
        let read_hosts = HostPool::with_primary(config.read_primary(), config.fallback_hosts(), rng)?;
        let write_hosts =
            HostPool::with_primary(config.write_primary(), config.fallback_hosts(), rng)?;
        debug!(
            app_id = %config.app_id,
            read_hosts = ?read_hosts.hosts(),
            write_hosts = ?write_hosts.hosts(),
            "search client initialized"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                config: RwLock::new(Arc::new(config)),
                read_hosts: RwLock::new(Arc::new(read_hosts)),
                write_hosts: RwLock::new(Arc::new(write_hosts)),
                executor: Arc::new(RequestExecutor::new(transport)),
            }),
        })
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> Arc<ClientConfig> {
        Arc::clone(&self.inner.config.read())
    }

    /// Apply `update` to a copy of the configuration and swap it in.
    ///
    /// Host settings are fixed when the client is built; changing `hosts` or
    /// `dsn_host` here is rejected. Use `set_read_host` / `set_write_host`
    /// instead. `update` runs under the config lock and must not call back
    /// into the client.
    pub fn update_config<F>(&self, update: F) -> Result<(), ApiError>
    where
        F: FnOnce(&mut ClientConfig),
    {
        let mut guard = self.inner.config.write();
        let mut next = ClientConfig::clone(&guard);
        update(&mut next);
        next.validate()?;
        if next.hosts != guard.hosts || next.dsn_host != guard.dsn_host {
            return Err(ApiError::Configuration(
                "hosts cannot be changed after the client is built".to_string(),
            ));
        }
        *guard = Arc::new(next);
        Ok(())
    }

    pub fn set_api_key(&self, api_key: impl Into<String>) -> Result<(), ApiError> {
        let api_key = api_key.into();
        self.update_config(|config| config.api_key = api_key)
    }

    pub fn read_hosts(&self) -> Arc<HostPool> {
        Arc::clone(&self.inner.read_hosts.read())
    }

    pub fn write_hosts(&self) -> Arc<HostPool> {
        Arc::clone(&self.inner.write_hosts.read())
    }

    /// Replace one read host, e.g. to point a test at an unreachable name.
    pub fn set_read_host(&self, index: usize, host: impl Into<String>) -> Result<(), ApiError> {
        replace_host(&self.inner.read_hosts, index, host.into())
    }

    pub fn set_write_host(&self, index: usize, host: impl Into<String>) -> Result<(), ApiError> {
        replace_host(&self.inner.write_hosts, index, host.into())
    }

    fn pool(&self, role: HostRole) -> Arc<HostPool> {
        match role {
            HostRole::Read => self.read_hosts(),
            HostRole::Write => self.write_hosts(),
        }
    }

    /// Execute `request` on the pool for `role`, starting at its primary.
    ///
    /// Drop the returned future to abandon the request.
    pub async fn perform(&self, request: HttpRequest, role: HostRole) -> Result<Value, ApiError> {
        self.perform_with_token(request, role, &CancellationToken::new())
            .await
    }

    /// Like `perform`, but stops at the next cancellation check once `token`
    /// fires and returns `ApiError::Cancelled`. Any response still in flight
    /// is discarded.
    pub async fn perform_with_token(
        &self,
        request: HttpRequest,
        role: HostRole,
        token: &CancellationToken,
    ) -> Result<Value, ApiError> {
        let config = self.config();
        let pool = self.pool(role);
        match self
            .inner
            .executor
            .execute(&config, &request, &pool, 0, token)
            .await
        {
            Execution::Succeeded(value) => Ok(value),
            Execution::Failed(err) => Err(err),
            Execution::Cancelled => Err(ApiError::Cancelled),
        }
    }

    /// Execute `request` in the background, delivering the result to
    /// `on_complete` unless `token` is cancelled first.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit<F>(
        &self,
        request: HttpRequest,
        role: HostRole,
        token: CancellationToken,
        on_complete: F,
    ) -> RequestHandle
    where
        F: FnOnce(Result<Value, ApiError>) + Send + 'static,
    {
        self.inner
            .executor
            .spawn(self.config(), request, self.pool(role), 0, token, on_complete)
    }

    pub fn init_index(&self, name: impl Into<String>) -> Index {
        Index::new(self.clone(), name.into())
    }

    // --- request builders ---

    pub fn build_list_indexes(&self) -> HttpRequest {
        HttpRequest::get("1/indexes")
    }

    pub fn build_delete_index(&self, name: &str) -> HttpRequest {
        HttpRequest::delete(index_path(name))
    }

    pub fn build_move_index(&self, source: &str, destination: &str) -> HttpRequest {
        index_operation(source, "move", destination)
    }

    pub fn build_copy_index(&self, source: &str, destination: &str) -> HttpRequest {
        index_operation(source, "copy", destination)
    }

    pub fn build_get_logs(&self, offset: u32, length: u32, log_type: Option<&str>) -> HttpRequest {
        let mut query = Query::new();
        query.set("offset", offset.to_string()).set("length", length.to_string());
        if let Some(log_type) = log_type {
            query.set("type", log_type);
        }
        HttpRequest::get(format!("1/logs?{}", query.build()))
    }

    pub fn build_list_user_keys(&self) -> HttpRequest {
        HttpRequest::get("1/keys")
    }

    pub fn build_get_user_key(&self, key: &str) -> HttpRequest {
        HttpRequest::get(key_path(key))
    }

    /// `key` is the opaque key description, e.g. `{"acl": ["search"]}`.
    pub fn build_add_user_key(&self, key: Value) -> HttpRequest {
        HttpRequest::post("1/keys", key)
    }

    pub fn build_update_user_key(&self, key: &str, description: Value) -> HttpRequest {
        HttpRequest::put(key_path(key), description)
    }

    pub fn build_delete_user_key(&self, key: &str) -> HttpRequest {
        HttpRequest::delete(key_path(key))
    }

    pub fn build_multiple_queries(&self, queries: &[(String, Query)]) -> HttpRequest {
        let requests: Vec<Value> = queries
            .iter()
            .map(|(index, query)| json!({"indexName": index, "params": query.build()}))
            .collect();
        HttpRequest::post("1/indexes/*/queries", json!({ "requests": requests }))
    }

    // --- operations ---

    pub async fn list_indexes(&self) -> Result<Value, ApiError> {
        self.perform(self.build_list_indexes(), HostRole::Read).await
    }

    pub async fn delete_index(&self, name: &str) -> Result<Value, ApiError> {
        self.perform(self.build_delete_index(name), HostRole::Write).await
    }

    pub async fn move_index(&self, source: &str, destination: &str) -> Result<Value, ApiError> {
        self.perform(self.build_move_index(source, destination), HostRole::Write)
            .await
    }

    pub async fn copy_index(&self, source: &str, destination: &str) -> Result<Value, ApiError> {
        self.perform(self.build_copy_index(source, destination), HostRole::Write)
            .await
    }

    pub async fn get_logs(
        &self,
        offset: u32,
        length: u32,
        log_type: Option<&str>,
    ) -> Result<Value, ApiError> {
        self.perform(self.build_get_logs(offset, length, log_type), HostRole::Read)
            .await
    }

    pub async fn list_user_keys(&self) -> Result<Value, ApiError> {
        self.perform(self.build_list_user_keys(), HostRole::Read).await
    }

    pub async fn get_user_key(&self, key: &str) -> Result<Value, ApiError> {
        self.perform(self.build_get_user_key(key), HostRole::Read).await
    }

    pub async fn add_user_key(&self, key: Value) -> Result<Value, ApiError> {
        self.perform(self.build_add_user_key(key), HostRole::Write).await
    }

    pub async fn update_user_key(&self, key: &str, description: Value) -> Result<Value, ApiError> {
        self.perform(self.build_update_user_key(key, description), HostRole::Write)
            .await
    }

    pub async fn delete_user_key(&self, key: &str) -> Result<Value, ApiError> {
        self.perform(self.build_delete_user_key(key), HostRole::Write).await
    }

    pub async fn multiple_queries(&self, queries: &[(String, Query)]) -> Result<Value, ApiError> {
        self.perform(self.build_multiple_queries(queries), HostRole::Read)
            .await
    }
}

impl std::fmt::Debug for SearchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchClient")
            .field("app_id", &self.config().app_id)
            .field("read_hosts", &self.read_hosts().hosts())
            .field("write_hosts", &self.write_hosts().hosts())
            .finish()
    }
}

fn replace_host(slot: &RwLock<Arc<HostPool>>, index: usize, host: String) -> Result<(), ApiError> {
    let mut guard = slot.write();
    let mut pool = HostPool::clone(&guard);
    pool.replace(index, host)?;
    *guard = Arc::new(pool);
    Ok(())
}

pub(crate) fn index_path(name: &str) -> String {
    format!("1/indexes/{}", urlencoding::encode(name))
}

fn key_path(key: &str) -> String {
    format!("1/keys/{}", urlencoding::encode(key))
}

fn index_operation(source: &str, operation: &str, destination: &str) -> HttpRequest {
    HttpRequest::post(
        format!("{}/operation", index_path(source)),
        json!({"operation": operation, "destination": destination}),
    )
}
