//! Index-level operations.
//!
//! Same build/perform split as `SearchClient`. Searches and object reads go
//! to the read pool; everything that mutates goes to the write pool.

use std::time::Duration;

use serde_json::{json, Value};
use tracing::debug;

use crate::client::{index_path, HostRole, SearchClient};
use crate::error::ApiError;
use crate::http::{HttpMethod, HttpRequest};
use crate::query::Query;

const FIRST_TASK_POLL_DELAY: Duration = Duration::from_millis(100);
const MAX_TASK_POLL_DELAY: Duration = Duration::from_secs(1);

/// Handle to one index. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Index {
    client: SearchClient,
    name: String,
    path: String,
}

impl Index {
    pub(crate) fn new(client: SearchClient, name: String) -> Self {
        let path = index_path(&name);
        Self { client, name, path }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client(&self) -> &SearchClient {
        &self.client
    }

    fn object_path(&self, object_id: &str) -> Result<String, ApiError> {
        if object_id.is_empty() {
            return Err(ApiError::InvalidRequest("object ID must not be empty".to_string()));
        }
        Ok(format!("{}/{}", self.path, urlencoding::encode(object_id)))
    }

    // --- request builders ---

    /// The server assigns the object ID.
    pub fn build_add_object(&self, object: Value) -> HttpRequest {
        HttpRequest::post(self.path.clone(), object)
    }

    pub fn build_add_object_with_id(&self, object: Value, object_id: &str) -> Result<HttpRequest, ApiError> {
        Ok(HttpRequest::put(self.object_path(object_id)?, object))
    }

    /// Replace the object whose ID is the body's `objectID` field.
    pub fn build_save_object(&self, object: Value) -> Result<HttpRequest, ApiError> {
        let object_id = object
            .get("objectID")
            .and_then(Value::as_str)
            .ok_or_else(|| ApiError::InvalidRequest("object has no string objectID".to_string()))?
            .to_string();
        self.build_add_object_with_id(object, &object_id)
    }

    pub fn build_partial_update_object(&self, partial: Value, object_id: &str) -> Result<HttpRequest, ApiError> {
        Ok(HttpRequest::post(
            format!("{}/partial", self.object_path(object_id)?),
            partial,
        ))
    }

    pub fn build_get_object(&self, object_id: &str, attributes: Option<&[&str]>) -> Result<HttpRequest, ApiError> {
        let mut path = self.object_path(object_id)?;
        if let Some(attributes) = attributes {
            let mut query = Query::new();
            query.attributes_to_retrieve(attributes.iter().copied());
            // The object endpoint names the parameter `attributes`.
            if let Some(list) = query.remove("attributesToRetrieve") {
                query.set("attributes", list);
            }
            path = format!("{path}?{}", query.build());
        }
        Ok(HttpRequest::get(path))
    }

    pub fn build_delete_object(&self, object_id: &str) -> Result<HttpRequest, ApiError> {
        Ok(HttpRequest::delete(self.object_path(object_id)?))
    }

    pub fn build_search(&self, query: &Query) -> HttpRequest {
        HttpRequest::post(format!("{}/query", self.path), json!({"params": query.build()}))
    }

    pub fn build_get_settings(&self) -> HttpRequest {
        HttpRequest::get(format!("{}/settings", self.path))
    }

    pub fn build_set_settings(&self, settings: Value) -> HttpRequest {
        HttpRequest::put(format!("{}/settings", self.path), settings)
    }

    pub fn build_clear_index(&self) -> HttpRequest {
        HttpRequest::new(HttpMethod::Post, format!("{}/clear", self.path))
    }

    pub fn build_get_task(&self, task_id: u64) -> HttpRequest {
        HttpRequest::get(format!("{}/task/{task_id}", self.path))
    }

    // --- operations ---

    pub async fn add_object(&self, object: Value) -> Result<Value, ApiError> {
        self.client
            .perform(self.build_add_object(object), HostRole::Write)
            .await
    }

    pub async fn add_object_with_id(&self, object: Value, object_id: &str) -> Result<Value, ApiError> {
        self.client
            .perform(self.build_add_object_with_id(object, object_id)?, HostRole::Write)
            .await
    }

    pub async fn save_object(&self, object: Value) -> Result<Value, ApiError> {
        self.client
            .perform(self.build_save_object(object)?, HostRole::Write)
            .await
    }

    pub async fn partial_update_object(&self, partial: Value, object_id: &str) -> Result<Value, ApiError> {
        self.client
            .perform(self.build_partial_update_object(partial, object_id)?, HostRole::Write)
            .await
    }

    pub async fn get_object(&self, object_id: &str, attributes: Option<&[&str]>) -> Result<Value, ApiError> {
        self.client
            .perform(self.build_get_object(object_id, attributes)?, HostRole::Read)
            .await
    }

    pub async fn delete_object(&self, object_id: &str) -> Result<Value, ApiError> {
        self.client
            .perform(self.build_delete_object(object_id)?, HostRole::Write)
            .await
    }

    pub async fn search(&self, query: &Query) -> Result<Value, ApiError> {
        self.client
            .perform(self.build_search(query), HostRole::Read)
            .await
    }

    pub async fn get_settings(&self) -> Result<Value, ApiError> {
        self.client
            .perform(self.build_get_settings(), HostRole::Read)
            .await
    }

    pub async fn set_settings(&self, settings: Value) -> Result<Value, ApiError> {
        self.client
            .perform(self.build_set_settings(settings), HostRole::Write)
            .await
    }

    pub async fn clear_index(&self) -> Result<Value, ApiError> {
        self.client
            .perform(self.build_clear_index(), HostRole::Write)
            .await
    }

    /// Poll until the task reports `"status": "published"`, giving up with
    /// `ApiError::TaskTimeout` once `max_wait` has elapsed. A poll still in
    /// flight at that point is abandoned.
    pub async fn wait_task(&self, task_id: u64, max_wait: Duration) -> Result<Value, ApiError> {
        tokio::time::timeout(max_wait, self.poll_task(task_id))
            .await
            .map_err(|_| ApiError::TaskTimeout {
                task_id,
                waited: max_wait,
            })?
    }

    async fn poll_task(&self, task_id: u64) -> Result<Value, ApiError> {
        let mut delay = FIRST_TASK_POLL_DELAY;
        loop {
            let task = self
                .client
                .perform(self.build_get_task(task_id), HostRole::Read)
                .await?;
            if task.get("status").and_then(Value::as_str) == Some("published") {
                return Ok(task);
            }
            debug!(index = %self.name, task_id, ?delay, "task pending");
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(MAX_TASK_POLL_DELAY);
        }
    }
}
