//! Client configuration.
//!
//! # Design
//! `ClientConfig` is an immutable snapshot. The client keeps it behind an
//! `Arc` and every call captures the current `Arc` before executing, so a
//! concurrent `SearchClient::update_config` never changes the headers of a
//! request that is already in flight.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::ApiError;

pub const APPLICATION_ID_HEADER: &str = "X-Algolia-Application-Id";
pub const API_KEY_HEADER: &str = "X-Algolia-API-Key";
pub const TAG_FILTERS_HEADER: &str = "X-Algolia-TagFilters";
pub const USER_TOKEN_HEADER: &str = "X-Algolia-UserToken";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = concat!("Algolia for Rust ", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub app_id: String,
    pub api_key: String,
    /// Base per-attempt timeout. Grows linearly across retries.
    pub timeout: Duration,
    /// Custom hosts. When `None`, `{app_id}-1..3.algolia.net` are used.
    pub hosts: Option<Vec<String>>,
    /// Host pinned first for reads.
    pub dsn_host: Option<String>,
    pub tag_filters: Option<String>,
    pub user_token: Option<String>,
    pub extra_headers: BTreeMap<String, String>,
    /// `https` in production. `http` is only useful against local stand-ins.
    pub scheme: String,
}

impl ClientConfig {
    pub fn new(app_id: impl Into<String>, api_key: impl Into<String>) -> Result<Self, ApiError> {
        let config = Self {
            app_id: app_id.into(),
            api_key: api_key.into(),
            timeout: DEFAULT_TIMEOUT,
            hosts: None,
            dsn_host: None,
            tag_filters: None,
            user_token: None,
            extra_headers: BTreeMap::new(),
            scheme: "https".to_string(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Read `ALGOLIA_APPLICATION_ID`, `ALGOLIA_API_KEY` and the optional
    /// `ALGOLIA_HOSTS` (comma separated) and `ALGOLIA_TIMEOUT_MS`.
    pub fn from_env() -> Result<Self, ApiError> {
        let app_id = require_env("ALGOLIA_APPLICATION_ID")?;
        let api_key = require_env("ALGOLIA_API_KEY")?;
        let mut config = Self::new(app_id, api_key)?;

        if let Ok(hosts) = std::env::var("ALGOLIA_HOSTS") {
            let hosts: Vec<String> = hosts
                .split(',')
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(str::to_string)
                .collect();
            if !hosts.is_empty() {
                config.hosts = Some(hosts);
            }
        }
        if let Ok(raw) = std::env::var("ALGOLIA_TIMEOUT_MS") {
            let millis: u64 = raw.trim().parse().map_err(|_| {
                ApiError::Configuration(format!("ALGOLIA_TIMEOUT_MS is not a number: {raw:?}"))
            })?;
            config.timeout = Duration::from_millis(millis);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn with_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hosts = Some(hosts.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_dsn_host(mut self, host: impl Into<String>) -> Self {
        self.dsn_host = Some(host.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(key.into(), value.into());
        self
    }

    pub fn validate(&self) -> Result<(), ApiError> {
        if self.app_id.trim().is_empty() {
            return Err(ApiError::Configuration("application ID must be set".to_string()));
        }
        if self.api_key.trim().is_empty() {
            return Err(ApiError::Configuration("API key must be set".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(ApiError::Configuration("timeout must be positive".to_string()));
        }
        if let Some(hosts) = &self.hosts {
            if hosts.is_empty() {
                return Err(ApiError::Configuration("host list must not be empty".to_string()));
            }
        }
        if self.scheme != "https" && self.scheme != "http" {
            return Err(ApiError::Configuration(format!("unsupported scheme {:?}", self.scheme)));
        }
        Ok(())
    }

    /// Hosts shared by the read and write pools, before shuffling.
    pub fn fallback_hosts(&self) -> Vec<String> {
        match &self.hosts {
            Some(hosts) => hosts.clone(),
            None => (1..=3).map(|i| format!("{}-{i}.algolia.net", self.app_id)).collect(),
        }
    }

    pub fn read_primary(&self) -> Option<String> {
        match (&self.dsn_host, &self.hosts) {
            (Some(dsn), _) => Some(dsn.clone()),
            (None, None) => Some(format!("{}-dsn.algolia.net", self.app_id)),
            (None, Some(_)) => None,
        }
    }

    pub fn write_primary(&self) -> Option<String> {
        match &self.hosts {
            None => Some(format!("{}.algolia.net", self.app_id)),
            Some(_) => None,
        }
    }

    /// Service headers sent with every request.
    pub fn headers(&self) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        headers.insert(APPLICATION_ID_HEADER.to_string(), self.app_id.clone());
        headers.insert(API_KEY_HEADER.to_string(), self.api_key.clone());
        headers.insert("User-Agent".to_string(), USER_AGENT.to_string());
        if let Some(tag_filters) = &self.tag_filters {
            headers.insert(TAG_FILTERS_HEADER.to_string(), tag_filters.clone());
        }
        if let Some(user_token) = &self.user_token {
            headers.insert(USER_TOKEN_HEADER.to_string(), user_token.clone());
        }
        for (key, value) in &self.extra_headers {
            headers.insert(key.clone(), value.clone());
        }
        headers
    }

    pub fn url_for(&self, host: &str, path: &str) -> String {
        format!("{}://{host}/{}", self.scheme, path.trim_start_matches('/'))
    }
}

fn require_env(name: &str) -> Result<String, ApiError> {
    std::env::var(name).map_err(|_| ApiError::Configuration(format!("{name} is not set")))
}
