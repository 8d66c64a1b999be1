//! Ordered pool of interchangeable hosts.
//!
//! # Design
//! The order is randomized once, when the pool is built, from a caller-supplied
//! `Rng`. It is then fixed for the lifetime of the client and shared by every
//! request. An optional primary host is pinned at index 0 and therefore tried
//! first by every call that starts its rotation there.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::ApiError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPool {
    hosts: Vec<String>,
}

impl HostPool {
    /// A pool in exactly the given order.
    pub fn new(hosts: Vec<String>) -> Result<Self, ApiError> {
        if hosts.is_empty() {
            return Err(ApiError::Configuration("host pool must not be empty".to_string()));
        }
        if let Some(blank) = hosts.iter().find(|h| h.trim().is_empty()) {
            return Err(ApiError::Configuration(format!("invalid host name {blank:?}")));
        }
        Ok(Self { hosts })
    }

    /// `primary` (if any) first, followed by `others` in shuffled order.
    pub fn with_primary<R: Rng + ?Sized>(
        primary: Option<String>,
        mut others: Vec<String>,
        rng: &mut R,
    ) -> Result<Self, ApiError> {
        others.shuffle(rng);
        let mut hosts = Vec::with_capacity(others.len() + 1);
        hosts.extend(primary);
        hosts.extend(others);
        Self::new(hosts)
    }

    /// Hostname at `index`, modulo the pool size.
    pub fn host_at(&self, index: usize) -> &str {
        &self.hosts[index % self.hosts.len()]
    }

    /// The index following `index` in the rotation.
    pub fn next(&self, index: usize) -> usize {
        (index + 1) % self.hosts.len()
    }

    pub fn size(&self) -> usize {
        self.hosts.len()
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    /// Replace the host at `index`. Used for diagnostic host overrides.
    pub fn replace(&mut self, index: usize, host: impl Into<String>) -> Result<(), ApiError> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(ApiError::Configuration(format!("invalid host name {host:?}")));
        }
        let size = self.hosts.len();
        let slot = self.hosts.get_mut(index).ok_or_else(|| {
            ApiError::Configuration(format!("host index {index} out of range for pool of {size}"))
        })?;
        *slot = host;
        Ok(())
    }
}
