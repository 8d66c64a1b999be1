//! Asynchronous client core for a hosted search service.
//!
//! # Overview
//! Every API call is a logical `HttpRequest` that `RequestExecutor` turns into
//! one or more attempts against an ordered `HostPool`, failing over to the
//! next host on transient errors (network failures and 5xx) and stopping on
//! success, a permanent error, or once every host has been tried.
//!
//! # Design
//! - `SearchClient` / `Index` build requests (`build_*`) and perform them
//!   (async methods). Payloads are opaque `serde_json::Value`s.
//! - The executor is a plain sequential loop; the transport call is its only
//!   suspension point and races the `CancellationToken`.
//! - `Transport` is the seam to the network. `ReqwestTransport` is the default;
//!   tests substitute scripted transports.
//! - Configuration is an immutable `ClientConfig` snapshot per call.

pub mod cancel;
pub mod classify;
pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod host_pool;
pub mod http;
pub mod index;
pub mod query;
pub mod transport;

pub use cancel::CancellationToken;
pub use classify::{classify, is_client_error, is_server_error, is_success, Outcome};
pub use client::{HostRole, SearchClient};
pub use config::ClientConfig;
pub use error::{ApiError, TransportError};
pub use executor::{Execution, RequestExecutor, RequestHandle};
pub use host_pool::HostPool;
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use index::Index;
pub use query::Query;
pub use transport::{ReqwestTransport, Transport, TransportRequest};
