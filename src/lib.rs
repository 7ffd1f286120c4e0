//! `httpx` is an async HTTP request executor built on `reqwest`.
//!
//! A [`Request`] describes one logical call. [`Client::do_request`] runs it
//! with:
//! - a fresh timeout scope per attempt,
//! - retries with a fixed or exponential delay,
//! - an allow-list of accepted status codes,
//! - one OpenTelemetry client span per network round trip, with the trace
//!   context injected into the outgoing headers.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use httpx::{Client, DelayStrategy, Request};
//!
//! # async fn run() -> httpx::Result<()> {
//! let client = Client::default();
//! let body = client
//!     .do_request(
//!         &Request::get("https://example.com/health")
//!             .with_timeout(Duration::from_secs(2))
//!             .with_retry(3, Duration::from_millis(50), DelayStrategy::ExponentialBackoff),
//!     )
//!     .await?;
//! println!("{} bytes", body.len());
//! # Ok(())
//! # }
//! ```

mod client;
mod context;
mod error;
mod options;
mod request;
mod retry;
mod telemetry;

pub use client::Client;
pub use context::{CallContext, CancelReason};
pub use error::{HttpxError, RetryError};
pub use options::{
    with_idle_conn_timeout, with_max_idle_conns_per_host, ClientOption, PoolConfig,
    DEFAULT_IDLE_CONN_TIMEOUT, DEFAULT_MAX_IDLE_CONNS_PER_HOST,
};
pub use request::{OnRetry, Request, RetryIf};
pub use retry::{DelayStrategy, DEFAULT_RETRY_DELAY};
pub use telemetry::TRACER_NAME;

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
pub const MULTIPART_FORM_CONTENT_TYPE: &str = "multipart/form-data";
pub const STREAM_CONTENT_TYPE: &str = "application/octet-stream";

pub type Result<T> = std::result::Result<T, HttpxError>;
