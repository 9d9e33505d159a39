//! Access to the OpenF1 REST API
//!
//! `transport` issues single HTTP requests, `client` layers caching, retry and
//! failure classification on top, and `endpoint` records which navigation
//! filters each endpoint understands.

pub mod client;
pub mod endpoint;
pub mod transport;

pub use client::{
    tokio_sleeper, FetchClient, FetchError, Fetched, PermanentReason, RetryPolicy, Sleeper,
    TransientReason,
};
pub use transport::{HttpTransport, RawResponse, Transport, TransportError, OPENF1_BASE_URL};
