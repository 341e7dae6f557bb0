//! Transport boundary: send one query, get back an [`Exchange`].
//!
//! The dispatcher needs nothing from the wire beyond a status code, a body
//! and an optional request id, or a transport failure. [`CurlTransport`]
//! is the libcurl-backed implementation used by the CLI.

mod http;

use std::future::Future;

use crate::query::Query;
use crate::retry::Exchange;

pub use self::http::{CurlTransport, TransportSettings, USER_AGENT};

/// Sends queries to the remote service.
///
/// Implementations own their own timeouts; a timeout is reported as a
/// [`TransportError`](crate::retry::TransportError) of kind `Timeout`.
/// Dropping the returned future must stop the exchange promptly.
pub trait Transport: Send + Sync + 'static {
    /// Send `query` to `endpoint`, or to the transport's default endpoint.
    fn send(&self, query: &Query, endpoint: Option<&str>) -> impl Future<Output = Exchange> + Send;
}
