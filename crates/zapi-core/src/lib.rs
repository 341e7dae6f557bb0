//! Concurrency-bounded dispatcher for a JSON extraction API.
//!
//! Queries go out through a [`transport::Transport`] with at most `n_conn`
//! exchanges open at once; failures are classified and retried per a
//! [`retry::RetryPolicy`]; outcomes come back one by one in completion order
//! or, for a single query, as a plain result.

pub mod config;
pub mod dispatch;
pub mod logging;
pub mod query;
pub mod retry;
pub mod stats;
pub mod transport;

pub use dispatch::{CallOptions, Client, DispatchError, Outcome, Results};
pub use query::{InvalidQuery, Query};
pub use retry::{FailureKind, RequestError, RetryPolicy, StandardPolicy};
pub use stats::AggStats;
pub use transport::{CurlTransport, Transport, TransportSettings};
