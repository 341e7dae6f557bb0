//! Retry and backoff policy.
//!
//! This module encapsulates failure classification (rate limiting,
//! download errors, server errors, network errors), per-query retry
//! budgets and backoff delays, so the dispatcher only has to ask a
//! [`RetryPolicy`] what to do after each exchange.

mod backoff;
mod budget;
mod classify;
mod error;
mod policy;
mod run;

pub use backoff::Backoff;
pub use budget::{Budgets, Exhausted, RetryState};
pub use classify::{Classified, Classifier, ClassifierConfig};
pub use error::{
    BodyParseError, Exchange, FailureDetail, ParsedError, Reply, RequestError, TransportError,
    TransportErrorKind,
};
pub use policy::{
    FailureKind, GiveUpReason, RetryDecision, RetryPolicy, SingleAttempt,
    StandardPolicy,
};
pub use run::{run_with_retry, Attempt, Settled};
