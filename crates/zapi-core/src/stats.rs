//! Aggregate statistics for a dispatch session.
//!
//! Each query's task keeps its own attempt records; they are folded into
//! [`AggStats`] only when the query's terminal outcome is emitted, so
//! attempt tasks never touch the shared accumulator.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::retry::{FailureKind, TransportErrorKind};

/// One transport exchange, as remembered for statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    /// HTTP status, if a response arrived.
    pub status: Option<u16>,
    /// Transport failure kind, if no response arrived.
    pub transport_error: Option<TransportErrorKind>,
    /// `None` for a success.
    pub failure: Option<FailureKind>,
    /// Service error type from the error body, if any.
    pub error_type: Option<String>,
    pub elapsed: Duration,
}

/// Attempt history of one query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRecord {
    pub attempts: Vec<AttemptRecord>,
}

impl QueryRecord {
    pub fn push(&mut self, attempt: AttemptRecord) {
        self.attempts.push(attempt);
    }

    pub fn len(&self) -> u32 {
        self.attempts.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }
}

/// Session-wide totals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggStats {
    /// Results returned to the caller as successes.
    pub n_success: u64,
    /// Errors returned to the caller, after all retries.
    pub n_fatal_errors: u64,
    /// Transport exchanges, retries included.
    pub n_attempts: u64,
    /// Responses with status 429. Other throttling statuses (503, or a
    /// custom classifier table) are retried the same way but count as errors.
    pub n_rate_limited: u64,
    /// Failed exchanges other than 429s, retried ones included.
    pub n_errors: u64,
    /// Sum of exchange durations, for the mean response time.
    pub response_time: Duration,
    /// Count per HTTP status.
    pub status_codes: BTreeMap<u16, u64>,
    /// Count per transport failure kind.
    pub transport_errors: BTreeMap<TransportErrorKind, u64>,
    /// Count per service error type.
    pub error_types: BTreeMap<String, u64>,
}

impl AggStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds in a settled query's attempt history.
    pub fn absorb(&mut self, record: &QueryRecord, succeeded: bool) {
        if succeeded {
            self.n_success += 1;
        } else {
            self.n_fatal_errors += 1;
        }
        for attempt in &record.attempts {
            self.n_attempts += 1;
            self.response_time += attempt.elapsed;
            if let Some(status) = attempt.status {
                *self.status_codes.entry(status).or_default() += 1;
            }
            if let Some(kind) = attempt.transport_error {
                *self.transport_errors.entry(kind).or_default() += 1;
            }
            if let Some(t) = &attempt.error_type {
                *self.error_types.entry(t.clone()).or_default() += 1;
            }
            match attempt.failure {
                None => {}
                Some(_) if attempt.status == Some(429) => self.n_rate_limited += 1,
                Some(_) => self.n_errors += 1,
            }
        }
    }

    /// Queries that reached a terminal outcome.
    pub fn n_processed(&self) -> u64 {
        self.n_success + self.n_fatal_errors
    }

    pub fn mean_response_time(&self) -> Duration {
        if self.n_attempts == 0 {
            return Duration::ZERO;
        }
        self.response_time / self.n_attempts as u32
    }

    pub fn throttle_ratio(&self) -> f64 {
        ratio(self.n_rate_limited, self.n_attempts)
    }

    pub fn error_ratio(&self) -> f64 {
        ratio(self.n_errors, self.n_attempts)
    }

    pub fn success_ratio(&self) -> f64 {
        ratio(self.n_success, self.n_processed())
    }

    /// Multi-line report for the end of a run.
    pub fn summary(&self) -> String {
        format!(
            "\nSummary\n\
             -------\n\
             Mean response time:       {:.2}\n\
             Throttle ratio:           {:.1}%\n\
             Attempts:                 {}\n\
             Errors:                   {:.1}%, fatal: {}, non fatal: {}\n\
             Successful queries:       {} of {}\n\
             Success ratio:            {:.1}%\n",
            self.mean_response_time().as_secs_f64(),
            self.throttle_ratio() * 100.0,
            self.n_attempts,
            self.error_ratio() * 100.0,
            self.n_fatal_errors,
            self.non_fatal_errors(),
            self.n_success,
            self.n_processed(),
            self.success_ratio() * 100.0,
        )
    }

    fn non_fatal_errors(&self) -> u64 {
        self.n_errors.saturating_sub(self.n_fatal_errors)
    }
}

impl fmt::Display for AggStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "resp:{:.2}s, throttle:{:.1}%, err:{}+{}({:.1}%) | success:{}/{}({:.1}%)",
            self.mean_response_time().as_secs_f64(),
            self.throttle_ratio() * 100.0,
            self.non_fatal_errors(),
            self.n_fatal_errors,
            self.error_ratio() * 100.0,
            self.n_success,
            self.n_processed(),
            self.success_ratio() * 100.0,
        )
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        return 0.0;
    }
    num as f64 / den as f64
}
