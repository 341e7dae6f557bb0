//! Retry policy: failure kinds, decisions and the pluggable policy trait.
//!
//! A policy is the `classify → decide → backoff` triple. The dispatcher
//! only talks to [`RetryPolicy`]; [`StandardPolicy`] covers the default,
//! aggressive and rate-limit-only presets, and callers can implement the
//! trait for a wholly custom decision table.

use std::fmt;
use std::time::{Duration, Instant};

use super::backoff::Backoff;
use super::budget::{Budgets, Exhausted, RetryState};
use super::classify::{Classified, Classifier, ClassifierConfig};
use super::error::Exchange;

/// Classification of a failed exchange for retry purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Service asked us to slow down (429 and friends). Retried forever.
    RateLimited,
    /// Transient failure to produce a result for the query.
    TemporaryDownloadError,
    /// Failure to produce a result that is unlikely to go away; still retried a little.
    PermanentDownloadError,
    /// 5xx response outside the excluded set.
    ServerError(u16),
    /// No HTTP response: connect failure, timeout, broken transfer.
    NetworkError,
    /// Anything else. Never retried.
    Unclassified,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::RateLimited => f.write_str("rate limited"),
            FailureKind::TemporaryDownloadError => f.write_str("temporary download error"),
            FailureKind::PermanentDownloadError => f.write_str("permanent download error"),
            FailureKind::ServerError(code) => write!(f, "server error {}", code),
            FailureKind::NetworkError => f.write_str("network error"),
            FailureKind::Unclassified => f.write_str("unclassified error"),
        }
    }
}

/// Why a query stopped being retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUpReason {
    /// The kind is never retried.
    NotRetryable,
    /// Retrying is disabled for this kind, or for the whole call.
    RetriesDisabled,
    /// A budget ran out.
    Exhausted(Exhausted),
}

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the given delay.
    RetryAfter(Duration),
    /// Stop; the last failure becomes the query's terminal error.
    GiveUp(GiveUpReason),
}

/// Pluggable retry policy.
pub trait RetryPolicy: Send + Sync {
    /// Classify one exchange.
    fn classify(&self, exchange: &Exchange) -> Classified;

    /// Record a failure observed at `now` in `state` and decide what to do next.
    fn decide(&self, kind: FailureKind, state: &mut RetryState, now: Instant) -> RetryDecision;

    /// Delay before retry number `attempt` (1-based) after a failure of `kind`.
    fn backoff(&self, kind: FailureKind, attempt: u32) -> Duration;
}

/// Budget-table policy used by the presets.
#[derive(Debug, Clone)]
pub struct StandardPolicy {
    pub classifier: Classifier,
    pub budgets: Budgets,
    /// When false, only rate limiting is retried.
    pub retry_errors: bool,
    pub rate_limited_backoff: Backoff,
    pub error_backoff: Backoff,
}

impl Default for StandardPolicy {
    fn default() -> Self {
        Self {
            classifier: Classifier::default(),
            budgets: Budgets::default(),
            retry_errors: true,
            rate_limited_backoff: Backoff::rate_limited(),
            error_backoff: Backoff::errors(),
        }
    }
}

impl StandardPolicy {
    /// Default policy with every bounded budget doubled.
    pub fn aggressive() -> Self {
        Self {
            budgets: Budgets::default().doubled(),
            ..Self::default()
        }
    }

    /// Retry rate limiting only; every other failure is terminal.
    pub fn rate_limit_only() -> Self {
        Self {
            retry_errors: false,
            ..Self::default()
        }
    }

    pub fn with_classifier(mut self, table: ClassifierConfig) -> Self {
        self.classifier = Classifier::new(table);
        self
    }

    pub fn with_budgets(mut self, budgets: Budgets) -> Self {
        self.budgets = budgets;
        self
    }

    /// Use the same backoff shape for every kind.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.rate_limited_backoff = backoff;
        self.error_backoff = backoff;
        self
    }
}

impl RetryPolicy for StandardPolicy {
    fn classify(&self, exchange: &Exchange) -> Classified {
        self.classifier.classify(exchange)
    }

    fn decide(&self, kind: FailureKind, state: &mut RetryState, now: Instant) -> RetryDecision {
        let exhausted = state.record_failure(kind, now, &self.budgets);
        if kind == FailureKind::Unclassified {
            return RetryDecision::GiveUp(GiveUpReason::NotRetryable);
        }
        if kind != FailureKind::RateLimited && !self.retry_errors {
            return RetryDecision::GiveUp(GiveUpReason::RetriesDisabled);
        }
        match exhausted {
            Some(e) => RetryDecision::GiveUp(GiveUpReason::Exhausted(e)),
            None => RetryDecision::RetryAfter(self.backoff(kind, state.attempts())),
        }
    }

    fn backoff(&self, kind: FailureKind, attempt: u32) -> Duration {
        match kind {
            FailureKind::RateLimited => self.rate_limited_backoff.delay(attempt),
            _ => self.error_backoff.delay(attempt),
        }
    }
}

/// Wraps a policy so that the first failure is final, whatever its kind.
/// Classification and backoff are the wrapped policy's.
pub struct SingleAttempt<'a>(pub &'a dyn RetryPolicy);

impl RetryPolicy for SingleAttempt<'_> {
    fn classify(&self, exchange: &Exchange) -> Classified {
        self.0.classify(exchange)
    }

    fn decide(&self, kind: FailureKind, _state: &mut RetryState, _now: Instant) -> RetryDecision {
        match kind {
            FailureKind::Unclassified => RetryDecision::GiveUp(GiveUpReason::NotRetryable),
            _ => RetryDecision::GiveUp(GiveUpReason::RetriesDisabled),
        }
    }

    fn backoff(&self, kind: FailureKind, attempt: u32) -> Duration {
        self.0.backoff(kind, attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    enum Step {
        Fail(FailureKind),
        Advance(Duration),
    }

    use super::FailureKind::*;
    use self::Step::*;

    /// Feeds `steps` through `policy`; returns true if it gave up on the last failure.
    fn exhausted(policy: &StandardPolicy, steps: &[Step]) -> bool {
        let mut state = RetryState::new();
        let mut now = Instant::now();
        let failures = steps.iter().filter(|s| matches!(s, Fail(_))).count();
        let mut seen = 0;
        for step in steps {
            match step {
                Advance(d) => now += *d,
                Fail(kind) => {
                    seen += 1;
                    match policy.decide(*kind, &mut state, now) {
                        RetryDecision::RetryAfter(_) => {}
                        RetryDecision::GiveUp(reason) => {
                            assert_eq!(seen, failures, "gave up early ({reason:?})");
                            return true;
                        }
                    }
                }
            }
        }
        false
    }

    fn repeat(kind: FailureKind, n: usize) -> Vec<Step> {
        (0..n).map(|_| Fail(kind)).collect()
    }

    fn mins(m: u64) -> Duration {
        Duration::from_secs(m * 60)
    }

    #[test]
    fn rate_limiting_is_retried_forever() {
        for policy in [StandardPolicy::default(), StandardPolicy::aggressive()] {
            assert!(!exhausted(&policy, &repeat(RateLimited, 1000)));
        }
    }

    #[test]
    fn temporary_download_errors_default_budget() {
        let p = StandardPolicy::default();
        assert!(!exhausted(&p, &repeat(TemporaryDownloadError, 2)));
        assert!(exhausted(&p, &repeat(TemporaryDownloadError, 3)));
    }

    #[test]
    fn alternating_download_errors_drain_the_shared_budget() {
        let p = StandardPolicy::default();
        // With separate budgets, T,P,T would still be within 3 temporary / 2 permanent.
        assert!(exhausted(
            &p,
            &[
                Fail(TemporaryDownloadError),
                Fail(PermanentDownloadError),
                Fail(TemporaryDownloadError),
            ]
        ));
        assert!(!exhausted(
            &p,
            &[Fail(TemporaryDownloadError), Fail(PermanentDownloadError)]
        ));
    }

    #[test]
    fn rate_limiting_between_download_errors_does_not_count() {
        let p = StandardPolicy::default();
        let mut steps = Vec::new();
        for _ in 0..2 {
            steps.push(Fail(RateLimited));
            steps.push(Fail(TemporaryDownloadError));
        }
        steps.push(Fail(RateLimited));
        assert!(!exhausted(&p, &steps));
    }

    #[test]
    fn server_errors_are_retried_once() {
        let p = StandardPolicy::default();
        assert!(!exhausted(&p, &repeat(ServerError(500), 1)));
        assert!(exhausted(&p, &repeat(ServerError(502), 2)));
    }

    #[test]
    fn server_error_counter_survives_other_kinds() {
        let p = StandardPolicy::aggressive();
        let steps = [
            Fail(ServerError(500)),
            Fail(ServerError(500)),
            Fail(RateLimited),
            Fail(NetworkError),
            Fail(ServerError(504)),
            Fail(ServerError(500)),
        ];
        assert!(exhausted(&p, &steps));
    }

    #[test]
    fn network_errors_stop_after_uninterrupted_window() {
        let p = StandardPolicy::default();
        let almost = mins(15) - Duration::from_secs(1);
        assert!(!exhausted(
            &p,
            &[Fail(NetworkError), Advance(almost), Fail(NetworkError)]
        ));
        assert!(exhausted(
            &p,
            &[Fail(NetworkError), Advance(mins(15)), Fail(NetworkError)]
        ));
    }

    #[test]
    fn network_window_restarts_after_a_different_kind() {
        let p = StandardPolicy::default();
        assert!(!exhausted(
            &p,
            &[
                Fail(NetworkError),
                Advance(mins(7)),
                Fail(RateLimited),
                Advance(mins(8)),
                Fail(NetworkError),
                Advance(mins(15) - Duration::from_secs(1)),
                Fail(NetworkError),
            ]
        ));
        assert!(exhausted(
            &p,
            &[
                Fail(NetworkError),
                Advance(mins(7)),
                Fail(RateLimited),
                Advance(mins(8)),
                Fail(NetworkError),
                Advance(mins(15)),
                Fail(NetworkError),
            ]
        ));
    }

    #[test]
    fn success_restarts_the_network_window() {
        let p = StandardPolicy::default();
        let mut state = RetryState::new();
        let t0 = Instant::now();
        assert!(matches!(
            p.decide(NetworkError, &mut state, t0),
            RetryDecision::RetryAfter(_)
        ));
        state.record_success();
        let t1 = t0 + mins(14);
        assert!(matches!(
            p.decide(NetworkError, &mut state, t1),
            RetryDecision::RetryAfter(_)
        ));
        // 15 min after the first error, but only 2 min into the new streak.
        let t2 = t1 + mins(2);
        assert!(matches!(
            p.decide(NetworkError, &mut state, t2),
            RetryDecision::RetryAfter(_)
        ));
    }

    #[test]
    fn aggressive_doubles_bounded_budgets() {
        let p = StandardPolicy::aggressive();
        assert!(!exhausted(&p, &repeat(TemporaryDownloadError, 5)));
        assert!(exhausted(&p, &repeat(TemporaryDownloadError, 6)));
        assert!(!exhausted(&p, &repeat(PermanentDownloadError, 3)));
        assert!(exhausted(&p, &repeat(PermanentDownloadError, 4)));
        assert!(!exhausted(&p, &repeat(ServerError(500), 3)));
        assert!(exhausted(&p, &repeat(ServerError(500), 4)));
        assert!(!exhausted(
            &p,
            &[Fail(NetworkError), Advance(mins(29)), Fail(NetworkError)]
        ));
    }

    #[test]
    fn unclassified_is_never_retried() {
        for policy in [StandardPolicy::default(), StandardPolicy::aggressive()] {
            let mut state = RetryState::new();
            assert_eq!(
                policy.decide(Unclassified, &mut state, Instant::now()),
                RetryDecision::GiveUp(GiveUpReason::NotRetryable)
            );
        }
    }

    #[test]
    fn rate_limit_only_gives_up_on_errors() {
        let p = StandardPolicy::rate_limit_only();
        assert!(!exhausted(&p, &repeat(RateLimited, 50)));
        for kind in [
            TemporaryDownloadError,
            PermanentDownloadError,
            ServerError(500),
            NetworkError,
        ] {
            let mut state = RetryState::new();
            assert_eq!(
                p.decide(kind, &mut state, Instant::now()),
                RetryDecision::GiveUp(GiveUpReason::RetriesDisabled)
            );
        }
    }

    #[test]
    fn single_attempt_gives_up_on_rate_limiting_too() {
        let inner = StandardPolicy::default();
        let policy = SingleAttempt(&inner);
        let mut state = RetryState::new();
        for kind in [RateLimited, TemporaryDownloadError, NetworkError] {
            assert_eq!(
                policy.decide(kind, &mut state, Instant::now()),
                RetryDecision::GiveUp(GiveUpReason::RetriesDisabled)
            );
        }
        assert_eq!(
            policy.decide(Unclassified, &mut state, Instant::now()),
            RetryDecision::GiveUp(GiveUpReason::NotRetryable)
        );
    }

    #[test]
    fn backoff_shape_depends_on_kind() {
        let p = StandardPolicy::default();
        let d = p.backoff(RateLimited, 1);
        assert!(d >= Duration::from_secs(20) && d <= Backoff::rate_limited().max_delay(1));
        let d = p.backoff(ServerError(500), 1);
        assert!(d >= Duration::from_secs(3) && d <= Backoff::errors().max_delay(1));
    }
}
