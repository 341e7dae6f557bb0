//! Per-query retry budget state.
//!
//! Owned by the task driving a single query; never shared. Count-based
//! budgets (download errors, server errors) are plain counters. The
//! network-error budget is a clock: the time of the first network error
//! of the current uninterrupted streak.

use std::time::{Duration, Instant};

use super::policy::FailureKind;

/// Limits applied by the standard policy. Counts are attempts that end in
/// that kind of failure; reaching the limit gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budgets {
    /// Temporary and permanent download errors together.
    pub download_errors: u32,
    /// Permanent download errors alone (they also count towards `download_errors`).
    pub permanent_download_errors: u32,
    /// Server errors (5xx outside the excluded set).
    pub server_errors: u32,
    /// Uninterrupted time spent failing with network errors.
    pub network_window: Duration,
}

impl Default for Budgets {
    fn default() -> Self {
        Self {
            download_errors: 3,
            permanent_download_errors: 2,
            server_errors: 2,
            network_window: Duration::from_secs(15 * 60),
        }
    }
}

impl Budgets {
    /// Every bounded budget doubled.
    pub fn doubled(self) -> Self {
        Self {
            download_errors: self.download_errors.saturating_mul(2),
            permanent_download_errors: self.permanent_download_errors.saturating_mul(2),
            server_errors: self.server_errors.saturating_mul(2),
            network_window: self.network_window.saturating_mul(2),
        }
    }
}

/// Which budget ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exhausted {
    DownloadErrors(u32),
    PermanentDownloadErrors(u32),
    ServerErrors(u32),
    NetworkWindow(Duration),
}

/// Counters and clocks for one query's retry chain.
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    attempts: u32,
    download_errors: u32,
    permanent_download_errors: u32,
    server_errors: u32,
    rate_limited: u32,
    network_streak_start: Option<Instant>,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Failed attempts recorded so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn download_errors(&self) -> u32 {
        self.download_errors
    }

    pub fn server_errors(&self) -> u32 {
        self.server_errors
    }

    pub fn rate_limited(&self) -> u32 {
        self.rate_limited
    }

    pub fn network_streak_start(&self) -> Option<Instant> {
        self.network_streak_start
    }

    /// A success resets every budget.
    pub fn record_success(&mut self) {
        let attempts = self.attempts;
        *self = Self {
            attempts,
            ..Self::default()
        };
    }

    /// Records a failure observed at `now` and checks it against `budgets`.
    /// Returns the exhausted budget, if any.
    pub fn record_failure(
        &mut self,
        kind: FailureKind,
        now: Instant,
        budgets: &Budgets,
    ) -> Option<Exhausted> {
        self.attempts = self.attempts.saturating_add(1);
        if kind != FailureKind::NetworkError {
            // Any other outcome breaks the network-error streak.
            self.network_streak_start = None;
        }
        match kind {
            FailureKind::RateLimited => {
                self.rate_limited = self.rate_limited.saturating_add(1);
                None
            }
            FailureKind::TemporaryDownloadError => self.count_download_error(budgets),
            FailureKind::PermanentDownloadError => {
                self.permanent_download_errors = self.permanent_download_errors.saturating_add(1);
                if self.permanent_download_errors >= budgets.permanent_download_errors {
                    self.download_errors = self.download_errors.saturating_add(1);
                    return Some(Exhausted::PermanentDownloadErrors(
                        self.permanent_download_errors,
                    ));
                }
                self.count_download_error(budgets)
            }
            FailureKind::ServerError(_) => {
                self.server_errors = self.server_errors.saturating_add(1);
                (self.server_errors >= budgets.server_errors)
                    .then_some(Exhausted::ServerErrors(self.server_errors))
            }
            FailureKind::NetworkError => {
                let start = *self.network_streak_start.get_or_insert(now);
                let elapsed = now.saturating_duration_since(start);
                (elapsed >= budgets.network_window).then_some(Exhausted::NetworkWindow(elapsed))
            }
            FailureKind::Unclassified => None,
        }
    }

    fn count_download_error(&mut self, budgets: &Budgets) -> Option<Exhausted> {
        self.download_errors = self.download_errors.saturating_add(1);
        (self.download_errors >= budgets.download_errors)
            .then_some(Exhausted::DownloadErrors(self.download_errors))
    }
}
