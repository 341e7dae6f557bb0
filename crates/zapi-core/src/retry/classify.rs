//! Classify transport exchanges into retry policy failure kinds.
//!
//! Which status codes (and service error types) count as rate limiting or
//! download errors is service-specific, so the mapping is a table that can
//! be replaced from config rather than a set of constants.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::error::{Exchange, ParsedError};
use super::policy::FailureKind;

/// Result of classifying one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classified {
    Success,
    Failure(FailureKind),
}

/// Status-code and error-type sets used by [`Classifier`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub rate_limited: BTreeSet<u16>,
    pub temporary_download: BTreeSet<u16>,
    pub permanent_download: BTreeSet<u16>,
    /// Error `type` values in the response body that mark a temporary download error.
    pub temporary_download_types: BTreeSet<String>,
    /// Error `type` values in the response body that mark a permanent download error.
    pub permanent_download_types: BTreeSet<String>,
    /// 5xx codes never reported as a generic server error.
    pub server_error_exclusions: BTreeSet<u16>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            rate_limited: [429, 503].into(),
            temporary_download: [520].into(),
            permanent_download: [521].into(),
            temporary_download_types: ["/download/temporary-error".to_string()].into(),
            permanent_download_types: BTreeSet::new(),
            server_error_exclusions: [503, 520, 521].into(),
        }
    }
}

/// Maps exchanges to [`Classified`] using a [`ClassifierConfig`] table.
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    table: ClassifierConfig,
}

impl Classifier {
    pub fn new(table: ClassifierConfig) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &ClassifierConfig {
        &self.table
    }

    /// Classify one exchange. Transport failures are always network errors.
    pub fn classify(&self, exchange: &Exchange) -> Classified {
        match exchange {
            Err(_) => Classified::Failure(FailureKind::NetworkError),
            Ok(reply) if reply.is_success() => Classified::Success,
            Ok(reply) => Classified::Failure(self.classify_error(reply.status, &reply.body)),
        }
    }

    /// Classify a non-2xx response.
    pub fn classify_error(&self, status: u16, body: &[u8]) -> FailureKind {
        let t = &self.table;
        if t.rate_limited.contains(&status) {
            return FailureKind::RateLimited;
        }
        if t.temporary_download.contains(&status) {
            return FailureKind::TemporaryDownloadError;
        }
        if t.permanent_download.contains(&status) {
            return FailureKind::PermanentDownloadError;
        }
        if !t.temporary_download_types.is_empty() || !t.permanent_download_types.is_empty() {
            let parsed = ParsedError::from_body(body);
            if let Some(error_type) = parsed.error_type() {
                if t.temporary_download_types.contains(error_type) {
                    return FailureKind::TemporaryDownloadError;
                }
                if t.permanent_download_types.contains(error_type) {
                    return FailureKind::PermanentDownloadError;
                }
            }
        }
        if (500..=599).contains(&status) && !t.server_error_exclusions.contains(&status) {
            return FailureKind::ServerError(status);
        }
        FailureKind::Unclassified
    }
}
