//! Transport exchange results and the terminal error surfaced to callers.

use serde_json::{Map, Value};
use std::fmt;

use crate::query::{InvalidQuery, Query};

use super::policy::FailureKind;

/// HTTP response as seen by the dispatcher: status, raw body and the
/// service-supplied request id (if any).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub body: Vec<u8>,
    pub request_id: Option<String>,
}

impl Reply {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Why the transport could not produce a response at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TransportErrorKind {
    /// Connect or total exchange timeout.
    Timeout,
    /// DNS, refused or reset connection.
    Connect,
    /// Anything else below HTTP: truncated body, TLS, malformed response.
    Protocol,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Connect => "connect",
            TransportErrorKind::Protocol => "protocol",
        };
        f.write_str(s)
    }
}

/// Transport-level failure. Always classified as a network error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} error: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// One transport exchange: a response of any status, or a transport failure.
pub type Exchange = Result<Reply, TransportError>;

/// Why an error body could not be decoded into a JSON object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyParseError {
    /// Not UTF-8 or not JSON.
    BadJson,
    /// Valid JSON, but not an object.
    BadFormat,
}

/// Error response body decoded as far as possible.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedError {
    pub data: Option<Map<String, Value>>,
    pub parse_error: Option<BodyParseError>,
}

impl ParsedError {
    pub fn from_body(body: &[u8]) -> Self {
        if body.is_empty() {
            return Self {
                data: None,
                parse_error: None,
            };
        }
        match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(map)) => Self {
                data: Some(map),
                parse_error: None,
            },
            Ok(_) => Self {
                data: None,
                parse_error: Some(BodyParseError::BadFormat),
            },
            Err(_) => Self {
                data: None,
                parse_error: Some(BodyParseError::BadJson),
            },
        }
    }

    /// Service error type, e.g. `/limits/over-user-limit` or `/download/temporary-error`.
    pub fn error_type(&self) -> Option<&str> {
        self.data
            .as_ref()
            .and_then(|d| d.get("type"))
            .and_then(Value::as_str)
    }
}

/// What the last failed attempt of a query looked like.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureDetail {
    /// The service answered with an error (or undecodable) response.
    Response(Reply),
    /// No response at all.
    Transport(TransportError),
    /// The query could not be sent as given; nothing was sent.
    InvalidQuery(InvalidQuery),
}

/// Terminal error for a query: retries exhausted or not retryable.
///
/// Carries the last observed failure, not a synthesized summary, so the
/// caller can inspect the root cause.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestError {
    pub kind: FailureKind,
    pub detail: FailureDetail,
    pub query: Query,
    /// Transport exchanges made for this query, including the last one.
    pub attempts: u32,
}

impl RequestError {
    /// HTTP status of the last response, if there was one.
    pub fn status(&self) -> Option<u16> {
        match &self.detail {
            FailureDetail::Response(r) => Some(r.status),
            FailureDetail::Transport(_) | FailureDetail::InvalidQuery(_) => None,
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        match &self.detail {
            FailureDetail::Response(r) => r.request_id.as_deref(),
            FailureDetail::Transport(_) | FailureDetail::InvalidQuery(_) => None,
        }
    }

    /// Raw body of the last response.
    pub fn response_body(&self) -> Option<&[u8]> {
        match &self.detail {
            FailureDetail::Response(r) => Some(&r.body),
            FailureDetail::Transport(_) | FailureDetail::InvalidQuery(_) => None,
        }
    }

    pub fn parsed(&self) -> Option<ParsedError> {
        self.response_body().map(ParsedError::from_body)
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} after {} attempt(s)", self.kind, self.attempts)?;
        match &self.detail {
            FailureDetail::Response(r) => {
                write!(f, ": HTTP {}", r.status)?;
                if let Some(id) = &r.request_id {
                    write!(f, ", request_id={}", id)?;
                }
                write!(f, ", body={}", String::from_utf8_lossy(&r.body))?;
            }
            FailureDetail::Transport(e) => write!(f, ": {}", e)?,
            FailureDetail::InvalidQuery(e) => write!(f, ": {}", e)?,
        }
        if let Some(url) = self.query.url() {
            write!(f, " (url={})", url)?;
        }
        Ok(())
    }
}

impl std::error::Error for RequestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.detail {
            FailureDetail::Transport(e) => Some(e),
            FailureDetail::InvalidQuery(e) => Some(e),
            FailureDetail::Response(_) => None,
        }
    }
}
