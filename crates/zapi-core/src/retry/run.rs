//! Retry loop: run attempts for one query until success or the policy gives up.

use serde_json::Value;
use std::future::Future;
use std::time::Duration;

use crate::query::Query;
use crate::stats::{AttemptRecord, QueryRecord};

use super::budget::RetryState;
use super::classify::Classified;
use super::error::{Exchange, FailureDetail, ParsedError, RequestError};
use super::policy::{FailureKind, RetryDecision, RetryPolicy};

/// One finished transport exchange and how long it took.
#[derive(Debug)]
pub struct Attempt {
    pub exchange: Exchange,
    pub elapsed: Duration,
}

/// Terminal state of a query plus its attempt history.
#[derive(Debug)]
pub struct Settled {
    pub result: Result<Value, RequestError>,
    pub record: QueryRecord,
}

/// Runs `attempt` until it succeeds or `policy` gives up. Between attempts,
/// sleeps for the backoff delay; `attempt` is responsible for holding a
/// concurrency slot only while its exchange is open.
///
/// Returns `None` if `attempt` returns `None` (the session stopped handing
/// out slots); the query is then abandoned without an outcome.
pub async fn run_with_retry<F, Fut>(
    policy: &dyn RetryPolicy,
    query: &Query,
    mut attempt: F,
) -> Option<Settled>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<Attempt>>,
{
    let mut state = RetryState::new();
    let mut record = QueryRecord::default();
    loop {
        let Attempt { exchange, elapsed } = attempt().await?;
        let classified = policy.classify(&exchange);
        record.push(attempt_record(&exchange, classified, elapsed));

        let kind = match classified {
            Classified::Success => match success_payload(&exchange) {
                Some(payload) => {
                    return Some(Settled {
                        result: Ok(payload),
                        record,
                    })
                }
                None => FailureKind::Unclassified,
            },
            Classified::Failure(kind) => kind,
        };

        let now = tokio::time::Instant::now().into_std();
        match policy.decide(kind, &mut state, now) {
            RetryDecision::RetryAfter(delay) => {
                tracing::debug!(
                    url = query.url().unwrap_or("-"),
                    %kind,
                    attempt = record.len(),
                    delay_ms = delay.as_millis() as u64,
                    "retrying query"
                );
                tokio::time::sleep(delay).await;
            }
            RetryDecision::GiveUp(reason) => {
                tracing::warn!(
                    url = query.url().unwrap_or("-"),
                    %kind,
                    attempts = record.len(),
                    ?reason,
                    "giving up on query"
                );
                let detail = match exchange {
                    Ok(reply) => FailureDetail::Response(reply),
                    Err(e) => FailureDetail::Transport(e),
                };
                let attempts = record.len();
                return Some(Settled {
                    result: Err(RequestError {
                        kind,
                        detail,
                        query: query.clone(),
                        attempts,
                    }),
                    record,
                });
            }
        }
    }
}

/// Decodes a 2xx body. Anything but a JSON object is not a usable payload.
fn success_payload(exchange: &Exchange) -> Option<Value> {
    let reply = exchange.as_ref().ok()?;
    match serde_json::from_slice::<Value>(&reply.body) {
        Ok(v @ Value::Object(_)) => Some(v),
        _ => None,
    }
}

fn attempt_record(exchange: &Exchange, classified: Classified, elapsed: Duration) -> AttemptRecord {
    let failure = match classified {
        Classified::Success => None,
        Classified::Failure(kind) => Some(kind),
    };
    match exchange {
        Ok(reply) => AttemptRecord {
            status: Some(reply.status),
            transport_error: None,
            failure,
            error_type: failure.and_then(|_| {
                ParsedError::from_body(&reply.body)
                    .error_type()
                    .map(str::to_string)
            }),
            elapsed,
        },
        Err(e) => AttemptRecord {
            status: None,
            transport_error: Some(e.kind),
            failure,
            error_type: None,
            elapsed,
        },
    }
}
