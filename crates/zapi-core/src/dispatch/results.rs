use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::query::Query;
use crate::retry::{RequestError, Settled};
use crate::transport::Transport;

use super::{CallOptions, Inner, Slot};

/// Terminal outcome of one query from a bulk dispatch.
#[derive(Debug)]
pub struct Outcome {
    pub query: Query,
    pub result: Result<Value, RequestError>,
}

impl Outcome {
    /// The caller's correlation value, copied from the query.
    pub fn echo_data(&self) -> Option<&Value> {
        self.query.echo_data()
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn into_result(self) -> Result<Value, RequestError> {
        self.result
    }
}

type Input = Box<dyn Iterator<Item = Query> + Send>;

/// Lazy stream of outcomes in completion order.
///
/// Queries are drawn from the input only when a slot is free for their
/// first attempt, so an unbounded input is never materialized. Dropping
/// `Results` aborts every query still in flight.
pub struct Results<T> {
    inner: Arc<Inner<T>>,
    input: Option<Input>,
    tasks: JoinSet<(Query, Option<Settled>)>,
    options: CallOptions,
    cancelled: bool,
}

impl<T: Transport> Results<T> {
    pub(super) fn new(inner: Arc<Inner<T>>, input: Input, options: CallOptions) -> Self {
        Self {
            inner,
            input: Some(input),
            tasks: JoinSet::new(),
            options,
            cancelled: false,
        }
    }

    /// Next outcome, success or terminal error. `None` once every query
    /// has been emitted (or the dispatch was cancelled).
    pub async fn next(&mut self) -> Option<Outcome> {
        loop {
            if self.cancelled || (self.input.is_none() && self.tasks.is_empty()) {
                return None;
            }
            tokio::select! {
                biased;
                Some(joined) = self.tasks.join_next() => match joined {
                    Ok((query, Some(settled))) => return Some(self.emit(query, settled)),
                    // Abandoned after the session was closed.
                    Ok((_, None)) => {}
                    Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                    Err(_) => {}
                },
                slot = self.inner.slots.acquire(), if self.input.is_some() => match slot {
                    Some(slot) => self.draw(slot),
                    None => {
                        tracing::debug!("session closed, not drawing further queries");
                        self.input = None;
                    }
                },
                else => return None,
            }
        }
    }

    /// Like [`next`](Self::next), but a terminal error is returned as `Err`.
    /// Iteration may continue after an error.
    pub async fn try_next(&mut self) -> Result<Option<Value>, RequestError> {
        match self.next().await {
            Some(outcome) => outcome.result.map(Some),
            None => Ok(None),
        }
    }

    /// Abandon the rest of the dispatch: no more queries are drawn, open
    /// exchanges are aborted and no further outcomes are emitted.
    pub fn cancel(&mut self) {
        self.cancelled = true;
        self.input = None;
        self.tasks.abort_all();
    }

    /// Queries drawn from the input but not yet emitted.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    fn draw(&mut self, slot: Slot) {
        let next = self.input.as_mut().and_then(Iterator::next);
        let Some(query) = next else {
            self.input = None;
            return;
        };
        let inner = Arc::clone(&self.inner);
        let options = self.options.clone();
        self.tasks.spawn(async move {
            let settled = inner.settle(&query, Some(slot), &options).await;
            (query, settled)
        });
    }

    fn emit(&self, query: Query, settled: Settled) -> Outcome {
        self.inner.record(&settled);
        Outcome {
            query,
            result: settled.result,
        }
    }
}
