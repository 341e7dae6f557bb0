//! Bounded dispatcher.
//!
//! A [`Client`] is a dispatch session: one transport, one retry policy and
//! one [`SlotPool`] of `n_conn` slots shared by every query submitted to
//! it, whether through [`Client::get`] or [`Client::iter`]. Each query runs
//! in its own task that owns its retry state; it holds a slot only while an
//! exchange is open and releases it before sleeping out a backoff.
//! Closing the session ends every query promptly, wherever it is.

mod options;
mod results;
mod slots;

use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::query::{InvalidQuery, Query};
use crate::retry::{
    run_with_retry, Attempt, FailureDetail, FailureKind, RequestError, RetryPolicy, Settled,
    SingleAttempt, StandardPolicy,
};
use crate::stats::{AggStats, QueryRecord};
use crate::transport::Transport;

pub use options::CallOptions;
pub use results::{Outcome, Results};
pub use slots::{Slot, SlotPool};

/// Error from [`Client::get`].
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The query reached a terminal error.
    #[error(transparent)]
    Request(#[from] RequestError),
    /// The session was closed before the query settled.
    #[error("dispatch session is closed")]
    Closed,
}

struct Inner<T> {
    transport: T,
    policy: Arc<dyn RetryPolicy>,
    slots: SlotPool,
    stats: Mutex<AggStats>,
    closed: watch::Sender<bool>,
}

impl<T: Transport> Inner<T> {
    /// Drives one query to a terminal state. `first` is a slot already
    /// acquired for the first attempt, if any. `None` if the session was
    /// closed first.
    async fn settle(&self, query: &Query, first: Option<Slot>, opts: &CallOptions) -> Option<Settled> {
        let normalized = match query.normalized() {
            Ok(normalized) => normalized,
            Err(e) => return Some(rejected(query, e)),
        };
        let query = &normalized;
        let endpoint = opts.endpoint.as_deref();
        let policy = opts.policy.as_deref().unwrap_or(&*self.policy);
        let single = SingleAttempt(policy);
        let policy: &dyn RetryPolicy = if opts.retries { policy } else { &single };

        let mut first = first;
        let run = run_with_retry(policy, query, move || {
            let held = first.take();
            async move {
                let slot = match held {
                    Some(slot) => slot,
                    None => self.slots.acquire().await?,
                };
                let started = Instant::now();
                let exchange = self.transport.send(query, endpoint).await;
                let elapsed = started.elapsed();
                drop(slot);
                Some(Attempt { exchange, elapsed })
            }
        });
        let mut closed = self.closed.subscribe();
        tokio::select! {
            biased;
            _ = wait_closed(&mut closed) => None,
            settled = run => settled,
        }
    }

    /// Emission step: the only place the session accumulator is updated.
    fn record(&self, settled: &Settled) {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .absorb(&settled.record, settled.result.is_ok());
    }
}

/// Resolves once the session is closed.
async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    loop {
        if *closed.borrow_and_update() {
            return;
        }
        if closed.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

/// Terminal outcome for a query that cannot be sent at all.
fn rejected(query: &Query, e: InvalidQuery) -> Settled {
    tracing::warn!(%e, "rejecting query");
    Settled {
        result: Err(RequestError {
            kind: FailureKind::Unclassified,
            detail: FailureDetail::InvalidQuery(e),
            query: query.clone(),
            attempts: 0,
        }),
        record: QueryRecord::default(),
    }
}

/// Dispatch session bounded to `n_conn` concurrent exchanges.
pub struct Client<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Client<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> Client<T> {
    /// Session using the default retry policy.
    pub fn new(transport: T, n_conn: usize) -> Self {
        Self::with_policy(transport, n_conn, StandardPolicy::default())
    }

    pub fn with_policy(transport: T, n_conn: usize, policy: impl RetryPolicy + 'static) -> Self {
        Self::with_shared_policy(transport, n_conn, Arc::new(policy))
    }

    pub fn with_shared_policy(transport: T, n_conn: usize, policy: Arc<dyn RetryPolicy>) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                policy,
                slots: SlotPool::new(n_conn),
                stats: Mutex::new(AggStats::new()),
                closed: watch::channel(false).0,
            }),
        }
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    pub fn slots(&self) -> &SlotPool {
        &self.inner.slots
    }

    /// Snapshot of the session statistics.
    pub fn stats(&self) -> AggStats {
        self.inner
            .stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Send one query, retrying per policy, and wait for its terminal outcome.
    pub async fn get(&self, query: Query) -> Result<Value, DispatchError> {
        self.get_with(query, &CallOptions::default()).await
    }

    /// [`get`](Self::get) with per-call endpoint, policy or retry settings.
    pub async fn get_with(&self, query: Query, opts: &CallOptions) -> Result<Value, DispatchError> {
        let settled = self
            .inner
            .settle(&query, None, opts)
            .await
            .ok_or(DispatchError::Closed)?;
        self.inner.record(&settled);
        Ok(settled.result?)
    }

    /// Dispatch many queries; outcomes arrive in completion order.
    ///
    /// `queries` is pulled lazily: a new query is taken only when a slot is
    /// free for its first attempt.
    pub fn iter<I>(&self, queries: I) -> Results<T>
    where
        I: IntoIterator<Item = Query>,
        I::IntoIter: Send + 'static,
    {
        self.iter_with(queries, CallOptions::default())
    }

    /// [`iter`](Self::iter) with per-call settings applied to every query.
    pub fn iter_with<I>(&self, queries: I, opts: CallOptions) -> Results<T>
    where
        I: IntoIterator<Item = Query>,
        I::IntoIter: Send + 'static,
    {
        Results::new(Arc::clone(&self.inner), Box::new(queries.into_iter()), opts)
    }

    /// Close the session. Open exchanges are aborted, backoff sleeps and
    /// slot waits end, and every unsettled query is abandoned: it produces
    /// no outcome, and `get` reports [`DispatchError::Closed`].
    pub fn close(&self) {
        self.inner.slots.close();
        self.inner.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }
}
