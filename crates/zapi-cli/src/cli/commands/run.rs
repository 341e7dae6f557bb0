//! `zapi INPUT` – dispatch every query and write results as JSON Lines.

use anyhow::Result;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::io::Write;
use std::time::{Duration, Instant};
use zapi_core::{AggStats, Client, Query, RequestError, Transport};

const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// Runs `queries` through `client`, writing one line per successful result
/// (and per error body with `store_errors`). Errors are logged and never
/// stop the run. Returns the final statistics.
pub async fn run_queries<T: Transport>(
    client: &Client<T>,
    queries: Vec<Query>,
    out: &mut dyn Write,
    store_errors: bool,
) -> Result<AggStats> {
    let total = queries.len();
    let mut results = client.iter(queries);
    let mut last_progress = Instant::now();
    let mut done = 0usize;

    while let Some(outcome) = results.next().await {
        done += 1;
        match &outcome.result {
            Ok(value) => write_line(out, value)?,
            Err(err) => {
                tracing::error!("{}", err);
                if store_errors {
                    if let Some(body) = error_body(err) {
                        write_line(out, &body)?;
                    }
                }
            }
        }
        if last_progress.elapsed() >= PROGRESS_INTERVAL {
            tracing::debug!("{}/{} | {}", done, total, client.stats());
            last_progress = Instant::now();
        }
    }
    out.flush()?;

    let stats = client.stats();
    tracing::info!("{}", stats.summary());
    tracing::info!("\nAPI error types:\n{:?}", most_common(&stats.error_types));
    tracing::info!("\nStatus codes:\n{:?}", most_common(&stats.status_codes));
    tracing::info!("\nTransport errors:\n{:?}", most_common(&stats.transport_errors));
    Ok(stats)
}

fn write_line(out: &mut dyn Write, value: &Value) -> Result<()> {
    serde_json::to_writer(&mut *out, value)?;
    out.write_all(b"\n")?;
    Ok(())
}

/// Error response body as JSON; a body that is not JSON becomes a string.
fn error_body(err: &RequestError) -> Option<Value> {
    let body = err.response_body()?;
    Some(
        serde_json::from_slice(body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned())),
    )
}

/// Counter entries sorted by descending count.
fn most_common<K: Display>(counts: &BTreeMap<K, u64>) -> Vec<(String, u64)> {
    let mut entries: Vec<(String, u64)> = counts.iter().map(|(k, n)| (k.to_string(), *n)).collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1));
    entries
}
