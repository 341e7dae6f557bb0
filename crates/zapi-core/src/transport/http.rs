//! libcurl transport: JSON POST with basic auth, compressed responses and
//! a bounded pool of reusable easy handles.
//!
//! Transfers are blocking, so each one runs on `spawn_blocking`. Dropping
//! the exchange future sets an abort flag that the transfer's progress
//! callback checks, so a cancelled dispatch does not leave transfers running.

use anyhow::{Context, Result};
use curl::easy::{Easy, List};
use std::fmt;
use std::future::Future;
use std::str;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

use crate::query::Query;
use crate::retry::{Exchange, Reply, TransportError, TransportErrorKind};

use super::Transport;

pub const USER_AGENT: &str = concat!("zapi/", env!("CARGO_PKG_VERSION"));

/// Connection settings for [`CurlTransport`].
#[derive(Clone)]
pub struct TransportSettings {
    /// Base API URL, e.g. `https://api.zyte.com/v1/`.
    pub api_url: String,
    /// Endpoint joined onto `api_url`, e.g. `extract`.
    pub endpoint: String,
    pub api_key: String,
    pub user_agent: String,
    /// Total time allowed for one exchange.
    pub timeout: Duration,
    pub connect_timeout: Duration,
    /// Maximum number of idle handles (and so keep-alive connections) kept.
    pub pool_size: usize,
}

impl TransportSettings {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            endpoint: "extract".to_string(),
            api_key: api_key.into(),
            user_agent: USER_AGENT.to_string(),
            timeout: Duration::from_secs(320),
            connect_timeout: Duration::from_secs(30),
            pool_size: 15,
        }
    }
}

impl fmt::Debug for TransportSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSettings")
            .field("api_url", &self.api_url)
            .field("endpoint", &self.endpoint)
            .field("api_key", &"***")
            .field("user_agent", &self.user_agent)
            .field("timeout", &self.timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("pool_size", &self.pool_size)
            .finish()
    }
}

/// What every transfer needs; shared with the blocking tasks.
struct Endpoint {
    base: Url,
    url: String,
    api_key: String,
    user_agent: String,
    timeout: Duration,
    connect_timeout: Duration,
}

/// Idle easy handles. Reusing a handle reuses its connection cache.
struct HandlePool {
    idle: Mutex<Vec<Easy>>,
    max_idle: usize,
}

impl HandlePool {
    fn take(&self) -> Easy {
        self.idle
            .lock()
            .ok()
            .and_then(|mut idle| idle.pop())
            .unwrap_or_else(Easy::new)
    }

    fn put(&self, mut easy: Easy) {
        easy.reset();
        if let Ok(mut idle) = self.idle.lock() {
            if idle.len() < self.max_idle {
                idle.push(easy);
            }
        }
    }
}

/// Sets the shared abort flag when the exchange future is dropped.
struct AbortOnDrop(Arc<AtomicBool>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// [`Transport`] backed by libcurl.
pub struct CurlTransport {
    endpoint: Arc<Endpoint>,
    pool: Arc<HandlePool>,
}

impl CurlTransport {
    pub fn new(settings: TransportSettings) -> Result<Self> {
        let base = Url::parse(&settings.api_url)
            .with_context(|| format!("invalid API URL {:?}", settings.api_url))?;
        let url = base
            .join(&settings.endpoint)
            .with_context(|| format!("invalid endpoint {:?}", settings.endpoint))?;
        Ok(Self {
            endpoint: Arc::new(Endpoint {
                base,
                url: url.to_string(),
                api_key: settings.api_key,
                user_agent: settings.user_agent,
                timeout: settings.timeout,
                connect_timeout: settings.connect_timeout,
            }),
            pool: Arc::new(HandlePool {
                idle: Mutex::new(Vec::new()),
                max_idle: settings.pool_size.max(1),
            }),
        })
    }

    /// Full request URL (API URL joined with the default endpoint).
    pub fn url(&self) -> &str {
        &self.endpoint.url
    }

    /// Request URL for `endpoint`, or for the default endpoint.
    pub fn url_for(&self, endpoint: Option<&str>) -> Result<String, TransportError> {
        match endpoint {
            None => Ok(self.endpoint.url.clone()),
            Some(endpoint) => self
                .endpoint
                .base
                .join(endpoint)
                .map(String::from)
                .map_err(|e| {
                    TransportError::new(
                        TransportErrorKind::Protocol,
                        format!("invalid endpoint {:?}: {}", endpoint, e),
                    )
                }),
        }
    }
}

impl Transport for CurlTransport {
    fn send(&self, query: &Query, endpoint: Option<&str>) -> impl Future<Output = Exchange> + Send {
        let url = self.url_for(endpoint);
        let body = query.to_json_bytes();
        let endpoint = Arc::clone(&self.endpoint);
        let pool = Arc::clone(&self.pool);
        async move {
            let url = url?;
            let body = body.map_err(|e| {
                TransportError::new(TransportErrorKind::Protocol, format!("encode query: {}", e))
            })?;
            let abort = AbortOnDrop(Arc::new(AtomicBool::new(false)));
            let flag = Arc::clone(&abort.0);
            let joined = tokio::task::spawn_blocking(move || {
                let mut easy = pool.take();
                let exchange = perform(&mut easy, &endpoint, &url, &body, &flag);
                pool.put(easy);
                exchange
            })
            .await;
            drop(abort);
            joined.unwrap_or_else(|e| {
                Err(TransportError::new(
                    TransportErrorKind::Protocol,
                    format!("transfer task: {}", e),
                ))
            })
        }
    }
}

fn configure(easy: &mut Easy, endpoint: &Endpoint, url: &str, body: &[u8]) -> Result<(), curl::Error> {
    easy.url(url)?;
    easy.post(true)?;
    easy.post_fields_copy(body)?;
    easy.useragent(&endpoint.user_agent)?;
    easy.username(&endpoint.api_key)?;
    easy.password("")?;
    // Empty string: offer every encoding libcurl can decode, and decode it.
    easy.accept_encoding("")?;
    easy.connect_timeout(endpoint.connect_timeout)?;
    easy.timeout(endpoint.timeout)?;
    easy.progress(true)?;

    let mut headers = List::new();
    headers.append("Content-Type: application/json")?;
    headers.append("Accept: application/json")?;
    easy.http_headers(headers)?;
    Ok(())
}

/// Runs one blocking POST. Any status is a reply; only curl failures are errors.
fn perform(
    easy: &mut Easy,
    endpoint: &Endpoint,
    url: &str,
    body: &[u8],
    abort: &AtomicBool,
) -> Exchange {
    configure(easy, endpoint, url, body).map_err(|e| transport_error(&e))?;

    let mut response = Vec::new();
    let mut request_id = None;
    {
        let mut transfer = easy.transfer();
        transfer
            .header_function(|line| {
                if let Some(id) = parse_request_id(line) {
                    request_id = Some(id);
                }
                true
            })
            .map_err(|e| transport_error(&e))?;
        transfer
            .write_function(|data| {
                response.extend_from_slice(data);
                Ok(data.len())
            })
            .map_err(|e| transport_error(&e))?;
        transfer
            .progress_function(|_, _, _, _| !abort.load(Ordering::Relaxed))
            .map_err(|e| transport_error(&e))?;
        transfer.perform().map_err(|e| transport_error(&e))?;
    }

    let status = easy.response_code().map_err(|e| transport_error(&e))?;
    Ok(Reply {
        status: status as u16,
        body: response,
        request_id,
    })
}

/// Extracts the value of a `request-id` header line.
fn parse_request_id(line: &[u8]) -> Option<String> {
    let line = str::from_utf8(line).ok()?;
    let (name, value) = line.split_once(':')?;
    if !name.trim().eq_ignore_ascii_case("request-id") {
        return None;
    }
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Map a curl error onto a transport failure kind.
fn transport_error(e: &curl::Error) -> TransportError {
    let kind = if e.is_operation_timedout() {
        TransportErrorKind::Timeout
    } else if e.is_couldnt_connect()
        || e.is_couldnt_resolve_host()
        || e.is_couldnt_resolve_proxy()
        || e.is_read_error()
        || e.is_recv_error()
        || e.is_send_error()
        || e.is_got_nothing()
    {
        TransportErrorKind::Connect
    } else {
        TransportErrorKind::Protocol
    };
    TransportError::new(kind, e.to_string())
}
