//! Minimal HTTP/1.1 server imitating the extraction API for integration tests.
//!
//! Accepts `POST /<endpoint>` with a JSON query and answers according to the
//! query's `url`:
//! - contains `throttle-once`: 429 on the first request for that url, then 200
//! - contains `temporary`: always 520 with a temporary download error body
//! - contains `not-json`: 200 with a body that is not JSON
//! - contains `invalid`: 400 with a request error body
//! - anything else: 200 echoing `url` and `echoData`
//!
//! Every response carries a `request-id` header.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// One request as seen by the server.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Value,
}

#[derive(Default)]
struct State {
    seen: Mutex<HashMap<String, usize>>,
    requests: Mutex<Vec<Recorded>>,
    next_id: AtomicUsize,
}

pub struct MockApi {
    /// Base API URL, e.g. "http://127.0.0.1:12345/v1/".
    pub url: String,
    state: Arc<State>,
}

impl MockApi {
    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().unwrap().clone()
    }
}

/// Starts the server in a background thread. It runs until the process exits.
pub fn start() -> MockApi {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let state = Arc::new(State::default());
    let shared = Arc::clone(&state);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let state = Arc::clone(&shared);
            thread::spawn(move || handle(stream, &state));
        }
    });
    MockApi {
        url: format!("http://127.0.0.1:{}/v1/", port),
        state,
    }
}

/// A base URL nothing listens on.
pub fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{}/v1/", port)
}

fn handle(mut stream: TcpStream, state: &State) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(2)));
    let Some(request) = read_request(&mut stream) else {
        return;
    };
    let url = request
        .body
        .get("url")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let echo = request.body.get("echoData").cloned().unwrap_or(Value::Null);
    state.requests.lock().unwrap().push(request);

    let times_seen = {
        let mut seen = state.seen.lock().unwrap();
        let n = seen.entry(url.clone()).or_insert(0);
        *n += 1;
        *n
    };
    let (status, body) = if url.contains("throttle-once") && times_seen == 1 {
        (
            "429 Too Many Requests",
            json!({"type": "/limits/over-user-limit", "status": 429}).to_string(),
        )
    } else if url.contains("temporary") {
        (
            "520 Download Error",
            json!({"type": "/download/temporary-error", "status": 520, "title": "Temporary Downloading Error"})
                .to_string(),
        )
    } else if url.contains("not-json") {
        ("200 OK", "<html>oops</html>".to_string())
    } else if url.contains("invalid") {
        (
            "400 Bad Request",
            json!({"type": "/request/invalid", "status": 400}).to_string(),
        )
    } else {
        (
            "200 OK",
            json!({"url": url, "echoData": echo, "browserHtml": "<html></html>"}).to_string(),
        )
    };

    let id = state.next_id.fetch_add(1, Ordering::SeqCst);
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nrequest-id: req-{}\r\nConnection: close\r\n\r\n",
        status,
        body.len(),
        id
    );
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.write_all(body.as_bytes());
}

/// Reads the request head and a `Content-Length` body.
fn read_request(stream: &mut TcpStream) -> Option<Recorded> {
    let mut data = Vec::new();
    let mut buf = [0u8; 8192];
    let head_end = loop {
        let n = stream.read(&mut buf).ok()?;
        if n == 0 {
            return None;
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = std::str::from_utf8(&data[..head_end]).ok()?.to_string();
    let mut lines = head.lines();
    let mut start = lines.next()?.split_whitespace();
    let method = start.next()?.to_string();
    let path = start.next()?.to_string();
    let headers: HashMap<String, String> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
        .collect();

    let length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    while data.len() < head_end + length {
        let n = stream.read(&mut buf).ok()?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
    }
    let body = serde_json::from_slice(&data[head_end..]).unwrap_or(Value::Null);
    Some(Recorded {
        method,
        path,
        headers,
        body,
    })
}
