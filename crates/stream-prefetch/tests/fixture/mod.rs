//! Local HTTP fixture for integration tests.
//!
//! A small axum server bound to `127.0.0.1:0` that emulates the byte-range
//! origins the engine talks to, with a request log and routes for the
//! failure shapes we care about:
//! - `/media` — ranged resource honoring `Range`, answering `206` with a
//!   `Content-Range` total.
//! - `/media-short` — same, but truncates every non-initial range response
//!   to provoke a size discrepancy.
//! - `/fragment` — whole-download live fragment carrying `x-head-seqnum` /
//!   `x-sequence-num` headers.
//! - `/fragment-bare` — fragment without the sequence headers.
//! - `/status/{code}` — answers the given status with an empty body.
//! - `/redirect` — `302` to `/media`.
//!
//! No external network; everything is in memory.

use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use stream_prefetch::Url;

pub const FRAGMENT_SEQ_HEAD: i64 = 12;
pub const FRAGMENT_SEQ_ID: i64 = 7;

/// One observed request.
pub struct RequestRecord {
    pub path: &'static str,
    pub range: Option<(u64, u64)>,
}

pub struct FixtureState {
    body: Vec<u8>,
    requests: Mutex<Vec<RequestRecord>>,
}

pub struct Fixture {
    state: Arc<FixtureState>,
    base: Url,
}

impl Fixture {
    /// Boots the fixture server for `body` and returns a handle to it.
    pub async fn start(body: Vec<u8>) -> Self {
        init_tracing();
        let state = Arc::new(FixtureState {
            body,
            requests: Mutex::new(Vec::new()),
        });
        let app = Router::new()
            .route("/media", get(media))
            .route("/media-short", get(media_short))
            .route("/fragment", get(fragment))
            .route("/fragment-bare", get(fragment_bare))
            .route("/status/{code}", get(status_override))
            .route("/redirect", get(redirect))
            .with_state(state.clone());

        // Bind synchronously so the port is known before the server task
        // starts, then hand the listener to tokio.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind fixture listener");
        let addr = listener.local_addr().expect("fixture listener addr");
        listener.set_nonblocking(true).expect("nonblocking listener");
        tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).expect("tokio listener");
            axum::serve(listener, app).await.expect("fixture server");
        });

        Self {
            state,
            base: Url::parse(&format!("http://{addr}")).expect("fixture base url"),
        }
    }

    pub fn url(&self, path: &str) -> Url {
        self.base.join(path).expect("fixture url")
    }

    pub fn request_count(&self) -> usize {
        self.state.requests.lock().unwrap().len()
    }

    /// Block indices of the ranged requests seen for `path`, in order.
    pub fn ranged_blocks(&self, path: &str, block_size: u64) -> Vec<u64> {
        self.state
            .requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path == path)
            .filter_map(|r| r.range.map(|(start, _)| start / block_size))
            .collect()
    }
}

/// Polls `cond` every 10 ms until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

/// Deterministic test payload.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn parse_range(headers: &HeaderMap) -> Option<(u64, u64)> {
    let value = headers.get(header::RANGE)?.to_str().ok()?;
    let value = value.strip_prefix("bytes=")?;
    let (start, end) = value.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

fn record(state: &FixtureState, path: &'static str, range: Option<(u64, u64)>) {
    state.requests.lock().unwrap().push(RequestRecord { path, range });
}

fn ranged_response(state: &FixtureState, range: Option<(u64, u64)>, shorten: bool) -> Response {
    let total = state.body.len() as u64;
    match range {
        Some((start, end_incl)) => {
            let end = (end_incl + 1).min(total);
            let mut slice = state.body[start as usize..end as usize].to_vec();
            if shorten && start > 0 {
                let keep = slice.len().saturating_sub(100);
                slice.truncate(keep);
            }
            let content_range = format!("bytes {start}-{}/{total}", end - 1);
            (
                StatusCode::PARTIAL_CONTENT,
                [(header::CONTENT_RANGE, content_range)],
                slice,
            )
                .into_response()
        }
        None => (StatusCode::OK, state.body.clone()).into_response(),
    }
}

async fn media(State(state): State<Arc<FixtureState>>, headers: HeaderMap) -> Response {
    let range = parse_range(&headers);
    record(&state, "/media", range);
    ranged_response(&state, range, false)
}

async fn media_short(State(state): State<Arc<FixtureState>>, headers: HeaderMap) -> Response {
    let range = parse_range(&headers);
    record(&state, "/media-short", range);
    ranged_response(&state, range, true)
}

async fn fragment(State(state): State<Arc<FixtureState>>) -> Response {
    record(&state, "/fragment", None);
    (
        StatusCode::OK,
        [
            ("x-head-seqnum", FRAGMENT_SEQ_HEAD.to_string()),
            ("x-sequence-num", FRAGMENT_SEQ_ID.to_string()),
        ],
        state.body.clone(),
    )
        .into_response()
}

async fn fragment_bare(State(state): State<Arc<FixtureState>>) -> Response {
    record(&state, "/fragment-bare", None);
    (StatusCode::OK, state.body.clone()).into_response()
}

async fn status_override(
    State(state): State<Arc<FixtureState>>,
    Path(code): Path<u16>,
) -> Response {
    record(&state, "/status", None);
    StatusCode::from_u16(code)
        .expect("fixture status code")
        .into_response()
}

async fn redirect(State(state): State<Arc<FixtureState>>, headers: HeaderMap) -> Response {
    record(&state, "/redirect", parse_range(&headers));
    (StatusCode::FOUND, [(header::LOCATION, "/media")], "").into_response()
}
