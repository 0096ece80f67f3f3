//! Thin HTTP glue over `reqwest`.
//!
//! The scheduler needs exactly one shape of request: a GET, optionally with
//! a `Range` header, whose entire body fits in memory (one block, or one
//! small live fragment). Redirects are followed by the client; the final URL
//! is surfaced so the stream can record it for subsequent fetches.
//!
//! A transport failure is an `Err`. Any HTTP response, success or not, is an
//! `Ok` carrying the status code — the scheduler refines sticky stream flags
//! from non-success statuses.

use bytes::Bytes;
use reqwest::header::{self, HeaderMap};
use reqwest::{Client, StatusCode};
use tracing::trace;
use url::Url;

use crate::error::{FetchError, FetchResult};

/// A fully-buffered HTTP response.
pub(crate) struct FetchResponse {
    pub status: StatusCode,
    /// URL after redirects; the origin the body actually came from.
    pub final_url: Url,
    headers: HeaderMap,
    pub body: Bytes,
}

impl FetchResponse {
    /// A response header as UTF-8, if present and decodable.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Total resource length from `Content-Range` (`bytes <s>-<e>/<total>`).
    ///
    /// Strict: the suffix after the last `/` must parse as a full decimal
    /// integer, so `*` and garbage totals are rejected.
    pub fn content_range_total(&self) -> Option<u64> {
        let value = self.header("Content-Range")?;
        let (_, total) = value.rsplit_once('/')?;
        total.parse().ok()
    }

    /// A live-fragment sequence header as a decimal integer.
    ///
    /// Absence, an empty value, or trailing non-digits all yield `None`.
    pub fn sequence_header(&self, name: &str) -> Option<i64> {
        self.header(name)?.parse().ok()
    }
}

/// Issues a GET for `url`, with `Range: bytes=<start>-<end>` when an
/// inclusive byte range is given, and buffers the whole body.
pub(crate) async fn http_get(
    client: &Client,
    url: Url,
    range: Option<(u64, u64)>,
) -> FetchResult<FetchResponse> {
    let mut request = client.get(url.clone());
    if let Some((start, end)) = range {
        request = request.header(header::RANGE, format!("bytes={start}-{end}"));
    }

    let response = request
        .send()
        .await
        .map_err(|e| FetchError::transport(&url, e))?;

    let status = response.status();
    let final_url = response.url().clone();
    let headers = response.headers().clone();
    let body = response
        .bytes()
        .await
        .map_err(|e| FetchError::transport(&url, e))?;

    trace!(url = %final_url, status = status.as_u16(), bytes = body.len(), "fetch complete");

    Ok(FetchResponse {
        status,
        final_url,
        headers,
        body,
    })
}
