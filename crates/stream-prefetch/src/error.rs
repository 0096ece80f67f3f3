//! Fetch-level error type.
//!
//! Errors surfaced here describe why a single fetch failed; the scheduler
//! maps them onto the sticky per-stream flags (`error`, `livestream_eof`,
//! `livestream_private`). Reader adapters never see these directly — they
//! observe the flags and convert them into EOF at their boundary.

use reqwest::StatusCode;
use url::Url;

/// Result type used by the fetch path.
pub type FetchResult<T> = Result<T, FetchError>;

/// Why a single HTTP fetch failed.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The HTTP call itself failed (connect, TLS, body read).
    #[error("transport failure for {url}: {source}")]
    Transport {
        /// URL that failed.
        url: String,
        /// The underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// The origin answered with a non-success status.
    #[error("HTTP status {status} for {url}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// URL that failed.
        url: String,
    },

    /// A header the engine depends on was absent or not a decimal integer.
    #[error("missing or malformed `{name}` header for {url}")]
    Header {
        /// Header name.
        name: &'static str,
        /// URL that produced the response.
        url: String,
    },

    /// A ranged response body did not match the requested window.
    #[error("range size discrepancy for {url}: expected {expected} bytes, got {actual}")]
    SizeDiscrepancy {
        /// URL that produced the response.
        url: String,
        /// Bytes requested via `Range`.
        expected: u64,
        /// Bytes actually received.
        actual: u64,
    },

    /// The scheduler was asked to fetch a stream with no block left to fetch.
    #[error("no block left to fetch for {url}")]
    ReadPastEnd {
        /// URL of the exhausted stream.
        url: String,
    },
}

impl FetchError {
    pub(crate) fn transport(url: &Url, source: reqwest::Error) -> Self {
        FetchError::Transport {
            url: url.to_string(),
            source,
        }
    }

    pub(crate) fn http(url: &Url, status: StatusCode) -> Self {
        FetchError::Http {
            status: status.as_u16(),
            url: url.to_string(),
        }
    }

    pub(crate) fn header(url: &Url, name: &'static str) -> Self {
        FetchError::Header {
            name,
            url: url.to_string(),
        }
    }

    pub(crate) fn size_discrepancy(url: &Url, expected: u64, actual: u64) -> Self {
        FetchError::SizeDiscrepancy {
            url: url.to_string(),
            expected,
            actual,
        }
    }

    pub(crate) fn read_past_end(url: &Url) -> Self {
        FetchError::ReadPastEnd {
            url: url.to_string(),
        }
    }

    /// HTTP status carried by this error, if any.
    ///
    /// The scheduler uses this to refine sticky flags (end-of-live,
    /// private-live) on top of the plain `error` flag.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}
