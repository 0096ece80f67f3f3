//! A handle to one remote resource.
//!
//! A [`RemoteStream`] is shared between three parties: the decoder's reader
//! thread (through a [`StreamReader`](crate::StreamReader)), the prefetch
//! worker, and any telemetry observers. All word-sized shared state lives in
//! atomics; the block map sits under a dedicated cache lock.
//!
//! Publication order matters in two places and is upheld by the helpers
//! here:
//! - `set_length` stores `len` and `block_count` before `set_ready`
//!   publishes `ready = true` with `Release`; a reader that observes
//!   `ready()` (`Acquire`) is guaranteed to see the final length.
//! - blocks are inserted under the cache lock, so a reader that sees a block
//!   via `is_data_available` sees its full contents on the next read.
//!
//! All error states are sticky: once `error` is set the scheduler performs
//! no further fetches for the stream, and readers drain into EOF.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use reqwest::Client;
use url::Url;

use crate::cache::BlockCache;
use crate::settings::Settings;

/// How a stream's bytes are fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// One block at a time via HTTP `Range` requests. The default for
    /// progressive media.
    Ranged,
    /// One plain GET loading the entire body at once. Used for small
    /// live-stream fragments that carry sequence headers.
    Whole,
}

/// One remote byte-range-addressable resource and its cached working set.
pub struct RemoteStream {
    settings: Settings,
    mode: FetchMode,
    /// Dedicated HTTP client, when the stream should not share the worker's
    /// connection pool.
    client: Option<Client>,

    /// Current effective URL; rewritten to the redirect target after each
    /// fetch so later fetches hit the already-resolved host.
    url: RwLock<Url>,

    cache: Mutex<BlockCache>,

    /// Byte offset the decoder will read next. Written by the reader,
    /// consulted by the scheduler for urgency and eviction.
    read_head: AtomicU64,

    len: AtomicU64,
    block_count: AtomicU64,
    ready: AtomicBool,

    error: AtomicBool,
    quit_request: AtomicBool,
    suspend_request: AtomicBool,
    livestream_eof: AtomicBool,
    livestream_private: AtomicBool,
    disable_interrupt: AtomicBool,

    // Live-fragment sequence numbers, parsed from response headers. -1 until
    // known (or unparseable).
    seq_head: AtomicI64,
    seq_id: AtomicI64,

    /// Human-readable tag set while a reader is blocked on this stream.
    waiting_status: Mutex<Option<&'static str>>,
}

impl RemoteStream {
    /// Creates a stream for `url` using the worker's shared HTTP client.
    pub fn new(url: Url, mode: FetchMode, settings: Settings) -> Self {
        let block_size = settings.block_size;
        let max_blocks = settings.max_cache_blocks;
        Self {
            settings,
            mode,
            client: None,
            url: RwLock::new(url),
            cache: Mutex::new(BlockCache::new(block_size, max_blocks)),
            read_head: AtomicU64::new(0),
            len: AtomicU64::new(0),
            block_count: AtomicU64::new(0),
            ready: AtomicBool::new(false),
            error: AtomicBool::new(false),
            quit_request: AtomicBool::new(false),
            suspend_request: AtomicBool::new(false),
            livestream_eof: AtomicBool::new(false),
            livestream_private: AtomicBool::new(false),
            disable_interrupt: AtomicBool::new(false),
            seq_head: AtomicI64::new(-1),
            seq_id: AtomicI64::new(-1),
            waiting_status: Mutex::new(None),
        }
    }

    /// Gives the stream its own HTTP client instead of the worker's pool.
    #[must_use]
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn mode(&self) -> FetchMode {
        self.mode
    }

    pub(crate) fn client(&self) -> Option<&Client> {
        self.client.as_ref()
    }

    /// Snapshot of the current effective URL.
    pub fn url(&self) -> Url {
        self.url.read().clone()
    }

    pub(crate) fn set_url(&self, url: Url) {
        *self.url.write() = url;
    }

    // ----------------------------
    // Length / readiness
    // ----------------------------

    /// Whether the resource length is known and reads may be satisfied.
    pub fn ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Total resource length in bytes. Meaningful only after [`ready`].
    ///
    /// [`ready`]: RemoteStream::ready
    pub fn len(&self) -> u64 {
        self.len.load(Ordering::Relaxed)
    }

    /// Number of blocks covering the resource. Meaningful only after
    /// [`ready`](RemoteStream::ready).
    pub fn block_count(&self) -> u64 {
        self.block_count.load(Ordering::Relaxed)
    }

    /// Records the resource length and derived block count.
    ///
    /// Must happen before [`set_ready`](RemoteStream::set_ready); the
    /// `Release` store there publishes both values.
    pub(crate) fn set_length(&self, len: u64) {
        let block_size = self.settings.block_size;
        self.len.store(len, Ordering::Relaxed);
        self.block_count
            .store(len.div_ceil(block_size), Ordering::Relaxed);
    }

    pub(crate) fn set_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    // ----------------------------
    // Cursor
    // ----------------------------

    /// The decoder's current read cursor in bytes.
    pub fn read_head(&self) -> u64 {
        self.read_head.load(Ordering::Relaxed)
    }

    /// Moves the read cursor. Called by the reader adapter on seeks.
    pub fn set_read_head(&self, pos: u64) {
        self.read_head.store(pos, Ordering::Relaxed);
    }

    pub(crate) fn advance_read_head(&self, n: u64) {
        self.read_head.fetch_add(n, Ordering::Relaxed);
    }

    // ----------------------------
    // Status flags
    // ----------------------------

    /// Whether the stream is dead. Sticky: set once, never cleared.
    pub fn has_error(&self) -> bool {
        self.error.load(Ordering::Relaxed)
    }

    pub(crate) fn set_error(&self) {
        self.error.store(true, Ordering::Relaxed);
    }

    /// Asks the scheduler to drop this stream on its next tick.
    pub fn request_quit(&self) {
        self.quit_request.store(true, Ordering::Relaxed);
    }

    pub fn quit_requested(&self) -> bool {
        self.quit_request.load(Ordering::Relaxed)
    }

    /// Pauses or resumes scheduling for this stream.
    pub fn request_suspend(&self, suspend: bool) {
        self.suspend_request.store(suspend, Ordering::Relaxed);
    }

    pub fn suspended(&self) -> bool {
        self.suspend_request.load(Ordering::Relaxed)
    }

    /// The live broadcast has ended (HTTP 204/404 on a live fetch).
    pub fn livestream_eof(&self) -> bool {
        self.livestream_eof.load(Ordering::Relaxed)
    }

    pub(crate) fn set_livestream_eof(&self) {
        self.livestream_eof.store(true, Ordering::Relaxed);
    }

    /// The ended live resource is not reachable (HTTP 403 on a live fetch).
    pub fn livestream_private(&self) -> bool {
        self.livestream_private.load(Ordering::Relaxed)
    }

    pub(crate) fn set_livestream_private(&self) {
        self.livestream_private.store(true, Ordering::Relaxed);
    }

    /// Makes readers ignore decoder interrupts while blocked on this stream.
    pub fn set_disable_interrupt(&self, disable: bool) {
        self.disable_interrupt.store(disable, Ordering::Relaxed);
    }

    pub fn interrupt_disabled(&self) -> bool {
        self.disable_interrupt.load(Ordering::Relaxed)
    }

    // ----------------------------
    // Live-fragment sequence numbers
    // ----------------------------

    /// Newest fragment sequence number the origin advertised, -1 if unknown.
    pub fn seq_head(&self) -> i64 {
        self.seq_head.load(Ordering::Relaxed)
    }

    /// Sequence number of this fragment, -1 if unknown.
    pub fn seq_id(&self) -> i64 {
        self.seq_id.load(Ordering::Relaxed)
    }

    pub(crate) fn set_sequence(&self, seq_head: i64, seq_id: i64) {
        self.seq_head.store(seq_head, Ordering::Relaxed);
        self.seq_id.store(seq_id, Ordering::Relaxed);
    }

    // ----------------------------
    // Waiting-status telemetry
    // ----------------------------

    /// Tag describing what a blocked reader is waiting for, for UI display.
    pub fn waiting_status(&self) -> Option<&'static str> {
        *self.waiting_status.lock()
    }

    pub(crate) fn set_waiting_status(&self, status: Option<&'static str>) {
        *self.waiting_status.lock() = status;
    }

    // ----------------------------
    // Cache access
    // ----------------------------

    /// Whether every block intersecting `[start, start + size)` is cached.
    ///
    /// `false` until the stream is ready or when the range extends past the
    /// end of the resource.
    pub fn is_data_available(&self, start: u64, size: u64) -> bool {
        if !self.ready() {
            return false;
        }
        if start + size > self.len() {
            return false;
        }
        self.cache.lock().has_range(start, size)
    }

    /// Copies out exactly `size` cached bytes starting at `start`.
    ///
    /// Callers must have checked [`is_data_available`] first.
    ///
    /// [`is_data_available`]: RemoteStream::is_data_available
    pub fn read_data(&self, start: u64, size: u64) -> Bytes {
        self.cache.lock().read(start, size)
    }

    /// Stores a fetched block, evicting around the current read cursor if
    /// the residency bound is exceeded.
    pub(crate) fn insert_block(&self, block: u64, data: Bytes) {
        let cursor_block = self.read_head() / self.settings.block_size;
        self.cache.lock().insert(block, data, cursor_block);
    }

    /// Smallest non-resident block index in `[from, end)`, or `end`.
    pub(crate) fn next_missing_block(&self, from: u64, end: u64) -> u64 {
        self.cache.lock().next_missing(from, end)
    }

    /// Percentage of the resource currently cached. 0 until ready.
    pub fn coverage_percent(&self) -> f64 {
        if !self.ready() {
            return 0.0;
        }
        self.cache.lock().coverage_percent(self.len())
    }

    /// Per-bin cached percentages over `bins` equal byte ranges, for a
    /// buffering progress bar. All zeros until ready.
    pub fn coverage_histogram(&self, bins: usize) -> Vec<f64> {
        if !self.ready() {
            return vec![0.0; bins];
        }
        self.cache.lock().coverage_histogram(bins, self.len())
    }
}
