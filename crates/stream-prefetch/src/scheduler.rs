//! Multi-stream prefetch scheduler.
//!
//! One worker serves every stream. Each tick it reaps streams flagged for
//! quit, selects at most one stream to advance, performs exactly one HTTP
//! fetch for it, and writes the result back into the stream's cache and
//! flags. With nothing to do it sleeps briefly and re-polls.
//!
//! Selection:
//! - streams with `error` or `suspend_request` set are skipped, as are
//!   whole-download streams that are already loaded;
//! - a stream whose length is still unknown is initialization-urgent and is
//!   picked immediately, in slot order;
//! - otherwise the eligible stream whose next needed block sits closest to
//!   its read cursor (smallest margin as a percentage of the resource) wins,
//!   ties broken by slot order. A stream whose forward window is fully
//!   cached needs no fetch.
//!
//! The slot lock is held only while reaping and selecting; it is released
//! before any HTTP work so reader threads stay live. Fetch failures are
//! terminal per stream: the `error` flag is sticky and excludes the stream
//! from all future ticks.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{FetchError, FetchResult};
use crate::fetch::http_get;
use crate::stream::{FetchMode, RemoteStream};

/// Sleep between polls when no stream needs a fetch.
const IDLE_POLL: Duration = Duration::from_millis(20);

/// Owns the set of streams and the download worker that feeds them.
pub struct PrefetchScheduler {
    /// Slot array; freed positions are reused without shifting so slot order
    /// stays a stable tie-break.
    streams: Mutex<Vec<Option<Arc<RemoteStream>>>>,
    client: Client,
    shutdown: CancellationToken,
}

impl Default for PrefetchScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl PrefetchScheduler {
    /// Creates a scheduler with its own shared HTTP client.
    pub fn new() -> Self {
        Self::with_client(Client::new())
    }

    /// Creates a scheduler fetching through `client`.
    pub fn with_client(client: Client) -> Self {
        Self {
            streams: Mutex::new(Vec::new()),
            client,
            shutdown: CancellationToken::new(),
        }
    }

    /// Hands a stream to the scheduler. The scheduler drops its reference
    /// once the stream requests quit; readers keep their own `Arc`.
    pub fn add_stream(&self, stream: Arc<RemoteStream>) {
        let mut slots = self.streams.lock();
        if let Some(slot) = slots.iter_mut().find(|slot| slot.is_none()) {
            *slot = Some(stream);
        } else {
            slots.push(Some(stream));
        }
    }

    /// Number of streams currently held.
    pub fn stream_count(&self) -> usize {
        self.streams.lock().iter().flatten().count()
    }

    /// Asks the worker to exit. Remaining streams get `quit_request` set so
    /// blocked readers drain into EOF.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// The download worker. Runs until [`shutdown`](PrefetchScheduler::shutdown).
    pub async fn run(self: Arc<Self>) {
        debug!("prefetch worker started");
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            let Some(stream) = self.next_stream() else {
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(IDLE_POLL) => {}
                }
                continue;
            };
            self.service(&stream).await;
        }

        // Flag survivors so readers and owners observe the shutdown.
        let slots = self.streams.lock();
        for stream in slots.iter().flatten() {
            stream.request_quit();
        }
        debug!("prefetch worker exited");
    }

    /// Reaps quit-flagged streams and picks the next one to service.
    fn next_stream(&self) -> Option<Arc<RemoteStream>> {
        let mut slots = self.streams.lock();
        for slot in slots.iter_mut() {
            if slot.as_ref().is_some_and(|s| s.quit_requested()) {
                trace!("dropping quit-requested stream");
                *slot = None;
            }
        }
        let index = select_candidate(&slots)?;
        slots[index].clone()
    }

    /// Performs one fetch for `stream` and maps failures onto its sticky
    /// flags.
    async fn service(&self, stream: &RemoteStream) {
        let result = match stream.mode() {
            FetchMode::Whole => self.fetch_whole(stream).await,
            FetchMode::Ranged => self.fetch_ranged(stream).await,
        };
        if let Err(err) = result {
            if stream.mode() == FetchMode::Whole {
                // Origins answer 204/404 for reads beyond the end of a live
                // broadcast, and 403 for an ended broadcast without archive.
                match err.status() {
                    Some(204) | Some(404) => stream.set_livestream_eof(),
                    Some(403) => stream.set_livestream_private(),
                    _ => {}
                }
            }
            warn!(url = %stream.url(), error = %err, "fetch failed, stream marked dead");
            stream.set_error();
        }
    }

    /// Fetches the next needed block of a ranged stream.
    async fn fetch_ranged(&self, stream: &RemoteStream) -> FetchResult<()> {
        let block_size = stream.settings().block_size;
        let ready = stream.ready();
        let mut block = stream.read_head() / block_size;
        if ready {
            block = stream.next_missing_block(block, stream.block_count());
            if block >= stream.block_count() {
                // Selection raced with a reader seek; nothing left ahead.
                return Err(FetchError::read_past_end(&stream.url()));
            }
        }

        let start = block * block_size;
        let end = if ready {
            ((block + 1) * block_size).min(stream.len())
        } else {
            // Length still unknown; ask for a full block and learn the
            // length from Content-Range. The origin may answer short.
            (block + 1) * block_size
        };

        let url = stream.url();
        trace!(url = %url, block, start, end, "fetching block");
        let client = stream.client().unwrap_or(&self.client);
        let response = http_get(client, url, Some((start, end - 1))).await?;
        stream.set_url(response.final_url.clone());

        if !response.status.is_success() {
            return Err(FetchError::http(&response.final_url, response.status));
        }

        if !ready {
            let total = response
                .content_range_total()
                .ok_or_else(|| FetchError::header(&response.final_url, "Content-Range"))?;
            stream.set_length(total);
            debug!(url = %response.final_url, len = total, "stream length known");
        } else if response.body.len() as u64 != end - start {
            return Err(FetchError::size_discrepancy(
                &response.final_url,
                end - start,
                response.body.len() as u64,
            ));
        }

        stream.insert_block(block, response.body);
        stream.set_ready();
        Ok(())
    }

    /// Fetches a whole-download stream in one GET and loads every block.
    async fn fetch_whole(&self, stream: &RemoteStream) -> FetchResult<()> {
        let url = stream.url();
        debug!(url = %url, "fetching whole resource");
        let client = stream.client().unwrap_or(&self.client);
        let response = http_get(client, url, None).await?;
        stream.set_url(response.final_url.clone());

        if !response.status.is_success() || response.body.is_empty() {
            return Err(FetchError::http(&response.final_url, response.status));
        }

        // Live fragments carry their position within the broadcast as
        // headers; a fragment without them is unusable.
        let seq_head = response.sequence_header("x-head-seqnum");
        let seq_id = response.sequence_header("x-sequence-num");
        stream.set_sequence(seq_head.unwrap_or(-1), seq_id.unwrap_or(-1));
        if seq_head.is_none() {
            return Err(FetchError::header(&response.final_url, "x-head-seqnum"));
        }
        if seq_id.is_none() {
            return Err(FetchError::header(&response.final_url, "x-sequence-num"));
        }

        let body = response.body;
        stream.set_length(body.len() as u64);
        let block_size = stream.settings().block_size as usize;
        let mut offset = 0;
        let mut block = 0u64;
        while offset < body.len() {
            let end = (offset + block_size).min(body.len());
            stream.insert_block(block, body.slice(offset..end));
            offset = end;
            block += 1;
        }
        stream.set_ready();
        debug!(len = body.len(), seq_head = stream.seq_head(), seq_id = stream.seq_id(),
            "whole resource loaded");
        Ok(())
    }
}

/// Picks the slot of the neediest stream, if any needs a fetch.
fn select_candidate(slots: &[Option<Arc<RemoteStream>>]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (index, slot) in slots.iter().enumerate() {
        let Some(stream) = slot else { continue };
        if stream.has_error() || stream.suspended() {
            continue;
        }
        if !stream.ready() {
            // Initialization-urgent: nothing is known about this stream yet.
            return Some(index);
        }
        if stream.mode() == FetchMode::Whole {
            // Loaded in full by its first successful fetch.
            continue;
        }

        let settings = stream.settings();
        let block_size = settings.block_size;
        let read_head = stream.read_head();
        let cursor_block = read_head / block_size;
        let window_end = cursor_block + settings.max_forward_read_blocks;
        let scan_end = window_end.min(stream.block_count());
        let next_needed = stream.next_missing_block(cursor_block, scan_end);
        if next_needed >= scan_end {
            // Either everything ahead is cached or the look-ahead window is
            // full; nothing urgent here.
            continue;
        }

        let margin_percent = if next_needed == cursor_block {
            0.0
        } else {
            (next_needed * block_size - read_head) as f64 * 100.0 / stream.len() as f64
        };
        match best {
            Some((_, best_margin)) if best_margin <= margin_percent => {}
            _ => best = Some((index, margin_percent)),
        }
    }
    best.map(|(index, _)| index)
}
