//! Networked streaming cache and prefetch engine.
//!
//! This crate sits between a media decoder and a remote HTTP origin serving
//! byte-range-addressable resources (progressive media files and small
//! live-stream fragments). Each remote resource is presented to the decoder
//! as a random-access byte stream while blocks are fetched over HTTP in the
//! background, cached in a bounded in-memory working set, and prefetched
//! ahead of the decoder's read cursor.
//!
//! The crate is composed of several modules:
//! - `cache`: sparse per-stream block cache with a cursor-aware eviction
//!   policy and coverage telemetry.
//! - `stream`: the handle to one remote resource (URL, length, cursor,
//!   status flags, cache).
//! - `scheduler`: a single worker multiplexing any number of streams,
//!   issuing one fetch per tick to the neediest stream.
//! - `reader`: a blocking `Read + Seek` facade for synchronous decoders,
//!   with interrupt and CPU-budget hooks.
//! - `fetch`: the thin `reqwest` glue shared by the scheduler.
//! - `settings`, `error`: tunables and the fetch-level error type.
//!
//! Thread model: the decoder drives a [`StreamReader`] from an ordinary OS
//! thread (it blocks in short polls), the [`PrefetchScheduler`] worker runs
//! as a tokio task, and additional threads may poll coverage telemetry.
//! Streams are shared as `Arc<RemoteStream>` between all three.

mod cache;
mod error;
mod fetch;
mod reader;
mod scheduler;
mod settings;
mod stream;

pub use crate::cache::BlockCache;
pub use crate::error::{FetchError, FetchResult};
pub use crate::reader::{CpuLimitHook, DecoderControl, StreamReader};
pub use crate::scheduler::PrefetchScheduler;
pub use crate::settings::{
    Settings, DEFAULT_BLOCK_SIZE, DEFAULT_MAX_CACHE_BLOCKS, DEFAULT_MAX_FORWARD_READ_BLOCKS,
};
pub use crate::stream::{FetchMode, RemoteStream};

pub use bytes::Bytes;
pub use reqwest::Client;
pub use url::Url;
