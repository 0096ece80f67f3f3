//! Blocking reader adapter for synchronous decoders.
//!
//! A [`StreamReader`] turns a [`RemoteStream`] into an ordinary
//! `Read + Seek` source. Reads block in short polls until the prefetch
//! worker has cached the requested range; seeks block until the resource
//! length is known. Call it from a plain OS thread, never from inside the
//! async runtime that drives the scheduler.
//!
//! Exit semantics at the `Read` boundary:
//! - end of resource, a decoder interrupt, and a dead stream (`error` or
//!   `quit_request`) all surface as EOF (`Ok(0)`); the decoder inspects the
//!   stream's flags when it needs the distinction.
//! - a decoder interrupt additionally sets `need_reinit` on the
//!   [`DecoderControl`] so the owner knows to rebuild its pipeline.
//!
//! While a read is starved the reader takes a +25 CPU budget boost through
//! the optional [`CpuLimitHook`], biasing the platform scheduler toward the
//! downloader. The boost is held by an RAII guard, so every exit path
//! releases exactly what it took.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, trace};

use crate::stream::RemoteStream;

/// Poll interval while waiting for data or readiness.
const READ_POLL: Duration = Duration::from_millis(20);
/// Grace sleep before reporting EOF on a dead stream, so a spinning decoder
/// does not busy-loop against a stuck error state.
const DEAD_STREAM_GRACE: Duration = Duration::from_millis(100);
/// CPU budget points taken while a read is starved.
const CPU_BOOST: u32 = 25;

const WAITING_READ: &str = "Reading stream";
const WAITING_SEEK: &str = "Reading stream (init, seek)";

/// External CPU-quota collaborator.
///
/// `add` and `remove` must be symmetric; the reader guarantees every `add`
/// it performs is matched by a `remove` on all exit paths.
pub trait CpuLimitHook: Send + Sync {
    /// Raise the CPU budget by `amount` points.
    fn add(&self, amount: u32);
    /// Give back `amount` points taken earlier.
    fn remove(&self, amount: u32);
}

/// Interrupt channel between the owning decoder and its readers.
#[derive(Debug, Default)]
pub struct DecoderControl {
    interrupt: AtomicBool,
    need_reinit: AtomicBool,
}

impl DecoderControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks blocked readers to bail out with EOF.
    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::Relaxed);
    }

    pub fn clear_interrupt(&self) {
        self.interrupt.store(false, Ordering::Relaxed);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt.load(Ordering::Relaxed)
    }

    /// Whether an interrupted read told the decoder to rebuild itself.
    pub fn needs_reinit(&self) -> bool {
        self.need_reinit.load(Ordering::Relaxed)
    }

    pub fn clear_reinit(&self) {
        self.need_reinit.store(false, Ordering::Relaxed);
    }

    fn set_need_reinit(&self) {
        self.need_reinit.store(true, Ordering::Relaxed);
    }
}

/// Releases the CPU boost when dropped.
struct CpuBoostGuard<'a> {
    hook: &'a dyn CpuLimitHook,
}

impl<'a> CpuBoostGuard<'a> {
    fn new(hook: &'a dyn CpuLimitHook) -> Self {
        hook.add(CPU_BOOST);
        Self { hook }
    }
}

impl Drop for CpuBoostGuard<'_> {
    fn drop(&mut self) {
        self.hook.remove(CPU_BOOST);
    }
}

/// Synchronous `Read + Seek` facade over one [`RemoteStream`].
///
/// At most one reader should drive a given stream at a time; the read
/// cursor lives on the stream itself.
pub struct StreamReader {
    stream: Arc<RemoteStream>,
    control: Arc<DecoderControl>,
    cpu_limit: Option<Arc<dyn CpuLimitHook>>,
}

impl StreamReader {
    pub fn new(stream: Arc<RemoteStream>, control: Arc<DecoderControl>) -> Self {
        Self {
            stream,
            control,
            cpu_limit: None,
        }
    }

    /// Attaches the CPU-quota collaborator consulted during starved reads.
    #[must_use]
    pub fn with_cpu_limit(mut self, hook: Arc<dyn CpuLimitHook>) -> Self {
        self.cpu_limit = Some(hook);
        self
    }

    /// The stream this reader drives.
    pub fn stream(&self) -> &Arc<RemoteStream> {
        &self.stream
    }

    /// Total resource length, blocking until it is known.
    ///
    /// The decoder-facing equivalent of a size query; fails like a seek when
    /// the stream dies first.
    pub fn size(&mut self) -> io::Result<u64> {
        self.wait_ready()?;
        Ok(self.stream.len())
    }

    /// Blocks until the stream is ready, in seek-style short polls.
    fn wait_ready(&self) -> io::Result<()> {
        while !self.stream.ready() {
            self.stream.set_waiting_status(Some(WAITING_SEEK));
            thread::sleep(READ_POLL);
            if self.stream.has_error() || self.stream.quit_requested() {
                self.stream.set_waiting_status(None);
                return Err(io::Error::other("stream died before its length was known"));
            }
        }
        self.stream.set_waiting_status(None);
        Ok(())
    }
}

impl Read for StreamReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let stream = &self.stream;
        let mut boost: Option<CpuBoostGuard<'_>> = None;

        let (pos, wanted) = loop {
            if stream.ready() {
                let len = stream.len();
                let pos = stream.read_head();
                if pos >= len {
                    trace!(pos, len, "read at end of stream");
                    stream.set_waiting_status(None);
                    return Ok(0);
                }
                let wanted = (buf.len() as u64).min(len - pos);
                if stream.is_data_available(pos, wanted) {
                    break (pos, wanted);
                }
            }

            if !stream.interrupt_disabled() && self.control.is_interrupted() {
                debug!("read interrupted by decoder");
                self.control.set_need_reinit();
                stream.set_waiting_status(None);
                return Ok(0);
            }

            stream.set_waiting_status(Some(WAITING_READ));
            if boost.is_none() {
                boost = self.cpu_limit.as_deref().map(CpuBoostGuard::new);
            }
            thread::sleep(READ_POLL);

            if stream.has_error() || stream.quit_requested() {
                debug!(
                    error = stream.has_error(),
                    quit = stream.quit_requested(),
                    "read on dead stream"
                );
                thread::sleep(DEAD_STREAM_GRACE);
                stream.set_waiting_status(None);
                return Ok(0);
            }
        };

        stream.set_waiting_status(None);
        drop(boost);

        let data = stream.read_data(pos, wanted);
        buf[..data.len()].copy_from_slice(&data);
        stream.advance_read_head(data.len() as u64);
        Ok(data.len())
    }
}

impl Seek for StreamReader {
    /// Moves the read cursor once the resource length is known.
    ///
    /// Targets beyond the end of the resource are rejected. Seeking never
    /// drops cached blocks; a later read may still hit prefetched data.
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.wait_ready()?;
        let len = self.stream.len();
        let target = match pos {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::Current(delta) => i128::from(self.stream.read_head()) + i128::from(delta),
            SeekFrom::End(delta) => i128::from(len) + i128::from(delta),
        };
        if target < 0 || target > i128::from(len) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("seek target {target} outside stream of {len} bytes"),
            ));
        }
        let target = target as u64;
        self.stream.set_read_head(target);
        Ok(target)
    }
}
