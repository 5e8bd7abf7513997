//! High-throughput stream copying.
//!
//! A pooled reader thread fills a small ring of buffers from the source while
//! the calling thread drains them into the sink. One mutex guards the ring
//! bookkeeping and one condition variable carries both the "slot filled" and
//! the "slot freed" signals: only one side can be waiting on a given
//! transition at a time.
//!
//! Buffers move out of their slot while one side works on them and back in
//! when it is done, so a buffer always has exactly one owner. Rings of
//! buffers are checked out of a bounded pool per copy and checked back in
//! afterwards.

use std::io::{self, Read, Write};
use std::mem;
use std::sync::{Arc, OnceLock};

use parking_lot::{Condvar, Mutex};
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, trace};

use crate::archive::{ArchiveSink, ArchiveSource};

/// Number of ring slots. Four absorbs oscillating bandwidth, e.g. on network shares.
pub const DEFAULT_SLOTS: usize = 4;
pub const MIN_SLOTS: usize = 2;
pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;
pub const DEFAULT_READER_THREADS: usize = 2;
pub const DEFAULT_MAX_IDLE_RINGS: usize = 8;

/// Tuning knobs for [`StreamCopier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyConfig {
    /// Buffers in the ring, at least [`MIN_SLOTS`].
    pub slots: usize,
    /// Size of each buffer in bytes.
    pub buffer_size: usize,
    /// Threads in the reader pool. Copies beyond this many queue up.
    pub reader_threads: usize,
    /// Idle rings kept for reuse.
    pub max_idle_rings: usize,
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            slots: DEFAULT_SLOTS,
            buffer_size: DEFAULT_BUFFER_SIZE,
            reader_threads: DEFAULT_READER_THREADS,
            max_idle_rings: DEFAULT_MAX_IDLE_RINGS,
        }
    }
}

impl CopyConfig {
    fn validate(&self) -> io::Result<()> {
        let invalid = |msg: String| Err(io::Error::new(io::ErrorKind::InvalidInput, msg));
        if self.slots < MIN_SLOTS {
            return invalid(format!("Copy ring needs at least {MIN_SLOTS} slots, got {}", self.slots));
        }
        if self.buffer_size == 0 {
            return invalid("Copy buffer size must be positive".to_string());
        }
        if self.reader_threads == 0 {
            return invalid("Copy reader pool needs at least one thread".to_string());
        }
        Ok(())
    }
}

/// Bounded free-list of buffer rings.
#[derive(Debug)]
struct BufferPool {
    idle: Mutex<Vec<Vec<Box<[u8]>>>>,
    slots: usize,
    buffer_size: usize,
    max_idle: usize,
}

impl BufferPool {
    fn check_out(&self) -> Vec<Box<[u8]>> {
        if let Some(ring) = self.idle.lock().pop() {
            return ring;
        }
        (0..self.slots)
            .map(|_| vec![0u8; self.buffer_size].into_boxed_slice())
            .collect()
    }

    fn check_in(&self, ring: Vec<Box<[u8]>>) {
        // A ring missing a buffer comes from a reader that panicked mid-read.
        let intact = ring.len() == self.slots && ring.iter().all(|b| b.len() == self.buffer_size);
        if !intact {
            return;
        }
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(ring);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fill {
    Empty,
    Data(usize),
    /// End of input, or the reader failed.
    End,
}

struct Ring {
    buffers: Vec<Box<[u8]>>,
    fills: Vec<Fill>,
    /// Next slot to drain.
    off: usize,
    /// Filled slots waiting to be drained.
    size: usize,
    cancelled: bool,
    reader_done: bool,
    error: Option<io::Error>,
}

impl Ring {
    fn slots(&self) -> usize {
        self.buffers.len()
    }
}

struct Shared {
    ring: Mutex<Ring>,
    signal: Condvar,
}

/// Marks the reader finished however it exits.
struct ReaderDone<'a>(&'a Shared);

impl Drop for ReaderDone<'_> {
    fn drop(&mut self) {
        self.0.ring.lock().reader_done = true;
        self.0.signal.notify_all();
    }
}

/// Stops the reader however the writer exits.
struct CancelReader<'a>(&'a Shared);

impl Drop for CancelReader<'_> {
    fn drop(&mut self) {
        self.0.ring.lock().cancelled = true;
        self.0.signal.notify_all();
    }
}

/// Copies streams through a ring of pooled buffers, reading on a pooled
/// background thread and writing on the caller's thread.
///
/// Clones share the reader pool and the buffer pool.
#[derive(Clone)]
pub struct StreamCopier {
    config: CopyConfig,
    pool: Arc<BufferPool>,
    readers: Arc<ThreadPool>,
}

impl std::fmt::Debug for StreamCopier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamCopier")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl StreamCopier {
    pub fn new(config: CopyConfig) -> io::Result<Self> {
        config.validate()?;
        let readers = ThreadPoolBuilder::new()
            .num_threads(config.reader_threads)
            .thread_name(|i| format!("archive-delta-reader-{i}"))
            .build()
            .map_err(io::Error::other)?;
        Ok(Self {
            config,
            pool: Arc::new(BufferPool {
                idle: Mutex::new(Vec::new()),
                slots: config.slots,
                buffer_size: config.buffer_size,
                max_idle: config.max_idle_rings,
            }),
            readers: Arc::new(readers),
        })
    }

    pub fn with_defaults() -> io::Result<Self> {
        Self::new(CopyConfig::default())
    }

    /// Process-wide copier with the default configuration, built on first
    /// use. Every caller shares its reader threads and idle rings.
    pub fn shared() -> io::Result<Self> {
        static SHARED: OnceLock<StreamCopier> = OnceLock::new();
        if let Some(copier) = SHARED.get() {
            return Ok(copier.clone());
        }
        let copier = Self::with_defaults()?;
        Ok(SHARED.get_or_init(|| copier).clone())
    }

    pub fn config(&self) -> CopyConfig {
        self.config
    }

    /// Rings currently parked in the buffer pool.
    pub fn idle_rings(&self) -> usize {
        self.pool.idle.lock().len()
    }

    /// Copies everything from `source` to `sink` and returns the byte count.
    ///
    /// Neither stream is closed. The sink is flushed once after the last
    /// successful write, even if reading failed, but not after a failed
    /// write. A read error is returned after the bytes read before it have
    /// been written. A write error stops the reader before this returns.
    pub fn copy<R, W>(&self, source: &mut R, sink: &mut W) -> io::Result<u64>
    where
        R: Read + Send + ?Sized,
        W: Write + ?Sized,
    {
        let buffers = self.pool.check_out();
        let slots = buffers.len();
        let shared = Shared {
            ring: Mutex::new(Ring {
                buffers,
                fills: vec![Fill::Empty; slots],
                off: 0,
                size: 0,
                cancelled: false,
                reader_done: false,
                error: None,
            }),
            signal: Condvar::new(),
        };

        // The scope joins the reader before returning, so no reader outlives
        // this call and the ring can go back to the pool.
        let result = self.readers.in_place_scope(|scope| {
            let shared = &shared;
            scope.spawn(move |_| read_loop(shared, source));
            write_loop(shared, sink)
        });

        self.pool.check_in(shared.ring.into_inner().buffers);
        result
    }
}

fn read_once<R: Read + ?Sized>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match source.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            result => return result,
        }
    }
}

fn read_loop<R: Read + ?Sized>(shared: &Shared, source: &mut R) {
    let _done = ReaderDone(shared);
    loop {
        let (index, mut buffer) = {
            let mut ring = shared.ring.lock();
            while ring.size >= ring.slots() && !ring.cancelled {
                shared.signal.wait(&mut ring);
            }
            if ring.cancelled {
                trace!("copy reader cancelled");
                return;
            }
            let index = (ring.off + ring.size) % ring.slots();
            (index, mem::take(&mut ring.buffers[index]))
        };

        // One read per cycle. Short reads are fine.
        let (fill, error) = match read_once(source, &mut buffer) {
            Ok(0) => (Fill::End, None),
            Ok(n) => (Fill::Data(n), None),
            Err(e) => (Fill::End, Some(e)),
        };

        let mut ring = shared.ring.lock();
        ring.buffers[index] = buffer;
        ring.fills[index] = fill;
        if error.is_some() {
            ring.error = error;
        }
        ring.size += 1;
        shared.signal.notify_one();
        if fill == Fill::End || ring.cancelled {
            return;
        }
    }
}

fn write_loop<W: Write + ?Sized>(shared: &Shared, sink: &mut W) -> io::Result<u64> {
    let _cancel = CancelReader(shared);
    let mut total = 0u64;
    loop {
        let (index, buffer, len) = {
            let mut ring = shared.ring.lock();
            while ring.size == 0 && !ring.reader_done {
                shared.signal.wait(&mut ring);
            }
            if ring.size == 0 {
                // The reader died without an end marker; the scope re-raises its panic.
                break;
            }
            let index = ring.off;
            match ring.fills[index] {
                Fill::Data(len) => (index, mem::take(&mut ring.buffers[index]), len),
                Fill::End | Fill::Empty => break,
            }
        };

        if let Err(e) = sink.write_all(&buffer[..len]) {
            shared.ring.lock().buffers[index] = buffer;
            debug!(error = %e, "copy write failed, cancelling reader");
            return Err(e);
        }
        total += len as u64;

        let mut ring = shared.ring.lock();
        ring.buffers[index] = buffer;
        ring.fills[index] = Fill::Empty;
        ring.off = (index + 1) % ring.slots();
        ring.size -= 1;
        shared.signal.notify_one();
    }

    sink.flush()?;
    // Release the lock before `_cancel` takes it again on drop.
    let error = shared.ring.lock().error.take();
    match error {
        Some(e) => Err(e),
        None => Ok(total),
    }
}

/// Copies every entry of `source` into `sink`, in source order, then
/// finishes the sink. Directory entries are recreated without content.
pub fn copy_archive(
    copier: &StreamCopier,
    source: &dyn ArchiveSource,
    sink: &mut dyn ArchiveSink,
) -> io::Result<usize> {
    let mut copied = 0;
    for entry in source.entries()? {
        let mut writer = sink.create(&entry.name)?;
        if !entry.directory {
            let mut reader = source.reader(&entry)?;
            copier.copy(&mut reader, &mut writer)?;
        }
        writer.commit()?;
        copied += 1;
    }
    sink.finish()?;
    Ok(copied)
}
