//! Log segments
//!
//! A segment is one fixed-capacity file in a log. Records are appended at the
//! write cursor and never rewritten by this crate. Readers take a
//! [`SegmentView`], a counted claim on the segment's file; the count tells a
//! reclaim process when the file is safe to repurpose.
//!
//! Segments of a multi-segment log start with a header:
//! ```text
//! +---------+----------+--------+
//! | Version | Capacity | CRC    |
//! | 2B      | 8B       | 8B     |
//! +---------+----------+--------+
//! ```
//! The CRC is CRC32C over version and capacity. Single-segment logs have no
//! header and records start at byte 0.

use crate::offset::LogSegmentName;
use bytes::{Buf, BufMut, BytesMut};
use parking_lot::{MappedRwLockReadGuard, Mutex, RwLock, RwLockReadGuard};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use stowage_common::{Error, Result};
use tracing::{debug, error};

/// Current segment header version
const HEADER_VERSION: i16 = 1;

/// Size of the segment header in bytes
pub const SEGMENT_HEADER_SIZE: u64 = 18;

/// Chunk size used when copying from a source into the segment file
const APPEND_CHUNK_SIZE: usize = 64 * 1024;

/// Header stored at the beginning of each segment of a multi-segment log
#[derive(Clone, Debug, PartialEq, Eq)]
struct SegmentHeader {
    version: i16,
    capacity: u64,
}

impl SegmentHeader {
    /// Offset of the CRC field (version + capacity = 2 + 8 = 10)
    const CRC_OFFSET: usize = 10;

    const fn new(capacity: u64) -> Self {
        Self {
            version: HEADER_VERSION,
            capacity,
        }
    }

    fn to_bytes(&self) -> Result<BytesMut> {
        let mut buf = BytesMut::with_capacity(SEGMENT_HEADER_SIZE as usize);
        buf.put_i16(self.version);
        buf.put_i64(i64::try_from(self.capacity).map_err(|_| {
            Error::invalid_argument(format!("segment capacity {} too large", self.capacity))
        })?);
        let crc = crc32c::crc32c(&buf[..Self::CRC_OFFSET]);
        buf.put_i64(i64::from(crc));
        Ok(buf)
    }

    fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < SEGMENT_HEADER_SIZE as usize {
            return Err(Error::deserialization("segment header too small"));
        }

        let mut buf = data;
        let version = buf.get_i16();
        if version != HEADER_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        let capacity = buf.get_i64();
        let stored_crc = buf.get_i64();

        let computed_crc = i64::from(crc32c::crc32c(&data[..Self::CRC_OFFSET]));
        if computed_crc != stored_crc {
            return Err(Error::deserialization("segment header CRC mismatch"));
        }

        let capacity = u64::try_from(capacity)
            .map_err(|_| Error::deserialization(format!("negative segment capacity {capacity}")))?;
        Ok(Self { version, capacity })
    }
}

/// One file-backed append region of a log
pub struct LogSegment {
    /// Name, unique within the log
    name: LogSegmentName,
    /// Backing file path
    path: PathBuf,
    /// Backing file, `None` once closed
    file: RwLock<Option<File>>,
    /// Total size the segment may grow to
    capacity: u64,
    /// First byte usable for records
    start_offset: u64,
    /// Durable end of written records (the write cursor)
    end_offset: AtomicU64,
    /// Outstanding views
    ref_count: AtomicU64,
    /// Set once the log closes the segment
    closed: AtomicBool,
    /// Serializes appends
    append_lock: Mutex<()>,
}

impl LogSegment {
    /// Create a new, empty segment file in `dir`
    pub fn create(dir: impl AsRef<Path>, name: LogSegmentName, capacity: u64) -> Result<Self> {
        let path = dir.as_ref().join(name.to_string());
        let start_offset = if name.is_single() {
            0
        } else {
            SEGMENT_HEADER_SIZE
        };
        if capacity <= start_offset {
            return Err(Error::invalid_argument(format!(
                "segment capacity {capacity} leaves no room for records"
            )));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;

        if !name.is_single() {
            let header = SegmentHeader::new(capacity).to_bytes()?;
            file.write_all_at(&header, 0)?;
            file.sync_all()?;
        }

        debug!("Created log segment {} at {:?}", name, path);
        Ok(Self::from_parts(name, path, file, capacity, start_offset, start_offset))
    }

    /// Open an existing segment file
    ///
    /// The durable end is the file length since records are appended
    /// contiguously and the file is never preallocated.
    pub fn open(path: impl AsRef<Path>, capacity: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::invalid_argument(format!("bad segment path {path:?}")))?;
        let name = LogSegmentName::from_string(file_name)?;

        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let file_len = file.metadata()?.len();

        let start_offset = if name.is_single() {
            0
        } else {
            let mut buf = [0u8; SEGMENT_HEADER_SIZE as usize];
            file.read_exact_at(&mut buf, 0).map_err(|e| {
                if e.kind() == ErrorKind::UnexpectedEof {
                    Error::deserialization(format!("segment {name} is missing its header"))
                } else {
                    Error::Io(e)
                }
            })?;
            let header = SegmentHeader::from_bytes(&buf)?;
            if header.capacity != capacity {
                return Err(Error::configuration(format!(
                    "segment {} was created with capacity {}, log expects {}",
                    name, header.capacity, capacity
                )));
            }
            SEGMENT_HEADER_SIZE
        };

        if file_len > capacity {
            return Err(Error::deserialization(format!(
                "segment {name} holds {file_len} bytes, more than its capacity {capacity}"
            )));
        }

        debug!("Opened log segment {} ({} bytes used)", name, file_len);
        Ok(Self::from_parts(name, path, file, capacity, start_offset, file_len))
    }

    fn from_parts(
        name: LogSegmentName,
        path: PathBuf,
        file: File,
        capacity: u64,
        start_offset: u64,
        end_offset: u64,
    ) -> Self {
        Self {
            name,
            path,
            file: RwLock::new(Some(file)),
            capacity,
            start_offset,
            end_offset: AtomicU64::new(end_offset),
            ref_count: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            append_lock: Mutex::new(()),
        }
    }

    /// Segment name
    #[must_use]
    pub const fn name(&self) -> &LogSegmentName {
        &self.name
    }

    /// Backing file path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total capacity in bytes, header included
    #[must_use]
    pub const fn capacity(&self) -> u64 {
        self.capacity
    }

    /// First byte usable for records
    #[must_use]
    pub const fn start_offset(&self) -> u64 {
        self.start_offset
    }

    /// End of the bytes written so far
    #[must_use]
    pub fn end_offset(&self) -> u64 {
        self.end_offset.load(Ordering::Acquire)
    }

    /// Bytes still available for appends
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.capacity - self.end_offset()
    }

    /// Whether a record of `size` bytes fits behind the write cursor
    #[must_use]
    pub fn has_space_for(&self, size: u64) -> bool {
        size <= self.remaining()
    }

    /// Number of outstanding views
    #[must_use]
    pub fn ref_count(&self) -> u64 {
        self.ref_count.load(Ordering::Acquire)
    }

    /// Whether the segment has been closed
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn closed_error(&self) -> Error {
        Error::Closed(format!("log segment {}", self.name))
    }

    /// Run `op` against the open file
    fn with_file<T>(&self, op: impl FnOnce(&File) -> std::io::Result<T>) -> Result<T> {
        let file = self.file.read();
        let file = file.as_ref().ok_or_else(|| self.closed_error())?;
        Ok(op(file)?)
    }

    /// Copy exactly `size` bytes from `source` to the end of the segment
    ///
    /// Returns the position the record starts at. The write cursor only
    /// moves once every byte is in the file. A failed append truncates the
    /// file back to the cursor, so a reopen sees the segment as it was.
    pub fn append_from(&self, source: &mut dyn Read, size: u64) -> Result<u64> {
        let _guard = self.append_lock.lock();
        if self.is_closed() {
            return Err(self.closed_error());
        }

        let position = self.end_offset();
        if position.checked_add(size).is_none_or(|end| end > self.capacity) {
            return Err(Error::CapacityExceeded {
                requested: size,
                available: self.capacity.saturating_sub(position),
            });
        }

        if let Err(e) = self.copy_from(source, position, size) {
            if let Err(truncate) = self.with_file(|f| f.set_len(position)) {
                error!(
                    "Failed to truncate {} back to {} after a failed append: {}",
                    self.name, position, truncate
                );
            }
            return Err(e);
        }

        self.end_offset.store(position + size, Ordering::Release);
        debug!(
            "Appended {} bytes to {} at {}",
            size, self.name, position
        );
        Ok(position)
    }

    fn copy_from(&self, source: &mut dyn Read, position: u64, size: u64) -> Result<()> {
        let chunk_len = usize::try_from(size).map_or(APPEND_CHUNK_SIZE, |s| s.min(APPEND_CHUNK_SIZE));
        let mut chunk = vec![0u8; chunk_len];
        let mut written = 0u64;
        while written < size {
            let n = usize::try_from(size - written).map_or(chunk_len, |left| left.min(chunk_len));
            source.read_exact(&mut chunk[..n])?;
            self.with_file(|f| f.write_all_at(&chunk[..n], position + written))?;
            written += n as u64;
        }
        Ok(())
    }

    /// Take a counted view of the segment file
    pub fn acquire_view(self: &Arc<Self>) -> Result<SegmentView> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        self.ref_count.fetch_add(1, Ordering::AcqRel);
        Ok(SegmentView {
            segment: Arc::clone(self),
        })
    }

    fn release_view(&self) {
        let released = self
            .ref_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |refs| refs.checked_sub(1));
        if released.is_err() {
            error!("Released a view of {} that holds no references", self.name);
        }
        debug_assert!(released.is_ok(), "view released twice on {}", self.name);
    }

    /// Flush written records to stable storage
    pub fn flush(&self) -> Result<()> {
        self.with_file(|f| f.sync_data())
    }

    /// Flush, release the file handle and refuse further appends and views
    ///
    /// If the final sync fails the segment stays open and a later close
    /// can retry.
    pub(crate) fn close(&self) -> Result<()> {
        let _guard = self.append_lock.lock();
        let mut file = self.file.write();
        let Some(handle) = file.as_ref() else {
            return Ok(());
        };
        handle.sync_all()?;
        *file = None;
        self.closed.store(true, Ordering::Release);
        debug!("Closed log segment {}", self.name);
        Ok(())
    }
}

impl std::fmt::Debug for LogSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSegment")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("start_offset", &self.start_offset)
            .field("end_offset", &self.end_offset())
            .field("ref_count", &self.ref_count())
            .finish_non_exhaustive()
    }
}

/// A counted claim on a segment's file
///
/// Holding a view keeps the segment's reference count raised. The count drops
/// when the view is released or dropped, on every exit path.
#[derive(Debug)]
pub struct SegmentView {
    segment: Arc<LogSegment>,
}

impl SegmentView {
    /// The segment this view refers to
    #[must_use]
    pub const fn segment(&self) -> &Arc<LogSegment> {
        &self.segment
    }

    /// The segment file, for positional reads; `None` once the segment closed
    #[must_use]
    pub fn file(&self) -> Option<MappedRwLockReadGuard<'_, File>> {
        RwLockReadGuard::try_map(self.segment.file.read(), Option::as_ref).ok()
    }

    /// Read up to `buf.len()` bytes at `position`, never past the durable end
    pub fn read_at(&self, position: u64, buf: &mut [u8]) -> Result<usize> {
        let end = self.segment.end_offset();
        if position >= end {
            return Ok(0);
        }
        let len = usize::try_from(end - position).map_or(buf.len(), |left| left.min(buf.len()));
        self.segment
            .with_file(|f| f.read_exact_at(&mut buf[..len], position))?;
        Ok(len)
    }

    /// Give the claim back
    pub fn release(self) {}
}

impl Drop for SegmentView {
    fn drop(&mut self) {
        self.segment.release_view();
    }
}
