//! Resolved read descriptors
//!
//! A [`BlobReadOptions`] binds a record's [`Offset`] and [`MessageInfo`] to a
//! live view of the segment holding it. Building one (directly or by
//! decoding) takes a reference on the segment; closing or dropping it gives
//! the reference back.
//!
//! Wire formats, all big-endian:
//! ```text
//! V0: | Version=0 | Offset | Size | ExpiresAtMs | Key |
//!     | 2B        | 8B     | 8B   | 8B          | var |
//!
//! V1: | Version=1 | Offset (wire form) | Size | ExpiresAtMs | Key |
//!     | 2B        | 4B + name + 8B     | 8B   | 8B          | var |
//!     | HasCrc | Crc | AccountId | ContainerId | OperationTimeMs | Deleted |
//!     | 1B     | 8B  | 2B        | 2B          | 8B              | 1B      |
//! ```
//! V0 predates multi-segment logs and carries no segment name; it always
//! refers to the log's first segment.

use crate::codec;
use crate::key::{StoreKey, StoreKeyFactory};
use crate::log::Log;
use crate::message_info::MessageInfo;
use crate::offset::{LogSegmentName, Offset};
use crate::segment::{LogSegment, SegmentView};
use bytes::BufMut;
use parking_lot::MappedRwLockReadGuard;
use std::cmp::Ordering;
use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;
use stowage_common::{Error, Result};
use tracing::debug;

/// Largest chunk copied per read from the segment file
const COPY_CHUNK_SIZE: usize = 64 * 1024;

/// Serialization version of [`BlobReadOptions`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadOptionsVersion {
    /// Legacy layout: offset, size, expiration and key only
    V0,
    /// Current layout
    V1,
}

impl ReadOptionsVersion {
    /// Version emitted by current writers
    pub const CURRENT: Self = Self::V1;

    /// Version tag on the wire
    #[must_use]
    pub const fn tag(self) -> i16 {
        match self {
            Self::V0 => 0,
            Self::V1 => 1,
        }
    }
}

impl TryFrom<i16> for ReadOptionsVersion {
    type Error = Error;

    fn try_from(tag: i16) -> Result<Self> {
        match tag {
            0 => Ok(Self::V0),
            1 => Ok(Self::V1),
            other => Err(Error::UnsupportedVersion(other)),
        }
    }
}

/// Fields recovered from the wire before the segment is resolved
struct Decoded<K> {
    segment: Option<LogSegmentName>,
    position: u64,
    info: MessageInfo<K>,
}

/// A record's location and metadata plus a counted view of its segment
pub struct BlobReadOptions<K: StoreKey> {
    offset: Offset,
    info: MessageInfo<K>,
    segment: Arc<LogSegment>,
    view: Option<SegmentView>,
}

impl<K: StoreKey> BlobReadOptions<K> {
    /// Resolve `offset` in `log` and take a view of its segment
    ///
    /// Fails with `InvalidArgument` if the record does not lie entirely
    /// within the segment's written bytes; nothing is acquired in that case.
    pub fn new(log: &Log, offset: Offset, info: MessageInfo<K>) -> Result<Self> {
        if log.is_closing() {
            return Err(Error::Closed("log".into()));
        }
        let segment = log.resolve_segment(offset.name())?;

        let start = offset.offset();
        let end = start.checked_add(info.size).ok_or_else(|| {
            Error::invalid_argument(format!("offset {} + size {} overflows", offset, info.size))
        })?;
        if start < segment.start_offset() || end > segment.end_offset() {
            return Err(Error::invalid_argument(format!(
                "record at {} of {} bytes is outside segment bounds [{}, {}]",
                offset,
                info.size,
                segment.start_offset(),
                segment.end_offset()
            )));
        }

        let view = segment.acquire_view()?;
        debug!("Acquired view of {} for {:?}", segment.name(), info.key);
        Ok(Self {
            offset,
            info,
            segment,
            view: Some(view),
        })
    }

    /// Location of the record
    #[must_use]
    pub const fn offset(&self) -> &Offset {
        &self.offset
    }

    /// Metadata of the record
    #[must_use]
    pub const fn message_info(&self) -> &MessageInfo<K> {
        &self.info
    }

    /// Name of the segment holding the record
    #[must_use]
    pub fn log_segment_name(&self) -> &LogSegmentName {
        self.offset.name()
    }

    /// Segment holding the record
    #[must_use]
    pub const fn segment(&self) -> &Arc<LogSegment> {
        &self.segment
    }

    /// Segment file for zero-copy reads, `None` once closed
    #[must_use]
    pub fn file(&self) -> Option<MappedRwLockReadGuard<'_, File>> {
        self.view.as_ref().and_then(SegmentView::file)
    }

    /// Whether the view has been released
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.view.is_none()
    }

    /// Release the segment view
    ///
    /// Idempotent: only the first call gives the reference back. Location
    /// and metadata stay readable, and serializable, after closing.
    pub fn close(&mut self) {
        if let Some(view) = self.view.take() {
            debug!("Released view of {} for {:?}", self.segment.name(), self.info.key);
            view.release();
        }
    }

    /// Copy up to `max_size` bytes of the record, starting `relative_offset`
    /// bytes into it, to `dest`
    ///
    /// Returns the bytes `dest` accepted, at most
    /// `min(max_size, size - relative_offset)`. Stops early, without error,
    /// when `dest` takes less than offered or would block, so callers can
    /// resume from `relative_offset + returned`.
    pub fn write_to(&self, dest: &mut dyn Write, relative_offset: u64, max_size: u64) -> Result<u64> {
        let size = self.info.size;
        if relative_offset > size {
            return Err(Error::invalid_argument(format!(
                "relative offset {relative_offset} is past the end of a {size} byte record"
            )));
        }
        let view = self
            .view
            .as_ref()
            .ok_or_else(|| Error::Closed(format!("read options for {:?}", self.info.key)))?;

        let mut remaining = max_size.min(size - relative_offset);
        if remaining == 0 {
            return Ok(0);
        }

        let chunk_len = usize::try_from(remaining).map_or(COPY_CHUNK_SIZE, |r| r.min(COPY_CHUNK_SIZE));
        let mut chunk = vec![0u8; chunk_len];
        let mut position = self.offset.offset() + relative_offset;
        let mut written = 0u64;

        while remaining > 0 {
            let want = usize::try_from(remaining).map_or(chunk_len, |r| r.min(chunk_len));
            let read = view.read_at(position, &mut chunk[..want])?;
            if read == 0 {
                break;
            }

            let accepted = match dest.write(&chunk[..read]) {
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => 0,
                Err(e) => return Err(e.into()),
            };
            written += accepted as u64;
            position += accepted as u64;
            remaining -= accepted as u64;
            if accepted < read {
                break;
            }
        }
        Ok(written)
    }

    /// Serialized size in `version`
    #[must_use]
    pub fn serialized_size(&self, version: ReadOptionsVersion) -> usize {
        let common = 8 + 8 + self.info.key.size_in_bytes();
        match version {
            ReadOptionsVersion::V0 => 2 + 8 + common,
            ReadOptionsVersion::V1 => {
                2 + self.offset.serialized_size() + common + 1 + 8 + 2 + 2 + 8 + 1
            }
        }
    }

    /// Serialize in `version`
    ///
    /// Current writers use [`ReadOptionsVersion::CURRENT`]; V0 exists for
    /// peers that only read the legacy layout.
    pub fn to_bytes(&self, version: ReadOptionsVersion) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.serialized_size(version));
        buf.put_i16(version.tag());
        match version {
            ReadOptionsVersion::V0 => {
                buf.put_i64(codec::to_wire_i64(self.offset.offset(), "offset")?);
                self.put_common(&mut buf)?;
            }
            ReadOptionsVersion::V1 => {
                self.offset.write_to(&mut buf)?;
                self.put_common(&mut buf)?;
                buf.put_i8(i8::from(self.info.crc.is_some()));
                buf.put_u64(self.info.crc.unwrap_or_default());
                buf.put_i16(self.info.account_id);
                buf.put_i16(self.info.container_id);
                buf.put_i64(self.info.operation_time_ms);
                buf.put_i8(i8::from(self.info.is_deleted));
            }
        }
        Ok(buf)
    }

    fn put_common(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.put_i64(codec::to_wire_i64(self.info.size, "size")?);
        buf.put_i64(self.info.expiration_time_ms);
        buf.put_slice(&self.info.key.to_bytes());
        Ok(())
    }

    /// Decode a descriptor and take a view of its segment in `log`
    ///
    /// Has the same reference-taking effect as [`BlobReadOptions::new`].
    /// Fields the decoded version does not carry come back as the unknown
    /// sentinels.
    pub fn from_bytes<F>(reader: &mut dyn Read, factory: &F, log: &Log) -> Result<Self>
    where
        F: StoreKeyFactory<Key = K>,
    {
        let tag = codec::read_i16(reader, "version")?;
        let decoded = match ReadOptionsVersion::try_from(tag)? {
            ReadOptionsVersion::V0 => Self::decode_v0(reader, factory)?,
            ReadOptionsVersion::V1 => Self::decode_v1(reader, factory)?,
        };

        let name = match decoded.segment {
            Some(name) => name,
            None => log
                .get_first_segment()
                .map(|s| s.name().clone())
                .ok_or_else(|| Error::SegmentNotFound("first segment".into()))?,
        };
        Self::new(log, Offset::new(name, decoded.position), decoded.info)
    }

    fn decode_v0<F>(reader: &mut dyn Read, factory: &F) -> Result<Decoded<K>>
    where
        F: StoreKeyFactory<Key = K>,
    {
        let position = codec::read_u64(reader, "offset")?;
        let size = codec::read_u64(reader, "size")?;
        let expiration_time_ms = codec::read_i64(reader, "expiration time")?;
        let key = factory.get_store_key(reader)?;
        Ok(Decoded {
            segment: None,
            position,
            info: MessageInfo::new(key, size, expiration_time_ms),
        })
    }

    fn decode_v1<F>(reader: &mut dyn Read, factory: &F) -> Result<Decoded<K>>
    where
        F: StoreKeyFactory<Key = K>,
    {
        let offset = Offset::from_reader(reader)?;
        let size = codec::read_u64(reader, "size")?;
        let expiration_time_ms = codec::read_i64(reader, "expiration time")?;
        let key = factory.get_store_key(reader)?;
        let has_crc = codec::read_bool(reader, "crc flag")?;
        let crc = codec::read_u64_bits(reader, "crc")?;
        let account_id = codec::read_i16(reader, "account id")?;
        let container_id = codec::read_i16(reader, "container id")?;
        let operation_time_ms = codec::read_i64(reader, "operation time")?;
        let is_deleted = codec::read_bool(reader, "deleted flag")?;

        let mut info = MessageInfo::new(key, size, expiration_time_ms)
            .with_tenancy(account_id, container_id)
            .with_operation_time(operation_time_ms)
            .deleted(is_deleted);
        if has_crc {
            info = info.with_crc(crc);
        }
        Ok(Decoded {
            segment: Some(offset.name().clone()),
            position: offset.offset(),
            info,
        })
    }
}

impl<K: StoreKey> PartialEq for BlobReadOptions<K> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<K: StoreKey> Eq for BlobReadOptions<K> {}

impl<K: StoreKey> PartialOrd for BlobReadOptions<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Orders by offset, then by key
impl<K: StoreKey> Ord for BlobReadOptions<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.offset
            .cmp(&other.offset)
            .then_with(|| self.info.key.cmp(&other.info.key))
    }
}

impl<K: StoreKey> std::fmt::Debug for BlobReadOptions<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobReadOptions")
            .field("offset", &self.offset)
            .field("info", &self.info)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
