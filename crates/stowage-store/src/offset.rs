//! Logical addressing within a log
//!
//! An [`Offset`] names a byte position inside a named segment. Offsets are
//! independent of the physical file backing a segment and order first by
//! segment (in log order) and then by position.
//!
//! Offset wire form:
//! ```text
//! +----------+--------------+--------+
//! | NameLen  | Segment name | Offset |
//! | 4B (i32) | var (UTF-8)  | 8B     |
//! +----------+--------------+--------+
//! ```

use crate::codec;
use bytes::BufMut;
use derive_more::Display;
use std::fmt;
use std::io::Read;
use std::str::FromStr;
use stowage_common::{Error, Result};

/// File name of the only segment of a single-segment log
const SINGLE_SEGMENT_NAME: &str = "log_current";

/// Suffix of every segment file in a multi-segment log
const SEGMENT_SUFFIX: &str = "_log";

/// Longest segment name accepted from the wire
const MAX_SEGMENT_NAME_LEN: usize = 255;

/// Name of a segment, unique within a log
///
/// A log whose capacity equals its segment capacity has exactly one segment
/// named `log_current`. Otherwise segments are named
/// `{position}_{generation}_log`; position is the place in the log and
/// generation is bumped when a segment is rewritten in place.
#[derive(Clone, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogSegmentName {
    #[display("log_current")]
    Single,
    #[display("{position}_{generation}_log")]
    Segmented { position: u64, generation: u64 },
}

impl LogSegmentName {
    /// Name of the segment at `position`, generation `generation`
    #[must_use]
    pub const fn new(position: u64, generation: u64) -> Self {
        Self::Segmented {
            position,
            generation,
        }
    }

    /// Name of the first segment of a log
    #[must_use]
    pub const fn first(single_segment: bool) -> Self {
        if single_segment {
            Self::Single
        } else {
            Self::new(0, 0)
        }
    }

    /// Name of the segment that follows this one on rollover
    #[must_use]
    pub const fn next_position(&self) -> Self {
        match self {
            Self::Single => Self::Single,
            Self::Segmented { position, .. } => Self::new(*position + 1, 0),
        }
    }

    /// Whether this is the name used by single-segment logs
    #[must_use]
    pub const fn is_single(&self) -> bool {
        matches!(self, Self::Single)
    }

    /// Parse a name, rejecting anything that is not a segment name
    pub fn from_string(name: &str) -> Result<Self> {
        if name == SINGLE_SEGMENT_NAME {
            return Ok(Self::Single);
        }

        let invalid = || Error::invalid_argument(format!("not a log segment name: {name:?}"));
        let stem = name.strip_suffix(SEGMENT_SUFFIX).ok_or_else(invalid)?;
        let (position, generation) = stem.split_once('_').ok_or_else(invalid)?;
        let position = position.parse::<u64>().map_err(|_| invalid())?;
        let generation = generation.parse::<u64>().map_err(|_| invalid())?;
        Ok(Self::new(position, generation))
    }
}

impl FromStr for LogSegmentName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_string(s)
    }
}

/// A position in the log: segment name plus byte offset within that segment
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Offset {
    name: LogSegmentName,
    offset: u64,
}

impl Offset {
    /// Create an offset
    #[must_use]
    pub const fn new(name: LogSegmentName, offset: u64) -> Self {
        Self { name, offset }
    }

    /// Segment this offset points into
    #[must_use]
    pub const fn name(&self) -> &LogSegmentName {
        &self.name
    }

    /// Byte position within the segment
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Size of the wire form
    #[must_use]
    pub fn serialized_size(&self) -> usize {
        4 + self.name.to_string().len() + 8
    }

    /// Append the wire form to `buf`
    pub fn write_to(&self, buf: &mut impl BufMut) -> Result<()> {
        let name = self.name.to_string();
        let name_len = i32::try_from(name.len())
            .map_err(|_| Error::invalid_argument("segment name too long"))?;
        buf.put_i32(name_len);
        buf.put_slice(name.as_bytes());
        buf.put_i64(codec::to_wire_i64(self.offset, "offset")?);
        Ok(())
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.serialized_size());
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    /// Read the wire form from a stream
    pub fn from_reader(reader: &mut dyn Read) -> Result<Self> {
        let name_len = codec::read_i32(reader, "segment name length")?;
        let name_len = usize::try_from(name_len).map_err(|_| {
            Error::deserialization(format!("negative segment name length {name_len}"))
        })?;
        if name_len > MAX_SEGMENT_NAME_LEN {
            return Err(Error::deserialization(format!(
                "segment name length {name_len} exceeds {MAX_SEGMENT_NAME_LEN}"
            )));
        }
        let name = codec::read_exact_vec(reader, name_len, "segment name")?;
        let name = String::from_utf8(name)
            .map_err(|_| Error::deserialization("segment name is not UTF-8"))?;
        let name = LogSegmentName::from_string(&name)
            .map_err(|e| Error::deserialization(e.to_string()))?;
        let offset = codec::read_u64(reader, "offset")?;
        Ok(Self::new(name, offset))
    }
}

impl fmt::Debug for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Offset({}:{})", self.name, self.offset)
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.offset)
    }
}
