//! Record keys
//!
//! The store treats keys as opaque: it only needs to order them, write them
//! out and read them back. Key schemes plug in through [`StoreKey`] and
//! [`StoreKeyFactory`].

use crate::codec;
use bytes::BufMut;
use std::fmt;
use std::io::Read;
use stowage_common::{Error, Result};

/// A key identifying one stored record
pub trait StoreKey: Clone + Ord + fmt::Debug + Send + Sync {
    /// Self-describing serialized form
    fn to_bytes(&self) -> Vec<u8>;

    /// Length of [`StoreKey::to_bytes`]
    fn size_in_bytes(&self) -> usize;
}

/// Decodes keys from a stream
pub trait StoreKeyFactory {
    /// Key type produced by this factory
    type Key: StoreKey;

    /// Read one key from `reader`
    fn get_store_key(&self, reader: &mut dyn Read) -> Result<Self::Key>;
}

/// A string key serialized as `[len: i16][UTF-8 bytes]`
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlobKey(String);

impl BlobKey {
    /// Longest id that fits the length prefix
    pub const MAX_LEN: usize = i16::MAX as usize;

    /// Create a key, rejecting ids too long for the length prefix
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.len() > Self::MAX_LEN {
            return Err(Error::invalid_argument(format!(
                "key of {} bytes exceeds {}",
                id.len(),
                Self::MAX_LEN
            )));
        }
        Ok(Self(id))
    }

    /// The key as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl StoreKey for BlobKey {
    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size_in_bytes());
        // length is bounded by MAX_LEN at construction
        buf.put_i16(i16::try_from(self.0.len()).unwrap_or(i16::MAX));
        buf.put_slice(self.0.as_bytes());
        buf
    }

    fn size_in_bytes(&self) -> usize {
        2 + self.0.len()
    }
}

impl fmt::Debug for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobKey({})", self.0)
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Factory for [`BlobKey`]
#[derive(Clone, Copy, Debug, Default)]
pub struct BlobKeyFactory;

impl StoreKeyFactory for BlobKeyFactory {
    type Key = BlobKey;

    fn get_store_key(&self, reader: &mut dyn Read) -> Result<BlobKey> {
        let len = codec::read_i16(reader, "key length")?;
        let len = usize::try_from(len)
            .map_err(|_| Error::deserialization(format!("negative key length {len}")))?;
        let bytes = codec::read_exact_vec(reader, len, "key")?;
        let id = String::from_utf8(bytes).map_err(|_| Error::deserialization("key is not UTF-8"))?;
        Ok(BlobKey(id))
    }
}
