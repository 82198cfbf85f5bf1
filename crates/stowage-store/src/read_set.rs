//! Batched reads
//!
//! A read set is built once from a batch of [`BlobReadOptions`] and then
//! drained by index. [`StoreMessageReadSet`] sorts its batch by offset up
//! front so that draining indices in order walks the disk sequentially.

use crate::key::StoreKey;
use crate::message_info::MessageInfo;
use crate::read_options::BlobReadOptions;
use std::io::Write;
use stowage_common::{Error, Result};

/// Indexed access to a batch of records
pub trait MessageReadSet {
    /// Key type of the records
    type Key;

    /// Number of records
    fn count(&self) -> usize;

    /// Key of record `index`
    fn key_at(&self, index: usize) -> Result<&Self::Key>;

    /// Size of record `index`
    fn size_in_bytes(&self, index: usize) -> Result<u64>;

    /// Copy up to `max_size` bytes of record `index`, starting
    /// `relative_offset` bytes into it, to `dest`
    ///
    /// Returns the number of bytes written. Repeated calls with an
    /// advancing `relative_offset` stream the record incrementally.
    fn write_to(
        &self,
        index: usize,
        dest: &mut dyn Write,
        relative_offset: u64,
        max_size: u64,
    ) -> Result<u64>;
}

/// Read set backed by log segments, ordered by offset
///
/// The batch is sorted once at construction; an index names the same record
/// for the life of the set. Segment views stay with the descriptors: hand
/// them back with [`StoreMessageReadSet::into_read_options`] to close them,
/// or drop the set.
#[derive(Debug)]
pub struct StoreMessageReadSet<K: StoreKey> {
    options: Vec<BlobReadOptions<K>>,
}

impl<K: StoreKey> StoreMessageReadSet<K> {
    /// Build a read set, sorting `options` by offset then key
    #[must_use]
    pub fn new(mut options: Vec<BlobReadOptions<K>>) -> Self {
        options.sort();
        Self { options }
    }

    fn entry(&self, index: usize) -> Result<&BlobReadOptions<K>> {
        self.options.get(index).ok_or(Error::IndexOutOfBounds {
            index,
            count: self.options.len(),
        })
    }

    /// Full metadata of record `index`
    pub fn message_info_at(&self, index: usize) -> Result<&MessageInfo<K>> {
        self.entry(index).map(BlobReadOptions::message_info)
    }

    /// Descriptors in index order
    #[must_use]
    pub fn read_options(&self) -> &[BlobReadOptions<K>] {
        &self.options
    }

    /// Take the descriptors back, in index order
    #[must_use]
    pub fn into_read_options(self) -> Vec<BlobReadOptions<K>> {
        self.options
    }
}

impl<K: StoreKey> MessageReadSet for StoreMessageReadSet<K> {
    type Key = K;

    fn count(&self) -> usize {
        self.options.len()
    }

    fn key_at(&self, index: usize) -> Result<&K> {
        self.entry(index).map(|o| &o.message_info().key)
    }

    fn size_in_bytes(&self, index: usize) -> Result<u64> {
        self.entry(index).map(|o| o.message_info().size)
    }

    fn write_to(
        &self,
        index: usize,
        dest: &mut dyn Write,
        relative_offset: u64,
        max_size: u64,
    ) -> Result<u64> {
        self.entry(index)?.write_to(dest, relative_offset, max_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::BlobKey;
    use crate::log::Log;
    use crate::offset::Offset;
    use rand::{Rng, RngCore};
    use tempfile::tempdir;

    fn key(id: &str) -> BlobKey {
        BlobKey::new(id).unwrap()
    }

    fn info(id: &str, size: u64) -> MessageInfo<BlobKey> {
        let mut rng = rand::thread_rng();
        MessageInfo::new(key(id), size, 1).with_tenancy(rng.r#gen(), rng.r#gen())
    }

    #[test]
    fn test_read_set_over_two_segments() {
        let dir = tempdir().unwrap();
        let log = Log::open(dir.path(), 2000, 1000).unwrap();
        let available = log.max_record_size();

        let mut source = vec![0u8; 2 * available as usize];
        rand::thread_rng().fill_bytes(&mut source);
        let mut stream = source.as_slice();
        log.append_from(&mut stream, available).unwrap();
        log.append_from(&mut stream, available).unwrap();

        let first = log.get_first_segment().unwrap();
        let second = log.get_next_segment(&first).unwrap();
        let first_start = Offset::new(first.name().clone(), first.start_offset());
        let first_mid = Offset::new(first.name().clone(), first.start_offset() + available / 2);
        let second_start = Offset::new(second.name().clone(), second.start_offset());
        let second_mid = Offset::new(second.name().clone(), second.start_offset() + available / 2);

        let options = vec![
            BlobReadOptions::new(&log, first_mid.clone(), info("id1", available / 3)).unwrap(),
            BlobReadOptions::new(&log, second_start, info("id2", available / 4)).unwrap(),
            BlobReadOptions::new(&log, second_mid, info("id3", available / 2)).unwrap(),
            BlobReadOptions::new(&log, first_start, info("id4", available / 5)).unwrap(),
            BlobReadOptions::new(&log, first_mid, info("id5", available / 6)).unwrap(),
        ];
        assert_eq!(first.ref_count(), 3);
        assert_eq!(second.ref_count(), 2);

        let read_set = StoreMessageReadSet::new(options);
        assert_eq!(read_set.count(), 5);

        let expected = [
            ("id4", available / 5),
            ("id1", available / 3),
            ("id5", available / 6),
            ("id2", available / 4),
            ("id3", available / 2),
        ];
        for (index, (id, size)) in expected.iter().enumerate() {
            assert_eq!(read_set.key_at(index).unwrap(), &key(id));
            assert_eq!(read_set.size_in_bytes(index).unwrap(), *size);
            assert_eq!(read_set.message_info_at(index).unwrap().size, *size);
        }

        // whole record in one call
        let size = available / 5;
        let mut dest = Vec::new();
        assert_eq!(read_set.write_to(0, &mut dest, 0, u64::MAX).unwrap(), size);
        assert_eq!(dest, &source[..size as usize]);

        // byte by byte
        let size = available / 3;
        let mut dest = Vec::new();
        for relative in 0..size {
            assert_eq!(read_set.write_to(1, &mut dest, relative, 1).unwrap(), 1);
        }
        let start = (available / 2) as usize;
        assert_eq!(dest, &source[start..start + size as usize]);

        // in chunks that do not divide the record evenly
        let size = available / 2;
        let chunk = available / 6;
        let mut dest = Vec::new();
        let mut relative = 0;
        while relative < size {
            let written = read_set.write_to(4, &mut dest, relative, chunk).unwrap();
            assert_eq!(written, chunk.min(size - relative));
            relative += written;
        }
        let start = (available + available / 2) as usize;
        assert_eq!(dest, &source[start..start + size as usize]);

        // nothing left at the end of a record
        let mut dest = Vec::new();
        let end = read_set.size_in_bytes(0).unwrap();
        assert_eq!(read_set.write_to(0, &mut dest, end, 1).unwrap(), 0);
        assert!(dest.is_empty());

        drop(read_set);
        assert_eq!(first.ref_count(), 0);
        assert_eq!(second.ref_count(), 0);
        log.close().unwrap();
    }

    #[test]
    fn test_index_out_of_bounds() {
        let dir = tempdir().unwrap();
        let log = Log::open(dir.path(), 1000, 1000).unwrap();
        let offset = log.append_from(&mut &[9u8; 100][..], 100).unwrap();
        let read_set = StoreMessageReadSet::new(vec![
            BlobReadOptions::new(&log, offset, info("id1", 100)).unwrap(),
        ]);

        let mut dest = Vec::new();
        assert!(matches!(
            read_set.write_to(1, &mut dest, 10, 10),
            Err(Error::IndexOutOfBounds { index: 1, count: 1 })
        ));
        assert!(dest.is_empty());
        assert!(matches!(
            read_set.key_at(1),
            Err(Error::IndexOutOfBounds { .. })
        ));
        assert!(matches!(
            read_set.size_in_bytes(usize::MAX),
            Err(Error::IndexOutOfBounds { .. })
        ));
        assert!(read_set.message_info_at(1).is_err());
    }

    #[test]
    fn test_sorted_regardless_of_input_order() {
        let dir = tempdir().unwrap();
        let log = Log::open(dir.path(), 4000, 1000).unwrap();
        let mut offsets = Vec::new();
        for _ in 0..12 {
            let size = rand::thread_rng().gen_range(1..200);
            let data = vec![0u8; size as usize];
            offsets.push((log.append_from(&mut data.as_slice(), size).unwrap(), size));
        }

        let mut batch: Vec<_> = offsets
            .iter()
            .enumerate()
            .map(|(i, (offset, size))| {
                BlobReadOptions::new(&log, offset.clone(), info(&format!("id{i:02}"), *size)).unwrap()
            })
            .collect();
        batch.reverse();

        let read_set = StoreMessageReadSet::new(batch);
        let sorted: Vec<_> = read_set.read_options().iter().map(|o| o.offset().clone()).collect();
        assert!(sorted.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(sorted.len(), offsets.len());

        let mut returned = read_set.into_read_options();
        for options in &mut returned {
            options.close();
        }
        assert!(log.segments().iter().all(|s| s.ref_count() == 0));
    }
}
