//! Segmented append-only log
//!
//! A [`Log`] is an ordered set of [`LogSegment`]s forming one logical stream.
//! Exactly one segment, the last, takes appends. When a record does not fit
//! behind its write cursor the log rolls over to a fresh segment.
//!
//! A log whose capacity equals its segment capacity is a single headerless
//! segment named `log_current`; otherwise segments are named
//! `{position}_{generation}_log` and carry a header.

use crate::offset::{LogSegmentName, Offset};
use crate::segment::{LogSegment, SEGMENT_HEADER_SIZE};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::io::Read;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use stowage_common::config::StoreConfig;
use stowage_common::{Error, Result};
use tracing::{debug, error, info, warn};

/// Default time `close` waits for outstanding views
const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Poll interval while waiting for views to drain
const CLOSE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// An append-only log made of fixed-capacity segments
pub struct Log {
    /// Directory holding the segment files
    dir: PathBuf,
    /// Total capacity in bytes
    capacity: u64,
    /// Capacity of every segment in bytes
    segment_capacity: u64,
    /// Segments in log order
    segments: RwLock<BTreeMap<LogSegmentName, Arc<LogSegment>>>,
    /// Name of the segment taking appends; the lock serializes appends
    active: Mutex<LogSegmentName>,
    /// How long `close` waits for outstanding views
    close_timeout: Duration,
    /// Set by the first `close`; refuses new appends and descriptors
    closing: AtomicBool,
    /// Set once every segment has been closed
    closed: AtomicBool,
    /// Serializes `close` calls
    close_lock: Mutex<()>,
}

impl Log {
    /// Open the log in `dir`, creating it if it does not exist
    pub fn open(dir: impl AsRef<Path>, capacity: u64, segment_capacity: u64) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        Self::check_capacities(capacity, segment_capacity)?;
        std::fs::create_dir_all(&dir)?;

        let single = capacity == segment_capacity;
        let max_segments = capacity / segment_capacity;

        let mut segments = BTreeMap::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(name) = file_name
                .to_str()
                .and_then(|n| LogSegmentName::from_string(n).ok())
            else {
                debug!("Skipping non-segment file {:?} in {:?}", file_name, dir);
                continue;
            };
            if name.is_single() != single {
                return Err(Error::configuration(format!(
                    "segment {name} does not belong to a log with capacity {capacity} \
                     and segment capacity {segment_capacity}"
                )));
            }
            let segment = LogSegment::open(entry.path(), segment_capacity)?;
            segments.insert(name, Arc::new(segment));
        }

        if segments.len() as u64 > max_segments {
            return Err(Error::configuration(format!(
                "{:?} holds {} segments, more than the {} that fit in {} bytes",
                dir,
                segments.len(),
                max_segments,
                capacity
            )));
        }

        let active = if let Some((name, _)) = segments.last_key_value() {
            name.clone()
        } else {
            let name = LogSegmentName::first(single);
            let segment = LogSegment::create(&dir, name.clone(), segment_capacity)?;
            segments.insert(name.clone(), Arc::new(segment));
            name
        };

        info!(
            "Opened log at {:?}: {} segment(s), capacity {} bytes, segment capacity {} bytes",
            dir,
            segments.len(),
            capacity,
            segment_capacity
        );

        Ok(Self {
            dir,
            capacity,
            segment_capacity,
            segments: RwLock::new(segments),
            active: Mutex::new(active),
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            closing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            close_lock: Mutex::new(()),
        })
    }

    /// Open the log described by `config`
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        Ok(
            Self::open(&config.data_dir, config.log_capacity, config.segment_capacity)?
                .with_close_timeout(config.close_timeout()),
        )
    }

    /// Override how long `close` waits for outstanding views
    #[must_use]
    pub const fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    fn check_capacities(capacity: u64, segment_capacity: u64) -> Result<()> {
        if segment_capacity == 0 || capacity < segment_capacity {
            return Err(Error::configuration(format!(
                "invalid log capacity {capacity} for segment capacity {segment_capacity}"
            )));
        }
        if capacity % segment_capacity != 0 {
            return Err(Error::configuration(format!(
                "log capacity {capacity} is not a multiple of segment capacity {segment_capacity}"
            )));
        }
        if capacity != segment_capacity && segment_capacity <= SEGMENT_HEADER_SIZE {
            return Err(Error::configuration(format!(
                "segment capacity {segment_capacity} cannot hold the segment header"
            )));
        }
        Ok(())
    }

    /// Directory holding the segment files
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Total capacity in bytes
    #[must_use]
    pub const fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Capacity of every segment in bytes
    #[must_use]
    pub const fn segment_capacity(&self) -> u64 {
        self.segment_capacity
    }

    /// Whether the log is a single headerless segment
    #[must_use]
    pub const fn is_single_segment(&self) -> bool {
        self.capacity == self.segment_capacity
    }

    /// Largest record a single segment can hold
    #[must_use]
    pub const fn max_record_size(&self) -> u64 {
        if self.is_single_segment() {
            self.segment_capacity
        } else {
            self.segment_capacity - SEGMENT_HEADER_SIZE
        }
    }

    /// Number of segments currently in the log
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.segments.read().len()
    }

    /// Bytes consumed: every segment before the active one counts in full
    #[must_use]
    pub fn used_capacity(&self) -> u64 {
        let active = self.active.lock().clone();
        self.segments
            .read()
            .iter()
            .map(|(name, segment)| {
                if *name == active {
                    segment.end_offset()
                } else {
                    self.segment_capacity
                }
            })
            .sum()
    }

    /// Whether `close` has been called, successfully or not
    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Whether `close` has completed and every segment is closed
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Append exactly `size` bytes from `source`, returning where they landed
    ///
    /// Rolls over to a new segment when the active one cannot take the
    /// record. I/O failures are returned as-is and never retried here.
    pub fn append_from(&self, source: &mut dyn Read, size: u64) -> Result<Offset> {
        if self.is_closing() {
            return Err(Error::Closed("log".into()));
        }
        let max = self.max_record_size();
        if size > max {
            return Err(Error::RecordTooLarge { size, max });
        }

        let mut active = self.active.lock();
        let mut segment = self.resolve_segment(&active)?;
        if !segment.has_space_for(size) {
            segment = self.roll_over(&mut active, &segment, size)?;
        }

        let position = segment.append_from(source, size)?;
        Ok(Offset::new(active.clone(), position))
    }

    /// Create the next segment and make it the append target
    fn roll_over(
        &self,
        active: &mut LogSegmentName,
        current: &LogSegment,
        size: u64,
    ) -> Result<Arc<LogSegment>> {
        let max_segments = self.capacity / self.segment_capacity;
        let mut segments = self.segments.write();
        if segments.len() as u64 >= max_segments {
            return Err(Error::CapacityExceeded {
                requested: size,
                available: current.remaining(),
            });
        }

        let name = active.next_position();
        let segment = Arc::new(LogSegment::create(
            &self.dir,
            name.clone(),
            self.segment_capacity,
        )?);
        segments.insert(name.clone(), Arc::clone(&segment));
        info!(
            "Rolled log {:?} over from {} to {} ({} bytes left unused)",
            self.dir,
            current.name(),
            name,
            current.remaining()
        );
        *active = name;
        Ok(segment)
    }

    /// The segment named `name`, if the log has it
    #[must_use]
    pub fn get_segment(&self, name: &LogSegmentName) -> Option<Arc<LogSegment>> {
        self.segments.read().get(name).cloned()
    }

    /// The segment named `name`, failing with `SegmentNotFound` otherwise
    pub fn resolve_segment(&self, name: &LogSegmentName) -> Result<Arc<LogSegment>> {
        self.get_segment(name)
            .ok_or_else(|| Error::SegmentNotFound(name.to_string()))
    }

    /// First segment in log order
    #[must_use]
    pub fn get_first_segment(&self) -> Option<Arc<LogSegment>> {
        self.segments.read().values().next().cloned()
    }

    /// Last segment in log order (the append target)
    #[must_use]
    pub fn get_last_segment(&self) -> Option<Arc<LogSegment>> {
        self.segments.read().values().next_back().cloned()
    }

    /// Segment after `segment`, or `None` if it is the last one
    #[must_use]
    pub fn get_next_segment(&self, segment: &LogSegment) -> Option<Arc<LogSegment>> {
        self.segments
            .read()
            .range((Bound::Excluded(segment.name()), Bound::Unbounded))
            .next()
            .map(|(_, s)| Arc::clone(s))
    }

    /// Segment before `segment`, or `None` if it is the first one
    #[must_use]
    pub fn get_prev_segment(&self, segment: &LogSegment) -> Option<Arc<LogSegment>> {
        self.segments
            .read()
            .range((Bound::Unbounded, Bound::Excluded(segment.name())))
            .next_back()
            .map(|(_, s)| Arc::clone(s))
    }

    /// Snapshot of all segments in log order
    #[must_use]
    pub fn segments(&self) -> Vec<Arc<LogSegment>> {
        self.segments.read().values().cloned().collect()
    }

    /// Offset the next record would be written at
    pub fn end_offset(&self) -> Result<Offset> {
        let active = self.active.lock();
        let segment = self.resolve_segment(&active)?;
        Ok(Offset::new(active.clone(), segment.end_offset()))
    }

    /// Flush the active segment to stable storage
    pub fn flush(&self) -> Result<()> {
        let active = self.active.lock();
        self.resolve_segment(&active)?.flush()
    }

    /// Close the log
    ///
    /// Refuses new appends and descriptors, waits up to the close timeout
    /// for every segment's views to be released, then flushes and closes all
    /// segments. Outstanding views past the timeout mean a reader leaked a
    /// reference; the close fails with `ReferenceLeak`, segments stay open
    /// and a later `close` tries again. Closing a closed log is a no-op.
    pub fn close(&self) -> Result<()> {
        let _closing = self.close_lock.lock();
        if self.is_closed() {
            debug!("Log {:?} already closed", self.dir);
            return Ok(());
        }
        self.closing.store(true, Ordering::Release);

        let deadline = Instant::now() + self.close_timeout;
        loop {
            let busy = self
                .segments
                .read()
                .values()
                .find(|s| s.ref_count() > 0)
                .map(|s| (s.name().to_string(), s.ref_count()));
            let Some((segment, refs)) = busy else {
                break;
            };
            if Instant::now() >= deadline {
                error!(
                    "Timed out closing log {:?}: segment {} still has {} references",
                    self.dir, segment, refs
                );
                return Err(Error::ReferenceLeak { segment, refs });
            }
            std::thread::sleep(CLOSE_POLL_INTERVAL);
        }

        let active = self.active.lock();
        for segment in self.segments.read().values() {
            if let Err(e) = segment.close() {
                warn!("Failed to close log segment {}: {}", segment.name(), e);
                return Err(e);
            }
        }
        drop(active);
        self.closed.store(true, Ordering::Release);
        info!("Closed log at {:?}", self.dir);
        Ok(())
    }
}

impl std::fmt::Debug for Log {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Log")
            .field("dir", &self.dir)
            .field("capacity", &self.capacity)
            .field("segment_capacity", &self.segment_capacity)
            .field("segment_count", &self.segment_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;
    use tempfile::tempdir;

    fn random_bytes(len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut buf);
        buf
    }

    #[test]
    fn test_single_segment_log() {
        let dir = tempdir().unwrap();
        let log = Log::open(dir.path(), 1000, 1000).unwrap();

        assert!(log.is_single_segment());
        let first = log.get_first_segment().unwrap();
        assert_eq!(first.name(), &LogSegmentName::Single);
        assert_eq!(first.start_offset(), 0);
        assert_eq!(log.max_record_size(), 1000);

        let offset = log.append_from(&mut &random_bytes(1000)[..], 1000).unwrap();
        assert_eq!(offset, Offset::new(LogSegmentName::Single, 0));
        assert!(log.get_next_segment(&first).is_none());

        let err = log.append_from(&mut &[0u8; 1][..], 1).unwrap_err();
        assert!(matches!(err, Error::CapacityExceeded { .. }));
    }

    #[test]
    fn test_rollover() {
        let dir = tempdir().unwrap();
        let log = Log::open(dir.path(), 3000, 1000).unwrap();
        let available = 1000 - SEGMENT_HEADER_SIZE;

        let first = log.append_from(&mut &random_bytes(600)[..], 600).unwrap();
        assert_eq!(first, Offset::new(LogSegmentName::new(0, 0), SEGMENT_HEADER_SIZE));

        // does not fit behind the first record, lands in a new segment
        let second = log.append_from(&mut &random_bytes(600)[..], 600).unwrap();
        assert_eq!(second, Offset::new(LogSegmentName::new(1, 0), SEGMENT_HEADER_SIZE));
        assert_eq!(log.segment_count(), 2);

        let third = log
            .append_from(&mut &random_bytes(available as usize)[..], available)
            .unwrap();
        assert_eq!(third.name(), &LogSegmentName::new(2, 0));

        let err = log.append_from(&mut &[0u8; 10][..], 10).unwrap_err();
        assert!(matches!(
            err,
            Error::CapacityExceeded {
                requested: 10,
                available: 0
            }
        ));
        assert_eq!(log.segment_count(), 3);
    }

    #[test]
    fn test_record_too_large_creates_nothing() {
        let dir = tempdir().unwrap();
        let log = Log::open(dir.path(), 2000, 1000).unwrap();
        let max = 1000 - SEGMENT_HEADER_SIZE;

        let err = log
            .append_from(&mut &random_bytes(1000)[..], max + 1)
            .unwrap_err();
        assert!(matches!(err, Error::RecordTooLarge { size, max: m } if size == max + 1 && m == max));
        assert_eq!(log.segment_count(), 1);
        assert_eq!(log.used_capacity(), SEGMENT_HEADER_SIZE);
    }

    #[test]
    fn test_navigation() {
        let dir = tempdir().unwrap();
        let log = Log::open(dir.path(), 3000, 1000).unwrap();
        for _ in 0..3 {
            log.append_from(&mut &random_bytes(900)[..], 900).unwrap();
        }

        let first = log.get_first_segment().unwrap();
        let second = log.get_next_segment(&first).unwrap();
        let third = log.get_next_segment(&second).unwrap();
        assert_eq!(second.name(), &LogSegmentName::new(1, 0));
        assert_eq!(third.name(), &LogSegmentName::new(2, 0));
        assert!(log.get_next_segment(&third).is_none());
        assert_eq!(log.get_prev_segment(&third).unwrap().name(), second.name());
        assert!(log.get_prev_segment(&first).is_none());
        assert_eq!(log.get_last_segment().unwrap().name(), third.name());
        assert_eq!(log.segments().len(), 3);
    }

    #[test]
    fn test_used_capacity_and_end_offset() {
        let dir = tempdir().unwrap();
        let log = Log::open(dir.path(), 2000, 1000).unwrap();
        log.append_from(&mut &random_bytes(900)[..], 900).unwrap();
        log.append_from(&mut &random_bytes(100)[..], 100).unwrap();

        assert_eq!(log.used_capacity(), 1000 + SEGMENT_HEADER_SIZE + 100);
        assert_eq!(
            log.end_offset().unwrap(),
            Offset::new(LogSegmentName::new(1, 0), SEGMENT_HEADER_SIZE + 100)
        );
    }

    #[test]
    fn test_reopen_restores_segments() {
        let dir = tempdir().unwrap();
        let data = random_bytes(700);
        let second;
        {
            let log = Log::open(dir.path(), 2000, 1000).unwrap();
            log.append_from(&mut &data[..], 700).unwrap();
            second = log.append_from(&mut &data[..], 700).unwrap();
            log.close().unwrap();
        }

        let log = Log::open(dir.path(), 2000, 1000).unwrap();
        assert_eq!(log.segment_count(), 2);
        assert_eq!(
            log.end_offset().unwrap(),
            Offset::new(second.name().clone(), second.offset() + 700)
        );

        // a different layout over the same files is refused
        assert!(matches!(
            Log::open(dir.path(), 1000, 1000),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_invalid_capacities() {
        let dir = tempdir().unwrap();
        for (capacity, segment) in [(1000, 0), (500, 1000), (2500, 1000), (20, 10)] {
            assert!(
                matches!(
                    Log::open(dir.path(), capacity, segment),
                    Err(Error::Configuration(_))
                ),
                "{capacity}/{segment} should be rejected"
            );
        }
    }

    #[test]
    fn test_close_waits_for_views() {
        let dir = tempdir().unwrap();
        let log = Arc::new(
            Log::open(dir.path(), 2000, 1000)
                .unwrap()
                .with_close_timeout(Duration::from_secs(5)),
        );
        let view = log.get_first_segment().unwrap().acquire_view().unwrap();

        let releaser = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            drop(view);
        });
        log.close().unwrap();
        releaser.join().unwrap();

        assert!(log.is_closed());
        assert!(log.get_first_segment().unwrap().is_closed());
        assert!(matches!(
            log.append_from(&mut &[0u8; 1][..], 1),
            Err(Error::Closed(_))
        ));
        // second close is a no-op
        log.close().unwrap();
    }

    #[test]
    fn test_close_reports_leaked_reference() {
        let dir = tempdir().unwrap();
        let log = Log::open(dir.path(), 2000, 1000)
            .unwrap()
            .with_close_timeout(Duration::from_millis(30));
        let first = log.get_first_segment().unwrap();
        let _view = first.acquire_view().unwrap();

        let err = log.close().unwrap_err();
        assert!(matches!(err, Error::ReferenceLeak { refs: 1, .. }));
        assert!(!first.is_closed());
        assert!(log.is_closing());
        assert!(!log.is_closed());
    }

    #[test]
    fn test_close_retry_after_leak_released() {
        let dir = tempdir().unwrap();
        let log = Log::open(dir.path(), 2000, 1000)
            .unwrap()
            .with_close_timeout(Duration::from_millis(30));
        log.append_from(&mut &random_bytes(900)[..], 900).unwrap();
        log.append_from(&mut &random_bytes(100)[..], 100).unwrap();
        let view = log.get_first_segment().unwrap().acquire_view().unwrap();

        assert!(matches!(log.close(), Err(Error::ReferenceLeak { .. })));
        assert!(matches!(
            log.append_from(&mut &[0u8; 1][..], 1),
            Err(Error::Closed(_))
        ));

        drop(view);
        log.close().unwrap();
        assert!(log.is_closed());
        assert_eq!(log.segment_count(), 2);
        assert!(log.segments().iter().all(|s| s.is_closed()));
    }

    #[test]
    fn test_concurrent_appends() {
        let dir = tempdir().unwrap();
        let log = Arc::new(Log::open(dir.path(), 4000, 1000).unwrap());

        let handles: Vec<_> = (0..4u8)
            .map(|i| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    let mut offsets = Vec::new();
                    for _ in 0..10 {
                        let data = [i; 50];
                        offsets.push(log.append_from(&mut &data[..], 50).unwrap());
                    }
                    offsets
                })
            })
            .collect();

        let mut offsets: Vec<Offset> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        offsets.sort();
        offsets.dedup();
        assert_eq!(offsets.len(), 40);

        // records never straddle segments or overlap
        for pair in offsets.windows(2) {
            if pair[0].name() == pair[1].name() {
                assert!(pair[0].offset() + 50 <= pair[1].offset());
            }
        }
        assert!(log.used_capacity() >= 40 * 50);
    }
}
