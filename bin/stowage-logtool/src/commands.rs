//! Subcommand implementations

use anyhow::{Context, Result, bail};
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use stowage_common::INFINITE_TIME;
use stowage_store::{
    BlobKey, BlobKeyFactory, BlobReadOptions, Log, LogSegmentName, MessageInfo, MessageReadSet,
    Offset, ReadOptionsVersion, StoreMessageReadSet,
};
use tracing::{debug, info};

/// Append the contents of `file` as one record and print its offset
///
/// With `descriptor`, also writes a read descriptor for the record in the
/// given layout.
pub fn append(
    log: &Log,
    file: &Path,
    key: &str,
    expires_at_ms: Option<i64>,
    descriptor: Option<(&Path, ReadOptionsVersion)>,
    out: &mut dyn Write,
) -> Result<()> {
    let key = BlobKey::new(key)?;
    let mut source = File::open(file).with_context(|| format!("failed to open {}", file.display()))?;
    let size = source.metadata()?.len();

    let offset = log.append_from(&mut source, size)?;
    info!("Appended {:?} ({} bytes) at {}", key, size, offset);
    writeln!(out, "{offset} {size}")?;

    if let Some((path, version)) = descriptor {
        let info = MessageInfo::new(key, size, expires_at_ms.unwrap_or(INFINITE_TIME));
        let options = BlobReadOptions::new(log, offset, info)?;
        std::fs::write(path, options.to_bytes(version)?)
            .with_context(|| format!("failed to write descriptor {}", path.display()))?;
        debug!("Wrote {:?} descriptor to {}", version, path.display());
    }
    Ok(())
}

/// Copy one record to `out`
pub fn read(
    log: &Log,
    segment: &str,
    offset: u64,
    size: u64,
    key: &str,
    out: &mut dyn Write,
) -> Result<()> {
    let name: LogSegmentName = segment.parse()?;
    let info = MessageInfo::new(BlobKey::new(key)?, size, INFINITE_TIME);
    let options = BlobReadOptions::new(log, Offset::new(name, offset), info)?;
    drain(&StoreMessageReadSet::new(vec![options]), out)
}

/// Decode descriptor files and copy their records to `out` in offset order
pub fn fetch(log: &Log, descriptors: &[PathBuf], out: &mut dyn Write) -> Result<()> {
    let mut batch = Vec::with_capacity(descriptors.len());
    for path in descriptors {
        let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let options = BlobReadOptions::from_bytes(&mut BufReader::new(file), &BlobKeyFactory, log)
            .with_context(|| format!("failed to decode descriptor {}", path.display()))?;
        batch.push(options);
    }
    drain(&StoreMessageReadSet::new(batch), out)
}

/// Copy every record of `read_set` to `out`, index by index
fn drain(read_set: &StoreMessageReadSet<BlobKey>, out: &mut dyn Write) -> Result<()> {
    for index in 0..read_set.count() {
        let size = read_set.size_in_bytes(index)?;
        let mut relative = 0;
        while relative < size {
            let written = read_set.write_to(index, out, relative, size - relative)?;
            if written == 0 {
                bail!("output stopped accepting bytes of {:?}", read_set.key_at(index)?);
            }
            relative += written;
        }
        debug!("Copied {:?} ({} bytes)", read_set.key_at(index)?, size);
    }
    out.flush()?;
    Ok(())
}

/// Print one line per segment
pub fn segments(log: &Log, out: &mut dyn Write) -> Result<()> {
    writeln!(out, "{:<24} {:>12} {:>12} {:>12} {:>6}", "SEGMENT", "START", "END", "CAPACITY", "REFS")?;
    for segment in log.segments() {
        writeln!(
            out,
            "{:<24} {:>12} {:>12} {:>12} {:>6}",
            segment.name().to_string(),
            segment.start_offset(),
            segment.end_offset(),
            segment.capacity(),
            segment.ref_count()
        )?;
    }
    writeln!(
        out,
        "{} segment(s), {} of {} bytes used",
        log.segment_count(),
        log.used_capacity(),
        log.capacity()
    )?;
    Ok(())
}
