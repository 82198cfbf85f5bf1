//! Stowage storage engine - segmented append-only blob log
//!
//! This crate implements the on-disk core of a stowage node:
//! - Segmented log with rollover (`Log`, `LogSegment`)
//! - Reference-counted segment views for readers
//! - Record addressing (`Offset`) and metadata (`MessageInfo`)
//! - Versioned read descriptors (`BlobReadOptions`)
//! - Offset-ordered batch reads (`StoreMessageReadSet`)

mod codec;
pub mod key;
pub mod log;
pub mod message_info;
pub mod offset;
pub mod read_options;
pub mod read_set;
pub mod segment;

// Re-exports
pub use key::{BlobKey, BlobKeyFactory, StoreKey, StoreKeyFactory};
pub use log::Log;
pub use message_info::MessageInfo;
pub use offset::{LogSegmentName, Offset};
pub use read_options::{BlobReadOptions, ReadOptionsVersion};
pub use read_set::{MessageReadSet, StoreMessageReadSet};
pub use segment::{LogSegment, SEGMENT_HEADER_SIZE, SegmentView};
