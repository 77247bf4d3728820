//! Append-only link storage
//!
//! Submitted links are immutable, so they live in plain append-only files
//! rather than in the database. Records are written sequentially and never
//! modified; recovery is a replay of every segment.
//!
//! ## Storage Format
//!
//! Each segment file contains length-prefixed, postcard-serialized links:
//! ```text
//! [4 bytes: len][len bytes: serialized link][4 bytes: len][...]
//! ```

pub mod link_log;

pub use link_log::{
    DEFAULT_SEGMENT_CAPACITY, LinkLogConfig, SegmentInfo, SegmentedLinkLog, segment_file_name,
};
