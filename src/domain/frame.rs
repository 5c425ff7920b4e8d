use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A single WAL frame: one self-contained gzip member inside a segment
/// blob, described by one line of the sidecar index.
///
/// `offset + length` never exceeds the segment file size, and
/// `frame_number` strictly increases within a segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Segment filename, e.g. `seg-000042.wal.gz`.
    pub file: String,
    /// Sequence number within the segment.
    pub frame_number: u64,
    /// Byte offset of the gzip member inside the `.gz` file.
    pub offset: u64,
    /// Byte length of the gzip member.
    pub length: u64,
    /// Number of records contained in the frame.
    pub record_count: u32,
    /// Earliest record timestamp, unix nanoseconds.
    pub first_timestamp: i64,
    /// Latest record timestamp, unix nanoseconds.
    pub last_timestamp: i64,
    /// Checksum of the uncompressed frame contents.
    pub crc32: u32,
}

/// Serialization twin of [`Frame`] using the short field names shared by
/// the index sidecar format and the upload manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameMeta {
    pub file: String,
    pub frame: u64,
    pub off: u64,
    pub len: u64,
    pub recs: u32,
    pub first_ts: i64,
    pub last_ts: i64,
    pub crc32: u32,
}

impl From<FrameMeta> for Frame {
    fn from(meta: FrameMeta) -> Self {
        Self {
            file: meta.file,
            frame_number: meta.frame,
            offset: meta.off,
            length: meta.len,
            record_count: meta.recs,
            first_timestamp: meta.first_ts,
            last_timestamp: meta.last_ts,
            crc32: meta.crc32,
        }
    }
}

impl From<&Frame> for FrameMeta {
    fn from(frame: &Frame) -> Self {
        Self {
            file: frame.file.clone(),
            frame: frame.frame_number,
            off: frame.offset,
            len: frame.length,
            recs: frame.record_count,
            first_ts: frame.first_timestamp,
            last_ts: frame.last_timestamp,
            crc32: frame.crc32,
        }
    }
}

/// One unit of work produced by the reader: a frame, its compressed
/// payload, and the length of the index line that described it (the
/// commit advance unit for the read cursor).
#[derive(Debug, Clone)]
pub struct FrameRecord {
    pub frame: Frame,
    pub compressed: Bytes,
    pub idx_line_len: usize,
}
