use bytes::Bytes;

use super::{Frame, FrameRecord};

/// An ordered set of frames staged for one upload.
///
/// Frames, compressed payloads and index-line lengths are parallel
/// sequences of identical length; `total_bytes` is the sum of the
/// payload lengths and `total_idx_advance` the exact byte count to
/// commit to the index cursor once the batch is acknowledged.
#[derive(Debug, Default)]
pub struct Batch {
    frames: Vec<Frame>,
    compressed: Vec<Bytes>,
    idx_line_lens: Vec<usize>,
    total_bytes: usize,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: FrameRecord) {
        self.total_bytes += record.compressed.len();
        self.frames.push(record.frame);
        self.compressed.push(record.compressed);
        self.idx_line_lens.push(record.idx_line_len);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Total bytes to advance the index cursor by after this batch has
    /// been accepted by the remote service.
    pub fn total_idx_advance(&self) -> u64 {
        self.idx_line_lens.iter().map(|&l| l as u64).sum()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn compressed(&self) -> &[Bytes] {
        &self.compressed
    }

    pub fn last_frame(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
        self.compressed.clear();
        self.idx_line_lens.clear();
        self.total_bytes = 0;
    }
}
