//! Frame batching with a byte cap and dual flush deadlines.

use std::time::{Duration, Instant};

use crate::domain::{Batch, FrameRecord};

/// Outcome of offering a frame to the batcher.
#[derive(Debug)]
#[must_use]
pub enum Offer {
    /// Admitted; no flush is needed on account of size.
    Queued,
    /// Admitted even though the frame alone exceeds the byte cap; it
    /// should be shipped on its own now.
    QueuedOversize,
    /// Not admitted: the add would push the batch over the cap. Flush
    /// the current batch first, then queue the returned record.
    Full(FrameRecord),
}

impl Offer {
    /// True when the offer asks for an immediate flush.
    pub fn size_trigger(&self) -> bool {
        !matches!(self, Offer::Queued)
    }
}

/// Accumulates frames under `max_batch_bytes` and decides when to flush:
/// on size, on the soft `send_interval`, or unconditionally on the
/// `hard_interval` (which overrides resource gating).
pub struct Batcher {
    batch: Batch,
    max_batch_bytes: usize,
    send_interval: Duration,
    hard_interval: Duration,
    last_send: Instant,
}

impl Batcher {
    pub fn new(max_batch_bytes: usize, send_interval: Duration, hard_interval: Duration) -> Self {
        Self {
            batch: Batch::new(),
            max_batch_bytes,
            send_interval,
            hard_interval,
            last_send: Instant::now(),
        }
    }

    /// Offers a frame under the byte cap. See [`Offer`] for the three
    /// outcomes; a cap of zero disables size-based flushing entirely.
    pub fn offer(&mut self, record: FrameRecord) -> Offer {
        if self.max_batch_bytes > 0 && record.compressed.len() > self.max_batch_bytes {
            self.batch.push(record);
            return Offer::QueuedOversize;
        }

        if self.max_batch_bytes > 0
            && self.batch.total_bytes() + record.compressed.len() > self.max_batch_bytes
        {
            return Offer::Full(record);
        }

        self.batch.push(record);
        Offer::Queued
    }

    /// Admits a record unconditionally. Used to re-queue a record after
    /// a [`Offer::Full`] flush attempt so no frame is ever dropped, even
    /// when the flush itself failed or was deferred.
    pub fn queue(&mut self, record: FrameRecord) {
        self.batch.push(record);
    }

    /// Soft deadline: a non-empty batch has waited at least
    /// `send_interval` since the last flush.
    pub fn should_send(&self) -> bool {
        !self.batch.is_empty() && self.last_send.elapsed() >= self.send_interval
    }

    /// Hard deadline: a non-empty batch has waited at least
    /// `hard_interval`; this supersedes the resource gate.
    pub fn should_force_send(&self) -> bool {
        !self.batch.is_empty() && self.last_send.elapsed() >= self.hard_interval
    }

    pub fn has_pending(&self) -> bool {
        !self.batch.is_empty()
    }

    pub fn batch(&self) -> &Batch {
        &self.batch
    }

    /// Clears the aggregate and restarts the interval clock.
    pub fn reset(&mut self) {
        self.batch.clear();
        self.last_send = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use crate::domain::Frame;

    fn record(len: usize) -> FrameRecord {
        FrameRecord {
            frame: Frame {
                file: "seg-000001.wal.gz".to_string(),
                frame_number: 1,
                offset: 0,
                length: len as u64,
                record_count: 1,
                first_timestamp: 0,
                last_timestamp: 0,
                crc32: 0,
            },
            compressed: Bytes::from(vec![0u8; len]),
            idx_line_len: 90,
        }
    }

    fn batcher(cap: usize) -> Batcher {
        Batcher::new(cap, Duration::from_secs(5), Duration::from_secs(10))
    }

    #[test]
    fn oversized_frame_is_admitted_for_solo_shipping() {
        let mut b = batcher(100);
        let offer = b.offer(record(200));
        assert!(matches!(offer, Offer::QueuedOversize));
        assert_eq!(b.batch().len(), 1);
        assert_eq!(b.batch().total_bytes(), 200);
    }

    #[test]
    fn overflowing_add_is_refused_and_returned() {
        let mut b = batcher(100);
        assert!(matches!(b.offer(record(60)), Offer::Queued));

        let offer = b.offer(record(60));
        let Offer::Full(returned) = offer else {
            panic!("expected Full, got {offer:?}");
        };
        assert_eq!(returned.compressed.len(), 60);
        // The refused record is not in the batch.
        assert_eq!(b.batch().len(), 1);
        assert_eq!(b.batch().total_bytes(), 60);
    }

    #[test]
    fn batch_exactly_at_cap_accepts_without_trigger() {
        let mut b = batcher(100);
        assert!(matches!(b.offer(record(40)), Offer::Queued));
        let offer = b.offer(record(60));
        assert!(!offer.size_trigger());
        assert_eq!(b.batch().total_bytes(), 100);

        // The next byte over the cap is refused.
        assert!(matches!(b.offer(record(1)), Offer::Full(_)));
    }

    #[test]
    fn zero_cap_disables_size_triggers() {
        let mut b = batcher(0);
        for _ in 0..10 {
            assert!(matches!(b.offer(record(1 << 20)), Offer::Queued));
        }
        assert_eq!(b.batch().len(), 10);
    }

    #[test]
    fn time_triggers_require_a_non_empty_batch() {
        let mut b = Batcher::new(100, Duration::ZERO, Duration::ZERO);
        assert!(!b.should_send());
        assert!(!b.should_force_send());

        b.queue(record(10));
        assert!(b.should_send());
        assert!(b.should_force_send());
    }

    #[test]
    fn soft_and_hard_deadlines_are_independent() {
        let mut b = Batcher::new(100, Duration::ZERO, Duration::from_secs(3600));
        b.queue(record(10));
        assert!(b.should_send());
        assert!(!b.should_force_send());
    }

    #[test]
    fn reset_clears_batch_and_restarts_clock() {
        let mut b = Batcher::new(100, Duration::ZERO, Duration::ZERO);
        b.queue(record(10));
        b.reset();

        assert!(!b.has_pending());
        assert!(b.batch().is_empty());

        // An empty batch never triggers, even with elapsed deadlines.
        assert!(!b.should_send());
    }
}
