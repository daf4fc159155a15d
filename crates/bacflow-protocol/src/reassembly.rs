//! Receiving side of a segmented message.
//!
//! Segments are accepted strictly in order. There is no reordering buffer: a
//! segment that is not the direct successor of the last good one is dropped
//! and answered with a negative SegmentACK naming the last good sequence
//! number, so the sender resends from there. A segment already held is also
//! dropped, but answered with a positive SegmentACK for the last good one.
//! The assembled bytes therefore only ever contain a gap-free prefix of the
//! message.
//!
//! # Lifecycle
//!
//! 1. The first segment (sequence 0) creates the buffer.
//! 2. Each in-order segment is appended; a full window or the final segment
//!    calls for a positive SegmentACK.
//! 3. Buffers that stop receiving segments are abandoned by the timeout driver
//!    (see [`ReassemblyBuffer::is_stale`]).

use std::time::{Duration, Instant};

use bacflow_core::{constants::MAX_WINDOW_SIZE, error::SegmentationError};

use crate::{
    apdu::SequenceNumber,
    sequence::{sequence_distance, sequence_in_window},
};

/// What the receiver must do after offering a segment to the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentVerdict {
    /// Stored; keep waiting for the rest of the window.
    Accepted,
    /// Stored and the window is full: acknowledge `sequence_number`.
    AckWindow {
        /// Sequence number to acknowledge
        sequence_number: SequenceNumber,
    },
    /// Stored and it was the final segment: acknowledge and take the message.
    Complete {
        /// Sequence number to acknowledge
        sequence_number: SequenceNumber,
    },
    /// Dropped because it was already received: acknowledge `last_good` again.
    Duplicate {
        /// Last sequence number received in order
        last_good: SequenceNumber,
    },
    /// Dropped because it is ahead of the expected one: send a NAK for `last_good`.
    Nak {
        /// Last sequence number received in order
        last_good: SequenceNumber,
        /// The sequencing problem detected
        error: SegmentationError,
    },
    /// Dropped because the message grew beyond the configured limits.
    Overflow(SegmentationError),
}

/// In-order reassembly of one segmented message.
#[derive(Debug)]
pub struct ReassemblyBuffer {
    /// Window granted to the sender
    window_size: u8,
    /// Sequence number that opened the current window
    window_start: SequenceNumber,
    /// Last sequence number received in order; meaningless until `received > 0`
    last_good: SequenceNumber,
    /// Segments received in order so far
    received: usize,
    data: Vec<u8>,
    max_bytes: usize,
    max_segments: Option<usize>,
    complete: bool,
    last_activity: Instant,
}

impl ReassemblyBuffer {
    /// Creates an empty buffer expecting sequence number 0.
    ///
    /// * `window_size` - actual window granted to the sender (1-127)
    /// * `max_bytes` - largest message this buffer will hold
    /// * `max_segments` - largest segment count accepted, if limited
    /// * `now` - creation time, used for inactivity detection
    pub fn new(window_size: u8, max_bytes: usize, max_segments: Option<usize>, now: Instant) -> Self {
        Self {
            window_size: window_size.clamp(1, MAX_WINDOW_SIZE),
            window_start: 0,
            last_good: 0,
            received: 0,
            data: Vec::new(),
            max_bytes,
            max_segments,
            complete: false,
            last_activity: now,
        }
    }

    /// Window granted to the sender.
    pub fn window_size(&self) -> u8 {
        self.window_size
    }

    /// Sequence number expected next.
    pub fn expected(&self) -> SequenceNumber {
        if self.received == 0 {
            0
        } else {
            self.last_good.wrapping_add(1)
        }
    }

    /// Last sequence number received in order, if any segment arrived yet.
    pub fn last_good(&self) -> Option<SequenceNumber> {
        (self.received > 0).then_some(self.last_good)
    }

    /// Number of segments accepted so far.
    pub fn received_segments(&self) -> usize {
        self.received
    }

    /// Bytes assembled so far.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if nothing has been assembled yet.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns true once the final segment has been accepted.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Time the last segment was accepted (or the buffer was created).
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Returns true once `timeout` has elapsed since the last segment arrived.
    pub fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_activity) >= timeout
    }

    /// Offers one segment to the buffer.
    pub fn accept(
        &mut self,
        sequence_number: SequenceNumber,
        more_follows: bool,
        data: &[u8],
        now: Instant,
    ) -> SegmentVerdict {
        let expected = self.expected();
        if self.already_held(sequence_number) {
            return SegmentVerdict::Duplicate { last_good: self.last_good };
        }
        if self.complete || sequence_number != expected {
            // Restart window counting for the resend that the NAK asks for.
            self.window_start = expected;
            return SegmentVerdict::Nak {
                last_good: expected.wrapping_sub(1),
                error: SegmentationError::OutOfOrder { expected, received: sequence_number },
            };
        }

        if self.data.len() + data.len() > self.max_bytes {
            return SegmentVerdict::Overflow(SegmentationError::Overflow { limit: self.max_bytes });
        }
        if let Some(limit) = self.max_segments {
            if self.received + 1 > limit {
                return SegmentVerdict::Overflow(SegmentationError::TooManySegments { limit });
            }
        }

        self.data.extend_from_slice(data);
        self.last_good = sequence_number;
        self.received += 1;
        self.last_activity = now;

        if !more_follows {
            self.complete = true;
            return SegmentVerdict::Complete { sequence_number };
        }
        if sequence_distance(self.window_start, sequence_number) as usize + 1
            >= self.window_size as usize
        {
            self.window_start = sequence_number.wrapping_add(1);
            return SegmentVerdict::AckWindow { sequence_number };
        }
        SegmentVerdict::Accepted
    }

    /// Returns true if `sequence_number` is one of the segments accepted most recently.
    ///
    /// Only the last 127 are considered, which is as far back as a sender
    /// with the largest window can still be resending.
    fn already_held(&self, sequence_number: SequenceNumber) -> bool {
        let held = self.received.min(MAX_WINDOW_SIZE as usize);
        let oldest = self.expected().wrapping_sub(held as u8);
        held > 0 && sequence_in_window(sequence_number, oldest, held)
    }

    /// Consumes the buffer and returns the assembled message.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(window_size: u8) -> ReassemblyBuffer {
        ReassemblyBuffer::new(window_size, 64 * 1024, None, Instant::now())
    }

    #[test]
    fn test_in_order_reassembly() {
        let mut buffer = buffer(2);
        let now = Instant::now();
        assert_eq!(buffer.accept(0, true, &[1, 2], now), SegmentVerdict::Accepted);
        assert_eq!(buffer.accept(1, true, &[3, 4], now), SegmentVerdict::AckWindow { sequence_number: 1 });
        assert_eq!(buffer.accept(2, false, &[5], now), SegmentVerdict::Complete { sequence_number: 2 });
        assert!(buffer.is_complete());
        assert_eq!(buffer.into_bytes(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_gap_naks_last_good_and_drops_segment() {
        let mut buffer = buffer(3);
        let now = Instant::now();
        assert_eq!(buffer.accept(0, true, &[0xA0], now), SegmentVerdict::Accepted);
        let verdict = buffer.accept(2, true, &[0xC0], now);
        assert_eq!(
            verdict,
            SegmentVerdict::Nak {
                last_good: 0,
                error: SegmentationError::OutOfOrder { expected: 1, received: 2 },
            }
        );
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.expected(), 1);
    }

    #[test]
    fn test_duplicate_segment_is_acked_again() {
        let mut buffer = buffer(4);
        let now = Instant::now();
        buffer.accept(0, true, &[1], now);
        buffer.accept(1, true, &[2], now);
        assert_eq!(buffer.accept(1, true, &[2], now), SegmentVerdict::Duplicate { last_good: 1 });
        assert_eq!(buffer.accept(0, true, &[1], now), SegmentVerdict::Duplicate { last_good: 1 });
        assert_eq!(buffer.len(), 2);
        // The window count is not disturbed by the stray copies.
        assert_eq!(buffer.accept(2, true, &[3], now), SegmentVerdict::Accepted);
        assert_eq!(buffer.accept(3, true, &[4], now), SegmentVerdict::AckWindow { sequence_number: 3 });
        assert!(matches!(buffer.accept(6, true, &[7], now), SegmentVerdict::Nak { last_good: 3, .. }));
    }

    #[test]
    fn test_nothing_is_a_duplicate_before_the_first_segment() {
        let mut buffer = buffer(4);
        let now = Instant::now();
        assert!(matches!(buffer.accept(255, true, &[0], now), SegmentVerdict::Nak { .. }));
        assert!(matches!(buffer.accept(1, true, &[0], now), SegmentVerdict::Nak { .. }));
        assert_eq!(buffer.accept(0, true, &[0], now), SegmentVerdict::Accepted);
    }

    #[test]
    fn test_final_segment_repeated_after_completion() {
        let mut buffer = buffer(4);
        let now = Instant::now();
        buffer.accept(0, true, &[1], now);
        assert_eq!(buffer.accept(1, false, &[2], now), SegmentVerdict::Complete { sequence_number: 1 });
        assert_eq!(buffer.accept(1, false, &[2], now), SegmentVerdict::Duplicate { last_good: 1 });
        assert!(matches!(buffer.accept(2, false, &[3], now), SegmentVerdict::Nak { .. }));
        assert_eq!(buffer.into_bytes(), vec![1, 2]);
    }

    #[test]
    fn test_duplicate_detection_across_wrap() {
        let mut buffer = buffer(127);
        let now = Instant::now();
        for index in 0..258usize {
            buffer.accept((index % 256) as u8, true, &[0], now);
        }
        assert_eq!(buffer.expected(), 2);
        assert_eq!(buffer.accept(254, true, &[0], now), SegmentVerdict::Duplicate { last_good: 1 });
        assert!(matches!(buffer.accept(3, true, &[0], now), SegmentVerdict::Nak { last_good: 1, .. }));
    }

    #[test]
    fn test_window_count_restarts_after_nak() {
        let mut buffer = buffer(2);
        let now = Instant::now();
        buffer.accept(0, true, &[0], now);
        assert!(matches!(buffer.accept(2, true, &[2], now), SegmentVerdict::Nak { .. }));
        assert_eq!(buffer.accept(1, true, &[1], now), SegmentVerdict::Accepted);
        assert_eq!(buffer.accept(2, true, &[2], now), SegmentVerdict::AckWindow { sequence_number: 2 });
    }

    #[test]
    fn test_overflow_by_bytes() {
        let mut buffer = ReassemblyBuffer::new(4, 4, None, Instant::now());
        let now = Instant::now();
        assert_eq!(buffer.accept(0, true, &[0; 3], now), SegmentVerdict::Accepted);
        assert!(matches!(buffer.accept(1, true, &[0; 3], now), SegmentVerdict::Overflow(_)));
    }

    #[test]
    fn test_overflow_by_segments() {
        let mut buffer = ReassemblyBuffer::new(4, 1024, Some(2), Instant::now());
        let now = Instant::now();
        buffer.accept(0, true, &[0], now);
        buffer.accept(1, true, &[0], now);
        assert!(matches!(buffer.accept(2, false, &[0], now), SegmentVerdict::Overflow(_)));
    }

    #[test]
    fn test_stale_detection() {
        let start = Instant::now();
        let mut buffer = ReassemblyBuffer::new(4, 1024, None, start);
        buffer.accept(0, true, &[0], start);
        assert!(!buffer.is_stale(start + Duration::from_millis(500), Duration::from_secs(1)));
        assert!(buffer.is_stale(start + Duration::from_secs(2), Duration::from_secs(1)));
    }

    #[test]
    fn test_sequence_wraps_past_255() {
        let mut buffer = buffer(127);
        let now = Instant::now();
        let mut expected = Vec::new();
        for index in 0..300usize {
            let seq = (index % 256) as u8;
            let more = index + 1 < 300;
            let verdict = buffer.accept(seq, more, &[seq], now);
            assert!(!matches!(
                verdict,
                SegmentVerdict::Nak { .. } | SegmentVerdict::Duplicate { .. } | SegmentVerdict::Overflow(_)
            ));
            expected.push(seq);
        }
        assert!(buffer.is_complete());
        assert_eq!(buffer.into_bytes(), expected);
    }
}
