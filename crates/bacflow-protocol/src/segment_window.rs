//! Sending side of a segmented message.
//!
//! The payload is cut into numbered segments. At most `window_size` of them
//! are unacknowledged at any time. A positive SegmentACK for sequence `n`
//! confirms every segment up to `n` and slides the window; a negative one
//! confirms the same prefix but rewinds transmission to the segment after `n`.
//! Repeated NAKs naming a point that is already being resent are ignored; a
//! receiver sends one for every stray segment and each would otherwise
//! trigger another full window.
//!
//! ```ignore
//! let mut window = SegmentWindow::new(payload, 500, 3);
//! for segment in window.next_batch() {
//!     send(segment);
//! }
//! match window.on_ack(2, 3) {
//!     AckOutcome::Advanced(next) => next.into_iter().for_each(send),
//!     AckOutcome::Complete => {}
//!     AckOutcome::Ignored => {}
//! }
//! ```

use bacflow_core::{constants::MAX_WINDOW_SIZE, payload::Payload};

use crate::{
    apdu::{SegmentInfo, SequenceNumber},
    sequence::{sequence_distance, sequence_for_index},
};

/// One segment ready to be wrapped in a PDU.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingSegment {
    /// Absolute position of the segment within the message
    pub index: usize,
    /// Sequence number on the wire (index modulo 256)
    pub sequence_number: SequenceNumber,
    /// More segments follow this one
    pub more_follows: bool,
    /// The segment's share of the payload
    pub data: Payload,
}

impl OutgoingSegment {
    /// Builds the segmentation header for this segment.
    pub fn header(&self, proposed_window_size: u8) -> SegmentInfo {
        SegmentInfo {
            sequence_number: self.sequence_number,
            proposed_window_size,
            more_follows: self.more_follows,
        }
    }
}

/// Result of feeding a SegmentACK to the window.
#[derive(Debug, PartialEq, Eq)]
pub enum AckOutcome {
    /// Window moved; these segments must be sent now (possibly none).
    Advanced(Vec<OutgoingSegment>),
    /// Every segment has been acknowledged.
    Complete,
    /// Stale or duplicate acknowledgment; nothing changes.
    Ignored,
}

/// Sliding window over the segments of one outgoing message.
#[derive(Debug, Clone)]
pub struct SegmentWindow {
    payload: Payload,
    segment_size: usize,
    segment_count: usize,
    window_size: u8,
    /// Index of the oldest segment not yet acknowledged
    first_unacked: usize,
    /// Index of the next segment to put on the wire
    next_to_send: usize,
    /// Index the window was last rewound to, while no ACK has moved past it
    resending_from: Option<usize>,
}

impl SegmentWindow {
    /// Creates a window over `payload` cut into `segment_size` pieces.
    pub fn new(payload: Payload, segment_size: usize, window_size: u8) -> Self {
        let segment_size = segment_size.max(1);
        let segment_count = payload.segment_count(segment_size);
        Self {
            payload,
            segment_size,
            segment_count,
            window_size: window_size.clamp(1, MAX_WINDOW_SIZE),
            first_unacked: 0,
            next_to_send: 0,
            resending_from: None,
        }
    }

    /// Total number of segments in the message.
    pub fn segment_count(&self) -> usize {
        self.segment_count
    }

    /// Window size currently in force.
    pub fn window_size(&self) -> u8 {
        self.window_size
    }

    /// Segments sent but not yet acknowledged.
    pub fn outstanding(&self) -> usize {
        self.next_to_send - self.first_unacked
    }

    /// Segments acknowledged so far.
    pub fn acknowledged(&self) -> usize {
        self.first_unacked
    }

    /// Returns true once every segment has been sent at least once.
    pub fn all_sent(&self) -> bool {
        self.next_to_send == self.segment_count
    }

    /// Returns true once every segment has been acknowledged.
    pub fn is_complete(&self) -> bool {
        self.first_unacked == self.segment_count
    }

    /// Builds the segment at `index`.
    pub fn segment(&self, index: usize) -> OutgoingSegment {
        OutgoingSegment {
            index,
            sequence_number: sequence_for_index(index),
            more_follows: index + 1 < self.segment_count,
            data: self.payload.segment(index, self.segment_size),
        }
    }

    /// Returns the segments that may be sent now without exceeding the window.
    pub fn next_batch(&mut self) -> Vec<OutgoingSegment> {
        let mut batch = Vec::new();
        while self.next_to_send < self.segment_count
            && self.outstanding() < self.window_size as usize
        {
            batch.push(self.segment(self.next_to_send));
            self.next_to_send += 1;
        }
        if !batch.is_empty() {
            tracing::trace!(
                "Segment window: sending {}..={} of {} (window {})",
                batch[0].index,
                self.next_to_send - 1,
                self.segment_count,
                self.window_size
            );
        }
        batch
    }

    /// Applies a positive SegmentACK.
    pub fn on_ack(&mut self, sequence_number: SequenceNumber, actual_window_size: u8) -> AckOutcome {
        match self.acked_through(sequence_number) {
            Some(acked) if acked > self.first_unacked => {
                self.first_unacked = acked;
                self.set_window(actual_window_size);
                if self.is_complete() {
                    AckOutcome::Complete
                } else {
                    AckOutcome::Advanced(self.next_batch())
                }
            }
            _ => AckOutcome::Ignored,
        }
    }

    /// Applies a negative SegmentACK: the prefix through `sequence_number` is
    /// delivered and transmission restarts right after it.
    pub fn on_nak(&mut self, sequence_number: SequenceNumber, actual_window_size: u8) -> AckOutcome {
        match self.acked_through(sequence_number) {
            Some(acked) if self.resending_from == Some(acked) => {
                tracing::trace!("Segment window: duplicate NAK for {} ignored", sequence_number);
                AckOutcome::Ignored
            }
            Some(acked) => {
                self.first_unacked = acked;
                self.set_window(actual_window_size);
                if self.is_complete() {
                    return AckOutcome::Complete;
                }
                AckOutcome::Advanced(self.retransmit())
            }
            None => AckOutcome::Ignored,
        }
    }

    /// Rewinds to the oldest unacknowledged segment and returns the window to resend.
    pub fn retransmit(&mut self) -> Vec<OutgoingSegment> {
        self.next_to_send = self.first_unacked;
        self.resending_from = Some(self.first_unacked);
        self.next_batch()
    }

    /// Forgets all acknowledgments and returns the first window again.
    pub fn restart(&mut self) -> Vec<OutgoingSegment> {
        self.first_unacked = 0;
        self.retransmit()
    }

    fn set_window(&mut self, actual_window_size: u8) {
        self.window_size = actual_window_size.clamp(1, MAX_WINDOW_SIZE);
    }

    /// Maps an acknowledged sequence number onto the count of delivered segments.
    ///
    /// Only the segment just before the window and the segments in flight can
    /// be acknowledged; anything else is stale.
    fn acked_through(&self, sequence_number: SequenceNumber) -> Option<usize> {
        let before_window = sequence_for_index(self.first_unacked.wrapping_add(255));
        let offset = sequence_distance(before_window, sequence_number) as usize;
        if offset <= self.outstanding() {
            Some(self.first_unacked + offset)
        } else {
            None
        }
    }
}
