//! Sequence numbers on the wire are a single octet and wrap at 256. Windows are
//! capped at 127 segments, so within one window the forward distance between
//! two sequence numbers is always unambiguous.

use crate::apdu::SequenceNumber;

/// Forward distance from `from` to `to`, modulo 256.
#[inline]
pub fn sequence_distance(from: SequenceNumber, to: SequenceNumber) -> u8 {
    to.wrapping_sub(from)
}

/// Returns true if `sequence` is one of the `count` numbers starting at `first`.
#[inline]
pub fn sequence_in_window(sequence: SequenceNumber, first: SequenceNumber, count: usize) -> bool {
    (sequence_distance(first, sequence) as usize) < count
}

/// Sequence number carried by the segment at absolute position `index`.
#[inline]
pub fn sequence_for_index(index: usize) -> SequenceNumber {
    (index % 256) as SequenceNumber
}
