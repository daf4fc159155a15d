#![warn(missing_docs)]

//! bacflow-protocol: APDU types, the header codec and per-transaction segment state.

/// APDU types, reasons and header encodings.
pub mod apdu;
/// APDU serialization and deserialization.
pub mod codec;
/// Reassembly of incoming segmented messages.
pub mod reassembly;
/// Outgoing segment window for segmented messages.
pub mod segment_window;
/// Modulo-256 sequence number arithmetic.
pub mod sequence;

pub use apdu::{
    AbortPdu, AbortReason, Apdu, ComplexAck, ConfirmedRequest, ErrorPdu, InvokeId, MaxSegments,
    PduType, RejectPdu, RejectReason, SegmentAck, SegmentInfo, SequenceNumber, SimpleAck,
    UnconfirmedRequest,
};
pub use codec::{ApduDecoder, ApduEncoder};
pub use reassembly::{ReassemblyBuffer, SegmentVerdict};
pub use segment_window::{AckOutcome, OutgoingSegment, SegmentWindow};
