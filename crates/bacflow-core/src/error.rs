//! Error types shared across the engine.
//!
//! Decode-level problems (`DecodeError`) are recovered locally by dropping the
//! frame. `ErrorKind` is what API calls such as sending a confirmed request
//! return to the caller. Failures of an open transaction are not reported here;
//! they travel through the reply future instead.

use std::io;

use thiserror::Error;

/// Convenience result alias over [`ErrorKind`].
pub type Result<T> = std::result::Result<T, ErrorKind>;

/// Reasons a received frame could not be turned into a PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The frame carried no bytes at all.
    #[error("empty frame")]
    EmptyFrame,
    /// The high nibble of the first byte names no known PDU kind.
    #[error("unknown pdu type nibble {0:#x}")]
    UnknownPduType(u8),
    /// The frame ended before the fixed header for its PDU kind did.
    #[error("frame truncated inside the pdu header")]
    Truncated,
    /// A segmented PDU proposed a window outside 1..=127.
    #[error("window size {0} outside 1..=127")]
    InvalidWindowSize(u8),
}

/// Sequencing problems detected while receiving segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SegmentationError {
    /// A segment arrived that is not the one directly after the last good one.
    #[error("expected segment {expected}, received {received}")]
    OutOfOrder {
        /// Sequence number the receiver was waiting for.
        expected: u8,
        /// Sequence number that actually arrived.
        received: u8,
    },
    /// The reassembled message would exceed the configured limit.
    #[error("reassembly exceeds {limit} bytes")]
    Overflow {
        /// Configured byte limit.
        limit: usize,
    },
    /// The message has more segments than the receiver accepts.
    #[error("message exceeds {limit} segments")]
    TooManySegments {
        /// Configured segment limit.
        limit: usize,
    },
}

/// Errors surfaced to callers of the engine.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// Malformed frame header.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    /// A PDU kind that is valid on the wire but illegal in the current context.
    #[error("illegal pdu type {0:#x} in this context")]
    IllegalPduType(u8),
    /// All 256 invoke ids are held by open transactions.
    #[error("no invoke id available: all 256 are in use")]
    NoAvailableInvokeId,
    /// The payload cannot be carried even with segmentation.
    #[error("payload of {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge {
        /// Size of the rejected payload.
        size: usize,
        /// Largest size that can be carried.
        limit: usize,
    },
    /// Configuration value outside its legal range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// Wrapper around std::io::Error.
    #[error("io error: {0}")]
    IoError(#[from] io::Error),
    /// The endpoint has been shut down.
    #[error("endpoint is shut down")]
    ShutDown,
}
