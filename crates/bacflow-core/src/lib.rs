#![warn(missing_docs)]

//! bacflow-core: foundational types shared by every layer.
//!
//! This crate holds the pieces the codec, the transaction layer and the
//! endpoint all agree on:
//! - Configuration (`Config`)
//! - Error types
//! - Protocol constants
//! - `Payload`, a shared byte view used to cut segments without copying
//! - The `Network` collaborator trait

/// Protocol constants shared across layers.
pub mod constants {
    /// Smallest APDU any device must accept.
    pub const MIN_APDU_LENGTH: u16 = 50;
    /// Largest APDU expressible through the max-APDU code (BACnet/IP).
    pub const MAX_APDU_LENGTH: u16 = 1476;
    /// Largest window a sender may propose or a receiver may grant.
    pub const MAX_WINDOW_SIZE: u8 = 127;
    /// Window proposed when nothing else is configured.
    pub const DEFAULT_WINDOW_SIZE: u8 = 16;
    /// Header of an UnconfirmedRequest: type octet and service choice.
    pub const UNCONFIRMED_REQUEST_HEADER_SIZE: usize = 2;
    /// Header of an unsegmented ConfirmedRequest, service choice included.
    ///
    /// type/flags, max-segments|max-apdu, invoke id, service choice
    pub const CONFIRMED_REQUEST_HEADER_SIZE: usize = 4;
    /// Header of a segmented ConfirmedRequest, service choice included.
    ///
    /// Adds the sequence number and proposed window size.
    pub const SEGMENTED_REQUEST_HEADER_SIZE: usize = 6;
    /// Header of an unsegmented ComplexACK, service-ack choice included.
    pub const COMPLEX_ACK_HEADER_SIZE: usize = 3;
    /// Header of a segmented ComplexACK, service-ack choice included.
    pub const SEGMENTED_COMPLEX_ACK_HEADER_SIZE: usize = 5;
    /// Number of distinct invoke ids.
    pub const INVOKE_ID_SPACE: usize = 256;
}

/// Configuration options for the transaction engine and its collaborators.
pub mod config;
/// Error types and results.
pub mod error;
/// Shared, reference-counted payload views.
pub mod payload;
/// Network collaborator abstraction.
pub mod transport;
