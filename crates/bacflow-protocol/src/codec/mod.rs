//! APDU serialization and deserialization.
//!
//! Only the fixed header of each PDU kind is interpreted; everything after it
//! is carried through as the opaque service payload.
//!
//! # Module Organization
//!
//! - [`encoder`] - APDU encoding to the wire format
//! - [`decoder`] - APDU decoding from the wire format

pub mod decoder;
pub mod encoder;


pub use decoder::ApduDecoder;
pub use encoder::ApduEncoder;

/// Flag bits of the first octet.
pub(crate) mod flags {
    /// ConfirmedRequest / ComplexACK: message is segmented
    pub const SEGMENTED: u8 = 0x08;
    /// ConfirmedRequest / ComplexACK: more segments follow
    pub const MORE_FOLLOWS: u8 = 0x04;
    /// ConfirmedRequest: segmented response accepted
    pub const SEGMENTED_RESPONSE_ACCEPTED: u8 = 0x02;
    /// SegmentACK: negative acknowledgment
    pub const NEGATIVE_ACK: u8 = 0x02;
    /// SegmentACK / Abort: sent by server
    pub const SERVER: u8 = 0x01;
}
