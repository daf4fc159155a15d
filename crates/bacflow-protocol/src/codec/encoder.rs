//! APDU encoding.

use std::io::{self, Write};

use byteorder::WriteBytesExt;

use super::flags;
use crate::apdu::{max_apdu_code, Apdu, SegmentInfo};

/// Serializes APDUs into bytes for transmission.
pub struct ApduEncoder;

impl ApduEncoder {
    /// Encodes a single APDU into the provided buffer (appends bytes).
    pub fn encode_into(buffer: &mut Vec<u8>, apdu: &Apdu) -> io::Result<()> {
        let kind = apdu.pdu_type().to_u8() << 4;

        match apdu {
            Apdu::ConfirmedRequest(pdu) => {
                let mut first = kind | segment_flags(pdu.segment.as_ref());
                if pdu.segmented_response_accepted {
                    first |= flags::SEGMENTED_RESPONSE_ACCEPTED;
                }
                buffer.write_u8(first)?;
                buffer.write_u8(
                    (pdu.max_segments_accepted.code() << 4)
                        | max_apdu_code(pdu.max_apdu_length_accepted),
                )?;
                buffer.write_u8(pdu.invoke_id)?;
                write_segment_header(buffer, pdu.segment.as_ref())?;
                buffer.write_u8(pdu.service_choice)?;
                buffer.write_all(pdu.payload.as_slice())?;
            }
            Apdu::UnconfirmedRequest(pdu) => {
                buffer.write_u8(kind)?;
                buffer.write_u8(pdu.service_choice)?;
                buffer.write_all(pdu.payload.as_slice())?;
            }
            Apdu::SimpleAck(pdu) => {
                buffer.write_u8(kind)?;
                buffer.write_u8(pdu.invoke_id)?;
                buffer.write_u8(pdu.service_choice)?;
            }
            Apdu::ComplexAck(pdu) => {
                buffer.write_u8(kind | segment_flags(pdu.segment.as_ref()))?;
                buffer.write_u8(pdu.invoke_id)?;
                write_segment_header(buffer, pdu.segment.as_ref())?;
                buffer.write_u8(pdu.service_choice)?;
                buffer.write_all(pdu.payload.as_slice())?;
            }
            Apdu::SegmentAck(pdu) => {
                let mut first = kind;
                if pdu.negative {
                    first |= flags::NEGATIVE_ACK;
                }
                if pdu.server {
                    first |= flags::SERVER;
                }
                buffer.write_u8(first)?;
                buffer.write_u8(pdu.invoke_id)?;
                buffer.write_u8(pdu.sequence_number)?;
                buffer.write_u8(pdu.actual_window_size)?;
            }
            Apdu::Error(pdu) => {
                buffer.write_u8(kind)?;
                buffer.write_u8(pdu.invoke_id)?;
                buffer.write_u8(pdu.service_choice)?;
                buffer.write_all(pdu.payload.as_slice())?;
            }
            Apdu::Reject(pdu) => {
                buffer.write_u8(kind)?;
                buffer.write_u8(pdu.invoke_id)?;
                buffer.write_u8(pdu.reason.into())?;
            }
            Apdu::Abort(pdu) => {
                let first = if pdu.server { kind | flags::SERVER } else { kind };
                buffer.write_u8(first)?;
                buffer.write_u8(pdu.invoke_id)?;
                buffer.write_u8(pdu.reason.into())?;
            }
        }

        tracing::trace!("Encoded {:?} ({} bytes)", apdu.pdu_type(), buffer.len());
        Ok(())
    }

    /// Encodes a single APDU into a new byte vector.
    pub fn encode(apdu: &Apdu) -> io::Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(Self::encoded_len(apdu));
        Self::encode_into(&mut buffer, apdu)?;
        Ok(buffer)
    }

    /// Returns the number of bytes `apdu` occupies on the wire.
    pub fn encoded_len(apdu: &Apdu) -> usize {
        let segment_header = |segment: Option<&SegmentInfo>| if segment.is_some() { 2 } else { 0 };
        match apdu {
            Apdu::ConfirmedRequest(pdu) => {
                4 + segment_header(pdu.segment.as_ref()) + pdu.payload.len()
            }
            Apdu::UnconfirmedRequest(pdu) => 2 + pdu.payload.len(),
            Apdu::SimpleAck(_) => 3,
            Apdu::ComplexAck(pdu) => 3 + segment_header(pdu.segment.as_ref()) + pdu.payload.len(),
            Apdu::SegmentAck(_) => 4,
            Apdu::Error(pdu) => 3 + pdu.payload.len(),
            Apdu::Reject(_) | Apdu::Abort(_) => 3,
        }
    }
}

fn segment_flags(segment: Option<&SegmentInfo>) -> u8 {
    match segment {
        Some(info) if info.more_follows => flags::SEGMENTED | flags::MORE_FOLLOWS,
        Some(_) => flags::SEGMENTED,
        None => 0,
    }
}

fn write_segment_header(buffer: &mut Vec<u8>, segment: Option<&SegmentInfo>) -> io::Result<()> {
    if let Some(info) = segment {
        buffer.write_u8(info.sequence_number)?;
        buffer.write_u8(info.proposed_window_size)?;
    }
    Ok(())
}
