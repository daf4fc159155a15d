//! APDU decoding.
//!
//! Reads the PDU kind from the high nibble of the first octet and then the
//! fixed header of that kind. Whatever follows the header is the payload.

use std::{
    convert::TryFrom,
    io::{self, Cursor},
};

use bacflow_core::{constants::MAX_WINDOW_SIZE, error::DecodeError, payload::Payload};
use byteorder::ReadBytesExt;

use super::flags;
use crate::apdu::{
    max_apdu_length, AbortPdu, Apdu, ComplexAck, ConfirmedRequest, ErrorPdu, MaxSegments,
    PduType, RejectPdu, SegmentAck, SegmentInfo, SimpleAck, UnconfirmedRequest,
};

/// Deserializes APDUs from network bytes.
pub struct ApduDecoder;

impl ApduDecoder {
    /// Decodes one APDU occupying all of `data`.
    pub fn decode(data: &[u8]) -> Result<Apdu, DecodeError> {
        let mut cursor = Cursor::new(data);
        let first = cursor.read_u8().map_err(|_| DecodeError::EmptyFrame)?;
        let pdu_type = PduType::try_from(first >> 4)?;

        let apdu = match pdu_type {
            PduType::ConfirmedRequest => {
                let limits = read(&mut cursor)?;
                let invoke_id = read(&mut cursor)?;
                let segment = read_segment_header(&mut cursor, first)?;
                let service_choice = read(&mut cursor)?;
                Apdu::ConfirmedRequest(ConfirmedRequest {
                    invoke_id,
                    segment,
                    segmented_response_accepted: first & flags::SEGMENTED_RESPONSE_ACCEPTED != 0,
                    max_segments_accepted: MaxSegments::from_code(limits >> 4),
                    max_apdu_length_accepted: max_apdu_length(limits & 0x0F),
                    service_choice,
                    payload: remaining(&cursor),
                })
            }
            PduType::UnconfirmedRequest => {
                let service_choice = read(&mut cursor)?;
                Apdu::UnconfirmedRequest(UnconfirmedRequest {
                    service_choice,
                    payload: remaining(&cursor),
                })
            }
            PduType::SimpleAck => {
                let invoke_id = read(&mut cursor)?;
                let service_choice = read(&mut cursor)?;
                Apdu::SimpleAck(SimpleAck { invoke_id, service_choice })
            }
            PduType::ComplexAck => {
                let invoke_id = read(&mut cursor)?;
                let segment = read_segment_header(&mut cursor, first)?;
                let service_choice = read(&mut cursor)?;
                Apdu::ComplexAck(ComplexAck {
                    invoke_id,
                    segment,
                    service_choice,
                    payload: remaining(&cursor),
                })
            }
            PduType::SegmentAck => {
                let invoke_id = read(&mut cursor)?;
                let sequence_number = read(&mut cursor)?;
                let actual_window_size = read_window(&mut cursor)?;
                Apdu::SegmentAck(SegmentAck {
                    invoke_id,
                    negative: first & flags::NEGATIVE_ACK != 0,
                    server: first & flags::SERVER != 0,
                    sequence_number,
                    actual_window_size,
                })
            }
            PduType::Error => {
                let invoke_id = read(&mut cursor)?;
                let service_choice = read(&mut cursor)?;
                Apdu::Error(ErrorPdu { invoke_id, service_choice, payload: remaining(&cursor) })
            }
            PduType::Reject => {
                let invoke_id = read(&mut cursor)?;
                let reason = read(&mut cursor)?;
                Apdu::Reject(RejectPdu { invoke_id, reason: reason.into() })
            }
            PduType::Abort => {
                let invoke_id = read(&mut cursor)?;
                let reason = read(&mut cursor)?;
                Apdu::Abort(AbortPdu {
                    invoke_id,
                    server: first & flags::SERVER != 0,
                    reason: reason.into(),
                })
            }
        };

        tracing::trace!("Decoded {:?} ({} bytes)", pdu_type, data.len());
        Ok(apdu)
    }
}

fn read(cursor: &mut Cursor<&[u8]>) -> Result<u8, DecodeError> {
    cursor.read_u8().map_err(truncated)
}

fn read_window(cursor: &mut Cursor<&[u8]>) -> Result<u8, DecodeError> {
    let window = read(cursor)?;
    if window == 0 || window > MAX_WINDOW_SIZE {
        return Err(DecodeError::InvalidWindowSize(window));
    }
    Ok(window)
}

fn read_segment_header(
    cursor: &mut Cursor<&[u8]>,
    first: u8,
) -> Result<Option<SegmentInfo>, DecodeError> {
    if first & flags::SEGMENTED == 0 {
        return Ok(None);
    }
    let sequence_number = read(cursor)?;
    let proposed_window_size = read_window(cursor)?;
    Ok(Some(SegmentInfo {
        sequence_number,
        proposed_window_size,
        more_follows: first & flags::MORE_FOLLOWS != 0,
    }))
}

fn remaining(cursor: &Cursor<&[u8]>) -> Payload {
    let data = *cursor.get_ref();
    let position = (cursor.position() as usize).min(data.len());
    Payload::from(&data[position..])
}

fn truncated(_: io::Error) -> DecodeError {
    DecodeError::Truncated
}
