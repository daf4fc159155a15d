//! APDU types for the confirmed/unconfirmed service envelope.
//!
//! Every PDU kind is a plain struct; [`Apdu`] is the closed set of them.
//! The service payload is never interpreted here, it travels as an opaque
//! [`Payload`].

use std::{convert::TryFrom, io::Cursor};

use bacflow_core::{
    constants::MAX_APDU_LENGTH,
    error::DecodeError,
    payload::Payload,
};
use byteorder::{BigEndian, ReadBytesExt};

/// 8-bit request correlation identifier.
pub type InvokeId = u8;
/// 8-bit segment sequence number (wraps at 256).
pub type SequenceNumber = u8;

/// PDU kind, carried in the high nibble of the first octet.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PduType {
    /// Request that expects a reply
    ConfirmedRequest = 0,
    /// Fire-and-forget request
    UnconfirmedRequest = 1,
    /// Positive reply without data
    SimpleAck = 2,
    /// Positive reply with data, possibly segmented
    ComplexAck = 3,
    /// Acknowledgment of received segments
    SegmentAck = 4,
    /// Service-level failure
    Error = 5,
    /// Protocol-level refusal
    Reject = 6,
    /// Transaction termination
    Abort = 7,
}

impl PduType {
    /// Returns the nibble value of this type.
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for PduType {
    type Error = DecodeError;
    /// Gets the `PduType` from the nibble value (0-15).
    fn try_from(value: u8) -> Result<Self, DecodeError> {
        match value {
            0 => Ok(PduType::ConfirmedRequest),
            1 => Ok(PduType::UnconfirmedRequest),
            2 => Ok(PduType::SimpleAck),
            3 => Ok(PduType::ComplexAck),
            4 => Ok(PduType::SegmentAck),
            5 => Ok(PduType::Error),
            6 => Ok(PduType::Reject),
            7 => Ok(PduType::Abort),
            other => Err(DecodeError::UnknownPduType(other)),
        }
    }
}

/// Max-segments-accepted hint, a 3-bit code on the wire.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum MaxSegments {
    /// No limit announced
    #[default]
    Unspecified,
    /// Up to 2 segments
    Two,
    /// Up to 4 segments
    Four,
    /// Up to 8 segments
    Eight,
    /// Up to 16 segments
    Sixteen,
    /// Up to 32 segments
    ThirtyTwo,
    /// Up to 64 segments
    SixtyFour,
    /// More than 64 segments
    MoreThanSixtyFour,
}

impl MaxSegments {
    /// Returns the 3-bit wire code.
    pub fn code(self) -> u8 {
        match self {
            MaxSegments::Unspecified => 0,
            MaxSegments::Two => 1,
            MaxSegments::Four => 2,
            MaxSegments::Eight => 3,
            MaxSegments::Sixteen => 4,
            MaxSegments::ThirtyTwo => 5,
            MaxSegments::SixtyFour => 6,
            MaxSegments::MoreThanSixtyFour => 7,
        }
    }

    /// Builds the hint from a 3-bit wire code. Higher bits are ignored.
    pub fn from_code(code: u8) -> Self {
        match code & 0x07 {
            0 => MaxSegments::Unspecified,
            1 => MaxSegments::Two,
            2 => MaxSegments::Four,
            3 => MaxSegments::Eight,
            4 => MaxSegments::Sixteen,
            5 => MaxSegments::ThirtyTwo,
            6 => MaxSegments::SixtyFour,
            _ => MaxSegments::MoreThanSixtyFour,
        }
    }

    /// Largest encodable hint not above `count`. `None` maps to `Unspecified`.
    pub fn from_count(count: Option<u8>) -> Self {
        match count {
            None => MaxSegments::Unspecified,
            Some(n) if n > 64 => MaxSegments::MoreThanSixtyFour,
            Some(n) if n >= 64 => MaxSegments::SixtyFour,
            Some(n) if n >= 32 => MaxSegments::ThirtyTwo,
            Some(n) if n >= 16 => MaxSegments::Sixteen,
            Some(n) if n >= 8 => MaxSegments::Eight,
            Some(n) if n >= 4 => MaxSegments::Four,
            Some(n) if n >= 2 => MaxSegments::Two,
            Some(_) => MaxSegments::Unspecified,
        }
    }

    /// Number of segments this hint allows, or `None` when it imposes no limit.
    pub fn limit(self) -> Option<usize> {
        match self {
            MaxSegments::Unspecified | MaxSegments::MoreThanSixtyFour => None,
            MaxSegments::Two => Some(2),
            MaxSegments::Four => Some(4),
            MaxSegments::Eight => Some(8),
            MaxSegments::Sixteen => Some(16),
            MaxSegments::ThirtyTwo => Some(32),
            MaxSegments::SixtyFour => Some(64),
        }
    }
}

const MAX_APDU_TABLE: [u16; 6] = [50, 128, 206, 480, 1024, 1476];

/// Encodes an accepted APDU length as the 4-bit code: the largest standard
/// size not above `length`.
pub fn max_apdu_code(length: u16) -> u8 {
    MAX_APDU_TABLE.iter().rposition(|&size| size <= length).unwrap_or(0) as u8
}

/// Decodes the 4-bit max-APDU code. Reserved codes read as the largest size.
pub fn max_apdu_length(code: u8) -> u16 {
    MAX_APDU_TABLE.get((code & 0x0F) as usize).copied().unwrap_or(MAX_APDU_LENGTH)
}

/// Why a transaction was aborted.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AbortReason {
    /// Unspecified
    Other,
    /// Receiver ran out of buffer space
    BufferOverflow,
    /// PDU not valid in the current transaction state
    InvalidApduInThisState,
    /// Preempted by a higher priority task
    PreemptedByHigherPriorityTask,
    /// Segmentation needed but not supported
    SegmentationNotSupported,
    /// Security failure
    SecurityError,
    /// Insufficient security
    InsufficientSecurity,
    /// Proposed window size outside 1..=127
    WindowSizeOutOfRange,
    /// Application exceeded the reply time
    ApplicationExceededReplyTime,
    /// Out of resources
    OutOfResources,
    /// Transaction state machine timed out
    TsmTimeout,
    /// APDU too long
    ApduTooLong,
    /// Reason code this stack does not name
    Unknown(u8),
}

impl From<u8> for AbortReason {
    fn from(value: u8) -> Self {
        match value {
            0 => AbortReason::Other,
            1 => AbortReason::BufferOverflow,
            2 => AbortReason::InvalidApduInThisState,
            3 => AbortReason::PreemptedByHigherPriorityTask,
            4 => AbortReason::SegmentationNotSupported,
            5 => AbortReason::SecurityError,
            6 => AbortReason::InsufficientSecurity,
            7 => AbortReason::WindowSizeOutOfRange,
            8 => AbortReason::ApplicationExceededReplyTime,
            9 => AbortReason::OutOfResources,
            10 => AbortReason::TsmTimeout,
            11 => AbortReason::ApduTooLong,
            other => AbortReason::Unknown(other),
        }
    }
}

impl From<AbortReason> for u8 {
    fn from(reason: AbortReason) -> u8 {
        match reason {
            AbortReason::Other => 0,
            AbortReason::BufferOverflow => 1,
            AbortReason::InvalidApduInThisState => 2,
            AbortReason::PreemptedByHigherPriorityTask => 3,
            AbortReason::SegmentationNotSupported => 4,
            AbortReason::SecurityError => 5,
            AbortReason::InsufficientSecurity => 6,
            AbortReason::WindowSizeOutOfRange => 7,
            AbortReason::ApplicationExceededReplyTime => 8,
            AbortReason::OutOfResources => 9,
            AbortReason::TsmTimeout => 10,
            AbortReason::ApduTooLong => 11,
            AbortReason::Unknown(other) => other,
        }
    }
}

/// Why a confirmed request was rejected.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// Unspecified
    Other,
    /// Request too large for the receiver
    BufferOverflow,
    /// Parameters contradict each other
    InconsistentParameters,
    /// Parameter has the wrong datatype
    InvalidParameterDataType,
    /// Malformed tag
    InvalidTag,
    /// Required parameter missing
    MissingRequiredParameter,
    /// Parameter out of range
    ParameterOutOfRange,
    /// Too many arguments
    TooManyArguments,
    /// Enumeration value not defined
    UndefinedEnumeration,
    /// Service choice not recognised
    UnrecognizedService,
    /// Reason code this stack does not name
    Unknown(u8),
}

impl From<u8> for RejectReason {
    fn from(value: u8) -> Self {
        match value {
            0 => RejectReason::Other,
            1 => RejectReason::BufferOverflow,
            2 => RejectReason::InconsistentParameters,
            3 => RejectReason::InvalidParameterDataType,
            4 => RejectReason::InvalidTag,
            5 => RejectReason::MissingRequiredParameter,
            6 => RejectReason::ParameterOutOfRange,
            7 => RejectReason::TooManyArguments,
            8 => RejectReason::UndefinedEnumeration,
            9 => RejectReason::UnrecognizedService,
            other => RejectReason::Unknown(other),
        }
    }
}

impl From<RejectReason> for u8 {
    fn from(reason: RejectReason) -> u8 {
        match reason {
            RejectReason::Other => 0,
            RejectReason::BufferOverflow => 1,
            RejectReason::InconsistentParameters => 2,
            RejectReason::InvalidParameterDataType => 3,
            RejectReason::InvalidTag => 4,
            RejectReason::MissingRequiredParameter => 5,
            RejectReason::ParameterOutOfRange => 6,
            RejectReason::TooManyArguments => 7,
            RejectReason::UndefinedEnumeration => 8,
            RejectReason::UnrecognizedService => 9,
            RejectReason::Unknown(other) => other,
        }
    }
}

/// Segmentation header shared by ConfirmedRequest and ComplexACK.
///
/// Present only when the message is segmented.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SegmentInfo {
    /// Sequence number of this segment
    pub sequence_number: SequenceNumber,
    /// Window size proposed by the sender (1-127)
    pub proposed_window_size: u8,
    /// More segments follow this one
    pub more_follows: bool,
}

/// Confirmed service request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfirmedRequest {
    /// Request correlation id
    pub invoke_id: InvokeId,
    /// Segmentation header, if segmented
    pub segment: Option<SegmentInfo>,
    /// The sender accepts a segmented reply
    pub segmented_response_accepted: bool,
    /// Max segments the sender accepts in the reply
    pub max_segments_accepted: MaxSegments,
    /// Max APDU length the sender accepts, in octets
    pub max_apdu_length_accepted: u16,
    /// Confirmed service choice
    pub service_choice: u8,
    /// Service request bytes (this segment's share if segmented)
    pub payload: Payload,
}

/// Unconfirmed service request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnconfirmedRequest {
    /// Unconfirmed service choice
    pub service_choice: u8,
    /// Service request bytes
    pub payload: Payload,
}

/// Positive reply carrying no data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimpleAck {
    /// Invoke id of the request being answered
    pub invoke_id: InvokeId,
    /// Service choice of the request being answered
    pub service_choice: u8,
}

/// Positive reply carrying data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComplexAck {
    /// Invoke id of the request being answered
    pub invoke_id: InvokeId,
    /// Segmentation header, if segmented
    pub segment: Option<SegmentInfo>,
    /// Service choice of the request being answered
    pub service_choice: u8,
    /// Service ack bytes (this segment's share if segmented)
    pub payload: Payload,
}

/// Acknowledgment of received segments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SegmentAck {
    /// Invoke id of the transaction
    pub invoke_id: InvokeId,
    /// Gap detected: resend everything after `sequence_number`
    pub negative: bool,
    /// Sent by the responding (server) side
    pub server: bool,
    /// Last segment received in order
    pub sequence_number: SequenceNumber,
    /// Window the receiver grants for the next batch
    pub actual_window_size: u8,
}

/// Service-level failure reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorPdu {
    /// Invoke id of the request being answered
    pub invoke_id: InvokeId,
    /// Service choice of the request being answered
    pub service_choice: u8,
    /// Error payload (error class and code, possibly more)
    pub payload: Payload,
}

impl ErrorPdu {
    /// Reads the error class and error code from the leading two
    /// application-tagged enumerated values of the payload, when present.
    pub fn class_and_code(&self) -> Option<(u32, u32)> {
        let mut cursor = Cursor::new(self.payload.as_slice());
        let class = read_enumerated(&mut cursor)?;
        let code = read_enumerated(&mut cursor)?;
        Some((class, code))
    }

    /// Builds an error payload from a class and code as two application-tagged enumerated values.
    pub fn encode_class_and_code(error_class: u32, error_code: u32) -> Payload {
        let mut buffer = Vec::with_capacity(10);
        write_enumerated(&mut buffer, error_class);
        write_enumerated(&mut buffer, error_code);
        Payload::from_vec(buffer)
    }
}

// Application tag 9 (enumerated), length in the low three bits.
const ENUMERATED_TAG: u8 = 0x90;

fn read_enumerated(cursor: &mut Cursor<&[u8]>) -> Option<u32> {
    let tag = cursor.read_u8().ok()?;
    if tag & 0xF8 != ENUMERATED_TAG {
        return None;
    }
    let len = (tag & 0x07) as usize;
    if !(1..=4).contains(&len) {
        return None;
    }
    cursor.read_uint::<BigEndian>(len).ok().map(|value| value as u32)
}

fn write_enumerated(buffer: &mut Vec<u8>, value: u32) {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take(3).take_while(|&&b| b == 0).count();
    buffer.push(ENUMERATED_TAG | (4 - skip) as u8);
    buffer.extend_from_slice(&bytes[skip..]);
}

/// Protocol-level refusal of a confirmed request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RejectPdu {
    /// Invoke id of the request being rejected
    pub invoke_id: InvokeId,
    /// Reject reason
    pub reason: RejectReason,
}

/// Termination of a transaction by either side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AbortPdu {
    /// Invoke id of the transaction
    pub invoke_id: InvokeId,
    /// Sent by the responding (server) side
    pub server: bool,
    /// Abort reason
    pub reason: AbortReason,
}

/// The closed set of application PDUs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Apdu {
    /// Confirmed service request
    ConfirmedRequest(ConfirmedRequest),
    /// Unconfirmed service request
    UnconfirmedRequest(UnconfirmedRequest),
    /// Positive reply without data
    SimpleAck(SimpleAck),
    /// Positive reply with data
    ComplexAck(ComplexAck),
    /// Segment acknowledgment
    SegmentAck(SegmentAck),
    /// Service error
    Error(ErrorPdu),
    /// Reject
    Reject(RejectPdu),
    /// Abort
    Abort(AbortPdu),
}

impl Apdu {
    /// Returns the PDU kind.
    pub fn pdu_type(&self) -> PduType {
        match self {
            Apdu::ConfirmedRequest(_) => PduType::ConfirmedRequest,
            Apdu::UnconfirmedRequest(_) => PduType::UnconfirmedRequest,
            Apdu::SimpleAck(_) => PduType::SimpleAck,
            Apdu::ComplexAck(_) => PduType::ComplexAck,
            Apdu::SegmentAck(_) => PduType::SegmentAck,
            Apdu::Error(_) => PduType::Error,
            Apdu::Reject(_) => PduType::Reject,
            Apdu::Abort(_) => PduType::Abort,
        }
    }

    /// Returns the (original) invoke id; every kind but UnconfirmedRequest has one.
    pub fn invoke_id(&self) -> Option<InvokeId> {
        match self {
            Apdu::ConfirmedRequest(pdu) => Some(pdu.invoke_id),
            Apdu::UnconfirmedRequest(_) => None,
            Apdu::SimpleAck(pdu) => Some(pdu.invoke_id),
            Apdu::ComplexAck(pdu) => Some(pdu.invoke_id),
            Apdu::SegmentAck(pdu) => Some(pdu.invoke_id),
            Apdu::Error(pdu) => Some(pdu.invoke_id),
            Apdu::Reject(pdu) => Some(pdu.invoke_id),
            Apdu::Abort(pdu) => Some(pdu.invoke_id),
        }
    }

    /// Returns true if the receiver of this PDU owes a reply.
    pub fn expects_reply(&self) -> bool {
        matches!(self, Apdu::ConfirmedRequest(_))
    }

    /// Returns true if this PDU was sent by the responding side of a transaction,
    /// and so belongs to a transaction the receiver initiated.
    pub fn sent_by_server(&self) -> bool {
        match self {
            Apdu::ConfirmedRequest(_) | Apdu::UnconfirmedRequest(_) => false,
            Apdu::SimpleAck(_) | Apdu::ComplexAck(_) | Apdu::Error(_) | Apdu::Reject(_) => true,
            Apdu::SegmentAck(pdu) => pdu.server,
            Apdu::Abort(pdu) => pdu.server,
        }
    }

    /// Returns the segmentation header for segmented requests and acks.
    pub fn segment(&self) -> Option<&SegmentInfo> {
        match self {
            Apdu::ConfirmedRequest(pdu) => pdu.segment.as_ref(),
            Apdu::ComplexAck(pdu) => pdu.segment.as_ref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pdu_type_from_nibble() {
        assert_eq!(PduType::try_from(3).unwrap(), PduType::ComplexAck);
        assert_eq!(PduType::try_from(9), Err(DecodeError::UnknownPduType(9)));
    }

    #[test]
    fn test_max_apdu_codes() {
        assert_eq!(max_apdu_code(1476), 5);
        assert_eq!(max_apdu_code(1500), 5);
        assert_eq!(max_apdu_code(506), 3);
        assert_eq!(max_apdu_code(50), 0);
        assert_eq!(max_apdu_length(3), 480);
        assert_eq!(max_apdu_length(0x0F), 1476);
    }

    #[test]
    fn test_max_segments_from_count() {
        assert_eq!(MaxSegments::from_count(None), MaxSegments::Unspecified);
        assert_eq!(MaxSegments::from_count(Some(64)), MaxSegments::SixtyFour);
        assert_eq!(MaxSegments::from_count(Some(20)), MaxSegments::Sixteen);
        assert_eq!(MaxSegments::from_count(Some(200)), MaxSegments::MoreThanSixtyFour);
        assert_eq!(MaxSegments::from_code(MaxSegments::Eight.code()), MaxSegments::Eight);
        assert_eq!(MaxSegments::Eight.limit(), Some(8));
    }

    #[test]
    fn test_reason_codes() {
        assert_eq!(AbortReason::from(4), AbortReason::SegmentationNotSupported);
        assert_eq!(u8::from(AbortReason::Unknown(200)), 200);
        assert_eq!(RejectReason::from(9), RejectReason::UnrecognizedService);
        assert_eq!(u8::from(RejectReason::BufferOverflow), 1);
    }

    #[test]
    fn test_error_class_and_code() {
        let pdu = ErrorPdu {
            invoke_id: 1,
            service_choice: 12,
            payload: ErrorPdu::encode_class_and_code(2, 32),
        };
        assert_eq!(pdu.payload.as_slice(), &[0x91, 0x02, 0x91, 0x20]);
        assert_eq!(pdu.class_and_code(), Some((2, 32)));

        let wide = ErrorPdu { payload: ErrorPdu::encode_class_and_code(1, 300), ..pdu };
        assert_eq!(wide.class_and_code(), Some((1, 300)));

        let opaque = ErrorPdu { invoke_id: 1, service_choice: 12, payload: vec![0x01].into() };
        assert_eq!(opaque.class_and_code(), None);
    }

    #[test]
    fn test_direction() {
        let ack = Apdu::SegmentAck(SegmentAck {
            invoke_id: 1,
            negative: false,
            server: true,
            sequence_number: 0,
            actual_window_size: 1,
        });
        assert!(ack.sent_by_server());
        assert!(!ack.expects_reply());
        let abort = Apdu::Abort(AbortPdu { invoke_id: 1, server: false, reason: AbortReason::Other });
        assert!(!abort.sent_by_server());
    }
}
