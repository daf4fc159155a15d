/// Transaction state machine.
///
/// Initiators move from the first request through optional segment windows to
/// the reply; responders move from reassembly through dispatch to their own
/// (possibly segmented) reply. Both end in `Complete` or `Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionState {
    /// Initiator: unsegmented request sent, waiting for the reply
    #[default]
    AwaitingFirstReply,

    /// Segments are being sent and more windows remain after the outstanding one
    SendingSegments,

    /// The final window of segments is outstanding, waiting for its SegmentACK
    AwaitingWindowAck,

    /// Initiator: every request segment acknowledged, waiting for the reply
    AwaitingFinalReply,

    /// Initiator: receiving the segments of a segmented ComplexACK
    AwaitingReplySegments,

    /// Responder: receiving the segments of a segmented request
    ReceivingSegments,

    /// Responder: full request handed to the service handler, reply pending
    Dispatching,

    /// Transaction finished normally
    Complete,

    /// Transaction ended by an abort, reject, error or timeout
    Aborted,
}

impl TransactionState {
    /// Returns true once the transaction is finished and may be removed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionState::Complete | TransactionState::Aborted)
    }

    /// Returns true while this side owes the peer more segments.
    pub fn is_sending_segments(&self) -> bool {
        matches!(self, TransactionState::SendingSegments | TransactionState::AwaitingWindowAck)
    }

    /// Returns true while segments from the peer are being reassembled.
    pub fn is_receiving_segments(&self) -> bool {
        matches!(self, TransactionState::AwaitingReplySegments | TransactionState::ReceivingSegments)
    }

    /// Returns true while an initiator may accept the reply to its request.
    pub fn awaits_reply(&self) -> bool {
        matches!(
            self,
            TransactionState::AwaitingFirstReply
                | TransactionState::SendingSegments
                | TransactionState::AwaitingWindowAck
                | TransactionState::AwaitingFinalReply
        )
    }
}
