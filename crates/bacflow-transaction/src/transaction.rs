//! One confirmed exchange and its pure transition functions.
//!
//! A [`Transaction`] never performs I/O. Each transition returns the
//! [`Action`]s the caller must carry out (frames to send, requests to hand to
//! the service handler, reply futures to resolve) once the table lock is
//! released. The same transitions are driven by received PDUs and by the
//! timeout driver.

use std::{net::SocketAddr, time::Instant};

use bacflow_core::{
    config::Config,
    constants::{
        COMPLEX_ACK_HEADER_SIZE, CONFIRMED_REQUEST_HEADER_SIZE, SEGMENTED_COMPLEX_ACK_HEADER_SIZE,
        SEGMENTED_REQUEST_HEADER_SIZE,
    },
    payload::Payload,
};
use bacflow_protocol::{
    AbortPdu, AbortReason, AckOutcome, Apdu, ComplexAck, ConfirmedRequest, ErrorPdu, InvokeId,
    MaxSegments, OutgoingSegment, ReassemblyBuffer, RejectPdu, RejectReason, SegmentAck,
    SegmentInfo, SegmentVerdict, SegmentWindow, SimpleAck,
};

use crate::{
    reply::{Reply, ReplyCompleter, ReplyResult, TimeoutStage, TransactionError},
    state::TransactionState,
};

/// Which side of the exchange this node plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// This node sent the confirmed request.
    Initiator,
    /// This node received the confirmed request.
    Responder,
}

/// Identifies a transaction: peer address, invoke id and direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionKey {
    /// Address of the other party
    pub peer: SocketAddr,
    /// Invoke id chosen by the initiator
    pub invoke_id: InvokeId,
    /// Our side of the exchange
    pub role: Role,
}

/// A complete confirmed request ready for the service handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingRequest {
    /// Responder transaction that will carry the answer
    pub key: TransactionKey,
    /// Confirmed service choice
    pub service_choice: u8,
    /// Reassembled service request bytes
    pub payload: Payload,
}

/// Positive answer produced by a service handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceResponse {
    /// Answer with a SimpleACK.
    SimpleAck,
    /// Answer with a ComplexACK carrying these bytes, segmented if needed.
    ComplexAck(Payload),
}

/// Negative answer produced by a service handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceFailure {
    /// Answer with an Error PDU.
    Error {
        /// Error class
        error_class: u32,
        /// Error code
        error_code: u32,
    },
    /// Answer with a Reject PDU.
    Reject(RejectReason),
    /// Answer with an Abort PDU.
    Abort(AbortReason),
}

/// Side effect requested by a transition.
#[derive(Debug)]
pub enum Action {
    /// Encode and send the PDU to `peer`
    Send {
        /// Destination
        peer: SocketAddr,
        /// PDU to send
        apdu: Apdu,
    },
    /// Hand a complete request to the service handler
    Dispatch(IncomingRequest),
    /// Resolve an initiator's reply future
    Resolve {
        /// Writing half of the caller's future
        completer: ReplyCompleter,
        /// Outcome of the transaction
        result: ReplyResult,
    },
}

/// Header fields of the confirmed request, shared by every segment.
///
/// For an initiator these are our own limits; for a responder they are the
/// limits the initiator announced, which bound the reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RequestHeader {
    segmented_response_accepted: bool,
    max_segments: MaxSegments,
    max_apdu: u16,
}

impl RequestHeader {
    fn local(config: &Config) -> Self {
        Self {
            segmented_response_accepted: config.segmented_response_accepted
                && config.segmentation_supported,
            max_segments: MaxSegments::from_count(config.max_segments_accepted),
            max_apdu: config.max_apdu_length_accepted,
        }
    }

    fn from_request(request: &ConfirmedRequest) -> Self {
        Self {
            segmented_response_accepted: request.segmented_response_accepted,
            max_segments: request.max_segments_accepted,
            max_apdu: request.max_apdu_length_accepted,
        }
    }
}

/// State of one confirmed exchange.
#[derive(Debug)]
pub struct Transaction {
    key: TransactionKey,
    state: TransactionState,
    service_choice: u8,
    header: RequestHeader,
    retry_count: u8,
    deadline: Option<Instant>,
    /// Unsegmented request resent when no reply arrives
    last_frame: Option<Apdu>,
    /// Outgoing segmented request (initiator) or reply (responder)
    window: Option<SegmentWindow>,
    /// Incoming segmented reply (initiator) or request (responder)
    reassembly: Option<ReassemblyBuffer>,
    proposed_window_size: u8,
    completer: Option<ReplyCompleter>,
}

impl Transaction {
    fn new(
        key: TransactionKey,
        service_choice: u8,
        header: RequestHeader,
        completer: Option<ReplyCompleter>,
        config: &Config,
    ) -> Self {
        Self {
            key,
            state: TransactionState::default(),
            service_choice,
            header,
            retry_count: 0,
            deadline: None,
            last_frame: None,
            window: None,
            reassembly: None,
            proposed_window_size: config.proposed_window_size,
            completer,
        }
    }

    /// Opens an initiator transaction and returns the frames of the request.
    ///
    /// Requests that fit one APDU go out whole; larger ones are cut into
    /// segments and the first window is sent immediately.
    pub fn initiate(
        key: TransactionKey,
        service_choice: u8,
        payload: Payload,
        completer: ReplyCompleter,
        now: Instant,
        config: &Config,
    ) -> (Self, Vec<Action>) {
        let mut transaction =
            Self::new(key, service_choice, RequestHeader::local(config), Some(completer), config);
        let actions = if fits_unsegmented(&payload, CONFIRMED_REQUEST_HEADER_SIZE, config) {
            let frame = transaction.request_frame(None, payload);
            transaction.last_frame = Some(frame.clone());
            transaction.state = TransactionState::AwaitingFirstReply;
            transaction.deadline = Some(now + config.reply_timeout);
            vec![transaction.send(frame)]
        } else {
            let segment_size = config.segment_payload_size(SEGMENTED_REQUEST_HEADER_SIZE);
            let mut window = SegmentWindow::new(payload, segment_size, config.proposed_window_size);
            let batch = window.next_batch();
            tracing::debug!(
                "Segmenting request {:?} into {} segments of {} bytes",
                key,
                window.segment_count(),
                segment_size
            );
            transaction.window = Some(window);
            transaction.transmit(batch, now, config)
        };
        (transaction, actions)
    }

    /// Opens a responder transaction for the first frame of a confirmed request.
    ///
    /// Returns `None` when no transaction should exist afterwards: a stray
    /// continuation segment, or a segmented request this node refuses.
    pub fn receive_request(
        key: TransactionKey,
        request: &ConfirmedRequest,
        now: Instant,
        config: &Config,
    ) -> (Option<Self>, Vec<Action>) {
        let mut transaction = Self::new(
            key,
            request.service_choice,
            RequestHeader::from_request(request),
            None,
            config,
        );
        match request.segment {
            None => {
                transaction.state = TransactionState::Dispatching;
                let dispatch = transaction.dispatch(request.payload.clone());
                (Some(transaction), vec![dispatch])
            }
            Some(info) if info.sequence_number != 0 => {
                tracing::debug!(
                    "Dropping segment {} of unknown request {:?}",
                    info.sequence_number,
                    key
                );
                (None, Vec::new())
            }
            Some(_) if !config.segmentation_supported => {
                tracing::warn!("Refusing segmented request {:?}: segmentation disabled", key);
                let actions = transaction.abort_with(AbortReason::SegmentationNotSupported);
                (None, actions)
            }
            Some(info) => {
                transaction.start_reassembly(&info, now, config);
                transaction.state = TransactionState::ReceivingSegments;
                let actions = transaction.receive_segment(&info, &request.payload, now, config);
                (Some(transaction), actions)
            }
        }
    }

    /// Identifies the transaction.
    pub fn key(&self) -> TransactionKey {
        self.key
    }

    /// Current state.
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Retransmissions since the last progress.
    pub fn retry_count(&self) -> u8 {
        self.retry_count
    }

    /// When the timeout driver must next look at this transaction.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns true if the deadline has passed at `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Applies a PDU received from the peer.
    pub fn on_pdu(&mut self, apdu: &Apdu, now: Instant, config: &Config) -> Vec<Action> {
        if self.state.is_terminal() {
            return Vec::new();
        }
        match (self.key.role, apdu) {
            (_, Apdu::SegmentAck(ack)) => self.on_segment_ack(ack, now, config),
            (Role::Initiator, Apdu::SimpleAck(ack)) if self.state.awaits_reply() => self.finish(
                Ok(Reply::SimpleAck { service_choice: ack.service_choice }),
                TransactionState::Complete,
            ),
            (Role::Initiator, Apdu::ComplexAck(ack)) => self.on_complex_ack(ack, now, config),
            (Role::Initiator, Apdu::Error(pdu)) => {
                let (error_class, error_code) = match pdu.class_and_code() {
                    Some((class, code)) => (Some(class), Some(code)),
                    None => (None, None),
                };
                self.finish(
                    Err(TransactionError::PeerError {
                        service_choice: pdu.service_choice,
                        error_class,
                        error_code,
                        payload: pdu.payload.clone(),
                    }),
                    TransactionState::Aborted,
                )
            }
            (Role::Initiator, Apdu::Reject(pdu)) => {
                tracing::warn!("Request {:?} rejected: {:?}", self.key, pdu.reason);
                self.finish(
                    Err(TransactionError::PeerReject { reason: pdu.reason }),
                    TransactionState::Aborted,
                )
            }
            (_, Apdu::Abort(pdu)) => {
                tracing::warn!("Peer aborted {:?}: {:?}", self.key, pdu.reason);
                self.finish(
                    Err(TransactionError::PeerAbort { reason: pdu.reason, server: pdu.server }),
                    TransactionState::Aborted,
                )
            }
            (Role::Responder, Apdu::ConfirmedRequest(request)) => match request.segment {
                Some(info) if self.state == TransactionState::ReceivingSegments => {
                    self.receive_segment(&info, &request.payload, now, config)
                }
                _ => {
                    tracing::debug!("Ignoring repeated request for {:?} in {:?}", self.key, self.state);
                    Vec::new()
                }
            },
            (_, other) => {
                tracing::debug!(
                    "Ignoring {:?} for {:?} in {:?}",
                    other.pdu_type(),
                    self.key,
                    self.state
                );
                Vec::new()
            }
        }
    }

    /// Sends the service handler's answer to a dispatched request.
    pub fn respond(
        &mut self,
        response: Result<ServiceResponse, ServiceFailure>,
        now: Instant,
        config: &Config,
    ) -> Vec<Action> {
        if self.state != TransactionState::Dispatching {
            tracing::debug!("Dropping late response for {:?} in {:?}", self.key, self.state);
            return Vec::new();
        }
        let invoke_id = self.key.invoke_id;
        match response {
            Ok(ServiceResponse::SimpleAck) => {
                self.state = TransactionState::Complete;
                vec![self.send(Apdu::SimpleAck(SimpleAck {
                    invoke_id,
                    service_choice: self.service_choice,
                }))]
            }
            Ok(ServiceResponse::ComplexAck(payload)) => self.send_complex_ack(payload, now, config),
            Err(ServiceFailure::Error { error_class, error_code }) => {
                self.state = TransactionState::Complete;
                vec![self.send(Apdu::Error(ErrorPdu {
                    invoke_id,
                    service_choice: self.service_choice,
                    payload: ErrorPdu::encode_class_and_code(error_class, error_code),
                }))]
            }
            Err(ServiceFailure::Reject(reason)) => {
                self.state = TransactionState::Complete;
                vec![self.send(Apdu::Reject(RejectPdu { invoke_id, reason }))]
            }
            Err(ServiceFailure::Abort(reason)) => self.abort_with(reason),
        }
    }

    /// Applies an elapsed deadline: retransmit, or give up once retries run out.
    pub fn on_timeout(&mut self, now: Instant, config: &Config) -> Vec<Action> {
        let can_retry = self.retry_count < config.max_retries;
        match self.state {
            TransactionState::AwaitingFirstReply => match self.last_frame.clone() {
                Some(frame) if can_retry => {
                    self.retry_count += 1;
                    self.deadline = Some(now + config.reply_timeout);
                    tracing::warn!(
                        "No reply for {:?}, resending (retry {}/{})",
                        self.key,
                        self.retry_count,
                        config.max_retries
                    );
                    vec![self.send(frame)]
                }
                _ => self.time_out(TimeoutStage::NoResponse),
            },
            TransactionState::SendingSegments | TransactionState::AwaitingWindowAck => {
                if !can_retry && self.key.role == Role::Responder {
                    // The initiator is reassembling and must hear that the reply is gone.
                    let abort = self.send(Apdu::Abort(AbortPdu {
                        invoke_id: self.key.invoke_id,
                        server: true,
                        reason: AbortReason::TsmTimeout,
                    }));
                    let mut actions = vec![abort];
                    actions.extend(self.time_out(TimeoutStage::NoAck));
                    return actions;
                }
                if !can_retry {
                    return self.time_out(TimeoutStage::NoAck);
                }
                self.retry_count += 1;
                tracing::warn!(
                    "No SegmentACK for {:?}, resending window (retry {}/{})",
                    self.key,
                    self.retry_count,
                    config.max_retries
                );
                let batch = self.window.as_mut().map(SegmentWindow::retransmit).unwrap_or_default();
                self.transmit(batch, now, config)
            }
            TransactionState::AwaitingFinalReply => {
                if !can_retry {
                    return self.time_out(TimeoutStage::NoResponse);
                }
                self.retry_count += 1;
                tracing::warn!(
                    "No reply for segmented {:?}, restarting transfer (retry {}/{})",
                    self.key,
                    self.retry_count,
                    config.max_retries
                );
                let batch = self.window.as_mut().map(SegmentWindow::restart).unwrap_or_default();
                self.transmit(batch, now, config)
            }
            TransactionState::AwaitingReplySegments | TransactionState::ReceivingSegments => {
                let stale = self
                    .reassembly
                    .as_ref()
                    .map_or(true, |buffer| buffer.is_stale(now, config.reassembly_timeout));
                if stale {
                    tracing::warn!("Reassembly for {:?} stalled, aborting", self.key);
                    self.abort_with(AbortReason::TsmTimeout)
                } else {
                    self.deadline = self
                        .reassembly
                        .as_ref()
                        .map(|buffer| buffer.last_activity() + config.reassembly_timeout);
                    Vec::new()
                }
            }
            TransactionState::Dispatching
            | TransactionState::Complete
            | TransactionState::Aborted => {
                self.deadline = None;
                Vec::new()
            }
        }
    }

    /// Aborts the transaction on behalf of a caller that cancelled its future.
    ///
    /// The future is already resolved, so the completer is dropped.
    pub fn cancel(&mut self) -> Vec<Action> {
        self.completer = None;
        if self.state.is_terminal() {
            return Vec::new();
        }
        self.abort_with(AbortReason::Other)
    }

    fn on_segment_ack(&mut self, ack: &SegmentAck, now: Instant, config: &Config) -> Vec<Action> {
        if !self.state.is_sending_segments() {
            tracing::debug!("Ignoring SegmentACK for {:?} in {:?}", self.key, self.state);
            return Vec::new();
        }
        let Some(window) = self.window.as_mut() else {
            return Vec::new();
        };
        let outcome = if ack.negative {
            tracing::debug!("NAK for {:?} after segment {}", self.key, ack.sequence_number);
            window.on_nak(ack.sequence_number, ack.actual_window_size)
        } else {
            window.on_ack(ack.sequence_number, ack.actual_window_size)
        };
        match outcome {
            AckOutcome::Advanced(batch) => {
                self.retry_count = 0;
                self.transmit(batch, now, config)
            }
            AckOutcome::Complete => {
                self.retry_count = 0;
                match self.key.role {
                    Role::Initiator => {
                        self.state = TransactionState::AwaitingFinalReply;
                        self.deadline = Some(now + config.reply_timeout);
                    }
                    Role::Responder => {
                        self.state = TransactionState::Complete;
                        self.deadline = None;
                    }
                }
                Vec::new()
            }
            AckOutcome::Ignored => {
                tracing::trace!("Stale SegmentACK {} for {:?}", ack.sequence_number, self.key);
                Vec::new()
            }
        }
    }

    fn on_complex_ack(&mut self, ack: &ComplexAck, now: Instant, config: &Config) -> Vec<Action> {
        match ack.segment {
            None if self.state.awaits_reply() => self.finish(
                Ok(Reply::ComplexAck {
                    service_choice: ack.service_choice,
                    payload: ack.payload.clone(),
                }),
                TransactionState::Complete,
            ),
            None => Vec::new(),
            Some(info) if self.state.awaits_reply() => {
                if info.sequence_number != 0 {
                    tracing::debug!(
                        "Dropping reply segment {} for {:?} before segment 0",
                        info.sequence_number,
                        self.key
                    );
                    return Vec::new();
                }
                if !self.header.segmented_response_accepted {
                    return self.abort_with(AbortReason::SegmentationNotSupported);
                }
                self.start_reassembly(&info, now, config);
                self.state = TransactionState::AwaitingReplySegments;
                self.receive_segment(&info, &ack.payload, now, config)
            }
            Some(info) if self.state == TransactionState::AwaitingReplySegments => {
                self.receive_segment(&info, &ack.payload, now, config)
            }
            Some(_) => Vec::new(),
        }
    }

    fn start_reassembly(&mut self, info: &SegmentInfo, now: Instant, config: &Config) {
        let window_size = info.proposed_window_size.min(config.proposed_window_size);
        self.reassembly = Some(ReassemblyBuffer::new(
            window_size,
            config.max_reassembly_bytes,
            config.max_segments_accepted.map(usize::from),
            now,
        ));
    }

    fn receive_segment(
        &mut self,
        info: &SegmentInfo,
        data: &[u8],
        now: Instant,
        config: &Config,
    ) -> Vec<Action> {
        let Some(buffer) = self.reassembly.as_mut() else {
            return Vec::new();
        };
        let window_size = buffer.window_size();
        let verdict = buffer.accept(info.sequence_number, info.more_follows, data, now);
        tracing::trace!("Segment {} for {:?}: {:?}", info.sequence_number, self.key, verdict);
        match verdict {
            SegmentVerdict::Accepted => {
                self.deadline = Some(now + config.reassembly_timeout);
                Vec::new()
            }
            SegmentVerdict::AckWindow { sequence_number } => {
                self.deadline = Some(now + config.reassembly_timeout);
                vec![self.segment_ack(false, sequence_number, window_size)]
            }
            SegmentVerdict::Duplicate { last_good } => {
                tracing::debug!("Duplicate segment {} for {:?}", info.sequence_number, self.key);
                vec![self.segment_ack(false, last_good, window_size)]
            }
            SegmentVerdict::Nak { last_good, error } => {
                tracing::debug!("Sending NAK({}) for {:?}: {}", last_good, self.key, error);
                self.deadline = Some(now + config.reassembly_timeout);
                vec![self.segment_ack(true, last_good, window_size)]
            }
            SegmentVerdict::Overflow(error) => {
                tracing::warn!("Reassembly for {:?} overflowed: {}", self.key, error);
                self.abort_with(AbortReason::BufferOverflow)
            }
            SegmentVerdict::Complete { sequence_number } => {
                let ack = self.segment_ack(false, sequence_number, window_size);
                let payload = self
                    .reassembly
                    .take()
                    .map(ReassemblyBuffer::into_bytes)
                    .map(Payload::from_vec)
                    .unwrap_or_default();
                let mut actions = vec![ack];
                match self.key.role {
                    Role::Initiator => actions.extend(self.finish(
                        Ok(Reply::ComplexAck { service_choice: self.service_choice, payload }),
                        TransactionState::Complete,
                    )),
                    Role::Responder => {
                        self.state = TransactionState::Dispatching;
                        self.deadline = None;
                        actions.push(self.dispatch(payload));
                    }
                }
                actions
            }
        }
    }

    fn send_complex_ack(&mut self, payload: Payload, now: Instant, config: &Config) -> Vec<Action> {
        let limit = config.max_apdu_length_accepted.min(self.header.max_apdu) as usize;
        if payload.len() + COMPLEX_ACK_HEADER_SIZE <= limit {
            self.state = TransactionState::Complete;
            return vec![self.send(Apdu::ComplexAck(ComplexAck {
                invoke_id: self.key.invoke_id,
                segment: None,
                service_choice: self.service_choice,
                payload,
            }))];
        }
        if !self.header.segmented_response_accepted || !config.segmentation_supported {
            tracing::warn!(
                "Reply of {} bytes for {:?} needs segmentation the peer does not accept",
                payload.len(),
                self.key
            );
            return self.abort_with(AbortReason::SegmentationNotSupported);
        }
        let segment_size = limit.saturating_sub(SEGMENTED_COMPLEX_ACK_HEADER_SIZE).max(1);
        let mut window = SegmentWindow::new(payload, segment_size, config.proposed_window_size);
        if let Some(max) = self.header.max_segments.limit() {
            if window.segment_count() > max {
                tracing::warn!(
                    "Reply for {:?} needs {} segments, peer accepts {}",
                    self.key,
                    window.segment_count(),
                    max
                );
                return self.abort_with(AbortReason::BufferOverflow);
            }
        }
        let batch = window.next_batch();
        self.window = Some(window);
        self.transmit(batch, now, config)
    }

    /// Sends a batch of segments and waits for the SegmentACK covering it.
    fn transmit(&mut self, batch: Vec<OutgoingSegment>, now: Instant, config: &Config) -> Vec<Action> {
        let all_sent = self.window.as_ref().map_or(true, SegmentWindow::all_sent);
        self.state = if all_sent {
            TransactionState::AwaitingWindowAck
        } else {
            TransactionState::SendingSegments
        };
        self.deadline = Some(now + config.segment_timeout);
        batch
            .into_iter()
            .map(|segment| {
                let frame = self.segment_frame(segment);
                self.send(frame)
            })
            .collect()
    }

    fn segment_frame(&self, segment: OutgoingSegment) -> Apdu {
        let info = segment.header(self.proposed_window_size);
        match self.key.role {
            Role::Initiator => self.request_frame(Some(info), segment.data),
            Role::Responder => Apdu::ComplexAck(ComplexAck {
                invoke_id: self.key.invoke_id,
                segment: Some(info),
                service_choice: self.service_choice,
                payload: segment.data,
            }),
        }
    }

    fn request_frame(&self, segment: Option<SegmentInfo>, payload: Payload) -> Apdu {
        Apdu::ConfirmedRequest(ConfirmedRequest {
            invoke_id: self.key.invoke_id,
            segment,
            segmented_response_accepted: self.header.segmented_response_accepted,
            max_segments_accepted: self.header.max_segments,
            max_apdu_length_accepted: self.header.max_apdu,
            service_choice: self.service_choice,
            payload,
        })
    }

    fn segment_ack(&self, negative: bool, sequence_number: u8, actual_window_size: u8) -> Action {
        self.send(Apdu::SegmentAck(SegmentAck {
            invoke_id: self.key.invoke_id,
            negative,
            server: self.key.role == Role::Responder,
            sequence_number,
            actual_window_size,
        }))
    }

    fn dispatch(&self, payload: Payload) -> Action {
        Action::Dispatch(IncomingRequest {
            key: self.key,
            service_choice: self.service_choice,
            payload,
        })
    }

    fn send(&self, apdu: Apdu) -> Action {
        Action::Send { peer: self.key.peer, apdu }
    }

    /// Sends an Abort to the peer and ends the transaction.
    fn abort_with(&mut self, reason: AbortReason) -> Vec<Action> {
        let abort = self.send(Apdu::Abort(AbortPdu {
            invoke_id: self.key.invoke_id,
            server: self.key.role == Role::Responder,
            reason,
        }));
        let mut actions = vec![abort];
        actions.extend(
            self.finish(Err(TransactionError::LocalAbort { reason }), TransactionState::Aborted),
        );
        actions
    }

    fn time_out(&mut self, stage: TimeoutStage) -> Vec<Action> {
        tracing::warn!(
            "Transaction {:?} timed out ({:?}) after {} retries",
            self.key,
            stage,
            self.retry_count
        );
        self.finish(
            Err(TransactionError::Timeout { retries: self.retry_count, stage }),
            TransactionState::Aborted,
        )
    }

    /// Moves to a terminal state and resolves the caller's future, if any.
    fn finish(&mut self, result: ReplyResult, state: TransactionState) -> Vec<Action> {
        self.state = state;
        self.deadline = None;
        self.window = None;
        self.reassembly = None;
        match self.completer.take() {
            Some(completer) => vec![Action::Resolve { completer, result }],
            None => Vec::new(),
        }
    }
}

fn fits_unsegmented(payload: &Payload, header_size: usize, config: &Config) -> bool {
    payload.len() + header_size <= config.max_apdu_length_accepted as usize
}
