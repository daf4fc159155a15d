//! Integration tests for the bacflow-host crate.
//!
//! Endpoints are wired through an in-memory network whose frames are held
//! until the test pumps them, and time only moves through a manual clock.

use std::{
    collections::{HashMap, VecDeque},
    io,
    net::SocketAddr,
    sync::Arc,
    thread,
    time::Duration,
};

use bacflow_core::{
    config::Config,
    error::{DecodeError, ErrorKind},
    payload::Payload,
    transport::{Network, ReceiveCallback},
};
use bacflow_host::{
    Endpoint, ManualClock, RejectAll, ServiceFailure, ServiceHandler, ServiceResponse, SystemClock,
};
use bacflow_protocol::{
    AbortPdu, AbortReason, Apdu, ApduDecoder, ApduEncoder, ConfirmedRequest, InvokeId,
    MaxSegments, RejectReason, SegmentAck, SegmentInfo, SimpleAck, UnconfirmedRequest,
};
use bacflow_transaction::{Reply, TimeoutStage, TransactionError};
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};

const ECHO: u8 = 12;
const ACKNOWLEDGE: u8 = 15;
const FAIL: u8 = 8;
const REFUSE: u8 = 9;

/// Deliveries after which `Hub::pump` gives up on a runaway exchange.
const PUMP_LIMIT: usize = 100_000;

#[derive(Debug, Clone)]
struct Frame {
    from: SocketAddr,
    to: SocketAddr,
    bytes: Vec<u8>,
}

impl Frame {
    fn apdu(&self) -> Apdu {
        ApduDecoder::decode(&self.bytes).unwrap()
    }
}

type DropRule = Box<dyn FnMut(&Frame) -> bool + Send>;

/// Shared medium for every loopback network of a test.
#[derive(Default)]
struct Hub {
    wire: Mutex<VecDeque<Frame>>,
    log: Mutex<Vec<Frame>>,
    nodes: Mutex<HashMap<SocketAddr, Arc<ReceiveCallback>>>,
    drop_rule: Mutex<Option<DropRule>>,
}

impl Hub {
    fn network(self: &Arc<Self>, addr: SocketAddr) -> Arc<LoopbackNetwork> {
        Arc::new(LoopbackNetwork { addr, hub: self.clone() })
    }

    /// Delivers frames until none are in flight or `PUMP_LIMIT` is reached.
    /// Frames for addresses without an endpoint vanish.
    fn pump(&self) -> usize {
        let mut delivered = 0;
        while delivered < PUMP_LIMIT {
            let Some(frame) = self.wire.lock().pop_front() else {
                return delivered;
            };
            if let Some(rule) = self.drop_rule.lock().as_mut() {
                if rule(&frame) {
                    continue;
                }
            }
            let callback = self.nodes.lock().get(&frame.to).cloned();
            if let Some(callback) = callback {
                delivered += 1;
                callback(frame.from, &frame.bytes);
            }
        }
        delivered
    }

    /// Puts a second copy of the in-flight frame at `index` at the back of the wire.
    fn repeat_in_flight(&self, index: usize) {
        let mut wire = self.wire.lock();
        let frame = wire[index].clone();
        wire.push_back(frame);
    }

    /// Takes every frame sent so far, in sending order.
    fn take_sent(&self) -> Vec<Frame> {
        self.wire.lock().clear();
        std::mem::take(&mut *self.log.lock())
    }

    fn sent_by(&self, addr: SocketAddr) -> Vec<Apdu> {
        self.log.lock().iter().filter(|frame| frame.from == addr).map(Frame::apdu).collect()
    }
}

struct LoopbackNetwork {
    addr: SocketAddr,
    hub: Arc<Hub>,
}

impl Network for LoopbackNetwork {
    fn send(&self, peer: &SocketAddr, payload: &[u8], _broadcast: bool) -> io::Result<()> {
        let frame = Frame { from: self.addr, to: *peer, bytes: payload.to_vec() };
        self.hub.log.lock().push(frame.clone());
        self.hub.wire.lock().push_back(frame);
        Ok(())
    }

    fn on_receive(&self, callback: ReceiveCallback) -> io::Result<()> {
        self.hub.nodes.lock().insert(self.addr, Arc::new(callback));
        Ok(())
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.addr)
    }
}

/// Echoes ECHO requests, acknowledges ACKNOWLEDGE, fails FAIL and rejects the rest.
#[derive(Default)]
struct TestHandler {
    confirmed: Mutex<Vec<(u8, Vec<u8>)>>,
    unconfirmed: Mutex<Vec<(SocketAddr, u8, Vec<u8>)>>,
}

impl ServiceHandler for TestHandler {
    fn handle_confirmed(
        &self,
        _peer: SocketAddr,
        _invoke_id: InvokeId,
        service_choice: u8,
        payload: &[u8],
    ) -> Result<ServiceResponse, ServiceFailure> {
        self.confirmed.lock().push((service_choice, payload.to_vec()));
        match service_choice {
            ECHO => Ok(ServiceResponse::ComplexAck(Payload::from(payload))),
            ACKNOWLEDGE => Ok(ServiceResponse::SimpleAck),
            FAIL => Err(ServiceFailure::Error { error_class: 2, error_code: 32 }),
            _ => Err(ServiceFailure::Reject(RejectReason::UnrecognizedService)),
        }
    }

    fn handle_unconfirmed(&self, peer: SocketAddr, service_choice: u8, payload: &[u8]) {
        self.unconfirmed.lock().push((peer, service_choice, payload.to_vec()));
    }
}

fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

fn client_addr() -> SocketAddr {
    addr(47808)
}

fn server_addr() -> SocketAddr {
    addr(47809)
}

/// A peer with no endpoint behind it; its frames are injected by hand.
fn phantom() -> SocketAddr {
    addr(47900)
}

struct Harness {
    hub: Arc<Hub>,
    clock: Arc<ManualClock>,
    client: Endpoint,
    server: Endpoint,
    handler: Arc<TestHandler>,
}

fn harness(client_config: Config, server_config: Config) -> Harness {
    let hub = Arc::new(Hub::default());
    let clock = Arc::new(ManualClock::default());
    let handler = Arc::new(TestHandler::default());
    let client = Endpoint::new(
        client_config,
        hub.network(client_addr()),
        Arc::new(RejectAll),
        clock.clone(),
    )
    .unwrap();
    let server =
        Endpoint::new(server_config, hub.network(server_addr()), handler.clone(), clock.clone())
            .unwrap();
    Harness { hub, clock, client, server, handler }
}

fn default_harness() -> Harness {
    harness(Config::default(), Config::default())
}

fn small_window() -> Config {
    Config { max_apdu_length_accepted: 506, proposed_window_size: 3, ..Config::default() }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn encode(apdu: Apdu) -> Vec<u8> {
    ApduEncoder::encode(&apdu).unwrap()
}

fn sequence_numbers(apdus: &[Apdu]) -> Vec<u8> {
    apdus.iter().filter_map(Apdu::segment).map(|segment| segment.sequence_number).collect()
}

fn request_segment(invoke_id: InvokeId, sequence_number: u8, more_follows: bool) -> Vec<u8> {
    encode(Apdu::ConfirmedRequest(ConfirmedRequest {
        invoke_id,
        segment: Some(SegmentInfo { sequence_number, proposed_window_size: 3, more_follows }),
        segmented_response_accepted: true,
        max_segments_accepted: MaxSegments::Unspecified,
        max_apdu_length_accepted: 480,
        service_choice: ECHO,
        payload: Payload::from_vec(vec![sequence_number; 100]),
    }))
}

#[test]
fn test_simple_ack_round_trip() {
    let h = default_harness();
    let future = h.client.send_confirmed(server_addr(), ACKNOWLEDGE, vec![1, 2, 3]).unwrap();
    h.hub.pump();

    assert_eq!(future.try_get(), Some(Ok(Reply::SimpleAck { service_choice: ACKNOWLEDGE })));
    assert_eq!(h.handler.confirmed.lock().as_slice(), &[(ACKNOWLEDGE, vec![1, 2, 3])]);
    assert_eq!(h.client.open_transactions(), 0);
    assert_eq!(h.server.open_transactions(), 0);
    assert_eq!(h.client.outstanding_invoke_ids(), 0);
}

#[test]
fn test_segmented_request_and_reply() {
    let h = harness(small_window(), Config::default());
    let payload = pattern(3000);
    let future = h.client.send_confirmed(server_addr(), ECHO, payload.clone()).unwrap();

    // Only the first window goes out before any acknowledgment.
    assert_eq!(sequence_numbers(&h.hub.sent_by(client_addr())), vec![0, 1, 2]);

    h.hub.pump();
    match future.try_get() {
        Some(Ok(Reply::ComplexAck { service_choice, payload: reply })) => {
            assert_eq!(service_choice, ECHO);
            assert_eq!(reply.as_slice(), payload.as_slice());
        }
        other => panic!("unexpected reply {:?}", other),
    }
    assert_eq!(h.handler.confirmed.lock()[0].1, payload);

    let request_segments: Vec<u8> = h
        .hub
        .sent_by(client_addr())
        .into_iter()
        .filter(|apdu| matches!(apdu, Apdu::ConfirmedRequest(_)))
        .filter_map(|apdu| apdu.segment().map(|segment| segment.sequence_number))
        .collect();
    assert_eq!(request_segments, vec![0, 1, 2, 3, 4, 5]);

    let server_acks: Vec<u8> = h
        .hub
        .sent_by(server_addr())
        .into_iter()
        .filter_map(|apdu| match apdu {
            Apdu::SegmentAck(ack) => Some(ack.sequence_number),
            _ => None,
        })
        .collect();
    assert_eq!(server_acks, vec![2, 5]);
    assert_eq!(h.client.open_transactions(), 0);
    assert_eq!(h.server.open_transactions(), 0);
}

#[test]
fn test_nak_resends_from_last_good() {
    let h = harness(small_window(), Config::default());
    let future = h.client.send_confirmed(phantom(), ECHO, pattern(3000)).unwrap();
    let first: Vec<Apdu> = h.hub.take_sent().iter().map(Frame::apdu).collect();
    assert_eq!(sequence_numbers(&first), vec![0, 1, 2]);

    let nak = encode(Apdu::SegmentAck(SegmentAck {
        invoke_id: future.invoke_id(),
        negative: true,
        server: true,
        sequence_number: 1,
        actual_window_size: 3,
    }));
    h.client.handle_incoming(phantom(), &nak).unwrap();

    let resent: Vec<Apdu> = h.hub.take_sent().iter().map(Frame::apdu).collect();
    assert_eq!(sequence_numbers(&resent), vec![2, 3, 4]);
    assert!(!future.is_done());
}

#[test]
fn test_duplicated_segment_does_not_multiply_traffic() {
    let config =
        Config { max_apdu_length_accepted: 206, proposed_window_size: 4, ..Config::default() };
    let payload = pattern(8000);

    let clean = harness(config.clone(), config.clone());
    let future = clean.client.send_confirmed(server_addr(), ECHO, payload.clone()).unwrap();
    clean.hub.pump();
    assert!(future.is_done());
    let clean_frames = clean.hub.log.lock().len();

    let h = harness(config.clone(), config);
    let future = h.client.send_confirmed(server_addr(), ECHO, payload.clone()).unwrap();
    h.hub.repeat_in_flight(1);
    let delivered = h.hub.pump();
    assert!(delivered < PUMP_LIMIT);
    match future.try_get() {
        Some(Ok(Reply::ComplexAck { payload: reply, .. })) => {
            assert_eq!(reply.as_slice(), payload.as_slice())
        }
        other => panic!("unexpected reply {:?}", other),
    }
    let frames = h.hub.log.lock().len();
    assert!(frames <= clean_frames + 2, "{} frames, {} without the copy", frames, clean_frames);
    assert_eq!(h.server.open_transactions(), 0);
}

#[test]
fn test_gap_in_request_segments_naks_last_good() {
    let h = default_harness();
    h.server.handle_incoming(phantom(), &request_segment(4, 0, true)).unwrap();
    h.server.handle_incoming(phantom(), &request_segment(4, 2, true)).unwrap();

    let sent = h.hub.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, phantom());
    assert_eq!(
        sent[0].apdu(),
        Apdu::SegmentAck(SegmentAck {
            invoke_id: 4,
            negative: true,
            server: true,
            sequence_number: 0,
            actual_window_size: 3,
        })
    );
    assert_eq!(h.server.open_transactions(), 1);
    assert!(h.handler.confirmed.lock().is_empty());
}

#[test]
fn test_abort_resolves_future_and_frees_invoke_id() {
    let h = default_harness();
    let future = h.client.send_confirmed(phantom(), ECHO, vec![7; 20]).unwrap();
    assert_eq!(h.client.outstanding_invoke_ids(), 1);

    let abort = encode(Apdu::Abort(AbortPdu {
        invoke_id: future.invoke_id(),
        server: true,
        reason: AbortReason::OutOfResources,
    }));
    h.client.handle_incoming(phantom(), &abort).unwrap();

    assert_eq!(
        future.try_get(),
        Some(Err(TransactionError::PeerAbort { reason: AbortReason::OutOfResources, server: true }))
    );
    assert_eq!(h.client.outstanding_invoke_ids(), 0);
    assert_eq!(h.client.open_transactions(), 0);
}

#[test]
fn test_reply_completes_exactly_once() {
    let h = default_harness();
    let future = h.client.send_confirmed(server_addr(), ACKNOWLEDGE, Vec::new()).unwrap();
    h.hub.pump();
    let first = future.try_get();
    assert_eq!(first, Some(Ok(Reply::SimpleAck { service_choice: ACKNOWLEDGE })));

    let invoke_id = future.invoke_id();
    let duplicate = encode(Apdu::SimpleAck(SimpleAck { invoke_id, service_choice: ACKNOWLEDGE }));
    let abort = encode(Apdu::Abort(AbortPdu { invoke_id, server: true, reason: AbortReason::Other }));
    h.client.handle_incoming(server_addr(), &duplicate).unwrap();
    h.client.handle_incoming(server_addr(), &abort).unwrap();

    assert_eq!(future.try_get(), first);
    assert_eq!(future.wait(), Ok(Reply::SimpleAck { service_choice: ACKNOWLEDGE }));
}

#[test]
fn test_retries_then_timeout() {
    let config = Config { max_retries: 3, ..Config::default() };
    let h = harness(config.clone(), Config::default());
    let future = h.client.send_confirmed(phantom(), ECHO, vec![1; 10]).unwrap();

    for _ in 0..=config.max_retries {
        assert!(!future.is_done());
        let now = h.clock.advance(config.reply_timeout);
        h.client.poll_timeouts(now);
    }

    let requests = h
        .hub
        .sent_by(client_addr())
        .into_iter()
        .filter(|apdu| matches!(apdu, Apdu::ConfirmedRequest(_)))
        .count();
    assert_eq!(requests, 1 + config.max_retries as usize);
    assert_eq!(
        future.try_get(),
        Some(Err(TransactionError::Timeout { retries: 3, stage: TimeoutStage::NoResponse }))
    );
    assert_eq!(h.client.outstanding_invoke_ids(), 0);
    assert_eq!(h.client.next_deadline(), None);
}

#[test]
fn test_every_waiter_sees_the_same_outcome() {
    let h = default_harness();
    let future = h.client.send_confirmed(phantom(), ACKNOWLEDGE, Vec::new()).unwrap();

    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let future = future.clone();
            thread::spawn(move || future.wait())
        })
        .collect();

    let ack = encode(Apdu::SimpleAck(SimpleAck {
        invoke_id: future.invoke_id(),
        service_choice: ACKNOWLEDGE,
    }));
    h.client.handle_incoming(phantom(), &ack).unwrap();

    for waiter in waiters {
        assert_eq!(waiter.join().unwrap(), Ok(Reply::SimpleAck { service_choice: ACKNOWLEDGE }));
    }
}

#[test]
fn test_cancel_aborts_towards_the_peer() {
    let h = default_harness();
    let future = h.client.send_confirmed(phantom(), ECHO, vec![1; 10]).unwrap();
    h.hub.take_sent();

    assert!(future.cancel());
    assert_eq!(future.try_get(), Some(Err(TransactionError::Cancelled)));

    let sent = h.hub.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, phantom());
    assert_eq!(
        sent[0].apdu(),
        Apdu::Abort(AbortPdu {
            invoke_id: future.invoke_id(),
            server: false,
            reason: AbortReason::Other,
        })
    );
    assert_eq!(h.client.outstanding_invoke_ids(), 0);
    assert!(!future.cancel());
}

#[test]
fn test_handler_error_and_reject_reach_the_caller() {
    let h = default_harness();
    let failed = h.client.send_confirmed(server_addr(), FAIL, vec![1]).unwrap();
    let refused = h.client.send_confirmed(server_addr(), REFUSE, vec![1]).unwrap();
    h.hub.pump();

    assert!(matches!(
        failed.try_get(),
        Some(Err(TransactionError::PeerError {
            service_choice: FAIL,
            error_class: Some(2),
            error_code: Some(32),
            ..
        }))
    ));
    assert_eq!(
        refused.try_get(),
        Some(Err(TransactionError::PeerReject { reason: RejectReason::UnrecognizedService }))
    );
    assert_eq!(h.server.open_transactions(), 0);
}

#[test]
fn test_unconfirmed_request_reaches_handler() {
    let h = default_harness();
    h.client.send_unconfirmed(server_addr(), 8, b"who-is", false).unwrap();
    h.hub.pump();

    assert_eq!(
        h.handler.unconfirmed.lock().as_slice(),
        &[(client_addr(), 8, b"who-is".to_vec())]
    );
    assert_eq!(h.server.open_transactions(), 0);
    assert!(h.hub.sent_by(server_addr()).is_empty());
}

#[test]
fn test_oversized_unconfirmed_request_is_refused() {
    let h = default_harness();
    let result = h.client.send_unconfirmed(server_addr(), 8, &[0; 1500], false);
    assert!(matches!(result, Err(ErrorKind::PayloadTooLarge { size: 1500, limit: 1474 })));
}

#[test]
fn test_malformed_frames_are_reported() {
    let h = default_harness();
    assert!(matches!(h.client.handle_incoming(phantom(), &[0x80]), Err(ErrorKind::IllegalPduType(8))));
    assert!(matches!(
        h.client.handle_incoming(phantom(), &[]),
        Err(ErrorKind::Decode(DecodeError::EmptyFrame))
    ));
    assert!(matches!(
        h.client.handle_incoming(phantom(), &[0x00, 0x05]),
        Err(ErrorKind::Decode(DecodeError::Truncated))
    ));
    assert_eq!(h.client.open_transactions(), 0);
}

#[test]
fn test_reply_for_unknown_invoke_id_is_ignored() {
    let h = default_harness();
    let ack = encode(Apdu::SimpleAck(SimpleAck { invoke_id: 99, service_choice: ECHO }));
    h.client.handle_incoming(phantom(), &ack).unwrap();
    assert_eq!(h.client.open_transactions(), 0);
    assert!(h.hub.take_sent().is_empty());
}

#[test]
fn test_stalled_reassembly_is_aborted() {
    let config = Config::default();
    let h = default_harness();
    h.server.handle_incoming(phantom(), &request_segment(6, 0, true)).unwrap();
    assert_eq!(h.server.open_transactions(), 1);

    let now = h.clock.advance(config.reassembly_timeout + Duration::from_millis(1));
    h.server.poll_timeouts(now);

    let sent = h.hub.take_sent();
    assert_eq!(
        sent.last().map(Frame::apdu),
        Some(Apdu::Abort(AbortPdu { invoke_id: 6, server: true, reason: AbortReason::TsmTimeout }))
    );
    assert_eq!(h.server.open_transactions(), 0);
}

#[test]
fn test_invoke_ids_run_out_at_256() {
    let h = default_harness();
    let futures: Vec<_> = (0..256)
        .map(|_| h.client.send_confirmed(phantom(), ECHO, vec![0; 4]).unwrap())
        .collect();
    assert!(matches!(
        h.client.send_confirmed(phantom(), ECHO, vec![0; 4]),
        Err(ErrorKind::NoAvailableInvokeId)
    ));

    futures[10].cancel();
    let reused = h.client.send_confirmed(phantom(), ECHO, vec![0; 4]).unwrap();
    assert_eq!(reused.invoke_id(), futures[10].invoke_id());
}

#[test]
fn test_shutdown_resolves_pending_futures() {
    let h = default_harness();
    let future = h.client.send_confirmed(phantom(), ECHO, vec![1; 10]).unwrap();
    h.client.shutdown();

    assert_eq!(future.try_get(), Some(Err(TransactionError::ShutDown)));
    assert_eq!(h.client.open_transactions(), 0);
    assert!(matches!(
        h.client.send_confirmed(phantom(), ECHO, vec![1]),
        Err(ErrorKind::ShutDown)
    ));
}

#[test]
fn test_shut_down_endpoint_ignores_incoming_requests() {
    let h = default_harness();
    h.server.shutdown();

    let future = h.client.send_confirmed(server_addr(), ECHO, vec![1; 10]).unwrap();
    h.hub.pump();
    h.server.handle_incoming(phantom(), &request_segment(4, 0, true)).unwrap();
    let unconfirmed = encode(Apdu::UnconfirmedRequest(UnconfirmedRequest {
        service_choice: 8,
        payload: Payload::from_vec(vec![1, 2]),
    }));
    h.server.handle_incoming(phantom(), &unconfirmed).unwrap();

    assert_eq!(h.server.open_transactions(), 0);
    assert!(h.handler.confirmed.lock().is_empty());
    assert!(h.handler.unconfirmed.lock().is_empty());
    assert!(h.hub.sent_by(server_addr()).is_empty());
    assert!(!future.is_done());
}

#[test]
fn test_unacknowledged_reply_segments_abort_the_initiator() {
    let client_config = Config { reassembly_timeout: Duration::from_secs(30), ..small_window() };
    let h = harness(client_config, Config::default());
    let rule: DropRule = Box::new(|frame: &Frame| {
        frame.from == client_addr() && matches!(frame.apdu(), Apdu::SegmentAck(_))
    });
    *h.hub.drop_rule.lock() = Some(rule);

    let future = h.client.send_confirmed(server_addr(), ECHO, pattern(3000)).unwrap();
    for _ in 0..60 {
        h.hub.pump();
        if future.is_done() {
            break;
        }
        let now = h.clock.advance(Duration::from_secs(1));
        h.client.poll_timeouts(now);
        h.server.poll_timeouts(now);
    }

    assert_eq!(
        future.try_get(),
        Some(Err(TransactionError::PeerAbort { reason: AbortReason::TsmTimeout, server: true }))
    );
    assert_eq!(h.client.open_transactions(), 0);
    assert_eq!(h.server.open_transactions(), 0);
}

#[test]
fn test_driver_thread_times_out_requests() {
    let hub = Arc::new(Hub::default());
    let config = Config {
        reply_timeout: Duration::from_millis(30),
        max_retries: 1,
        driver_idle_interval: Duration::from_millis(20),
        ..Config::default()
    };
    let client = Endpoint::new(
        config,
        hub.network(client_addr()),
        Arc::new(RejectAll),
        Arc::new(SystemClock),
    )
    .unwrap();
    let driver = client.spawn_timeout_driver().unwrap();
    assert!(driver.is_running());

    let future = client.send_confirmed(phantom(), ECHO, vec![1; 10]).unwrap();
    assert_eq!(
        future.wait_timeout(Duration::from_secs(5)),
        Some(Err(TransactionError::Timeout { retries: 1, stage: TimeoutStage::NoResponse }))
    );
    assert_eq!(hub.sent_by(client_addr()).len(), 2);

    driver.shutdown();
}

#[test]
fn test_lossy_link_still_completes() {
    let config = Config {
        max_apdu_length_accepted: 206,
        proposed_window_size: 4,
        max_retries: 10,
        segment_timeout: Duration::from_millis(1000),
        reassembly_timeout: Duration::from_millis(10_000),
        reply_timeout: Duration::from_millis(2000),
        ..Config::default()
    };
    let h = harness(config.clone(), config);
    let mut rng = StdRng::seed_from_u64(7);
    let rule: DropRule = Box::new(move |_: &Frame| rng.gen_bool(0.1));
    *h.hub.drop_rule.lock() = Some(rule);

    let payload = pattern(2000);
    let future = h.client.send_confirmed(server_addr(), ECHO, payload.clone()).unwrap();
    for _ in 0..4000 {
        h.hub.pump();
        if future.is_done() {
            break;
        }
        let now = h.clock.advance(Duration::from_millis(250));
        h.client.poll_timeouts(now);
        h.server.poll_timeouts(now);
    }

    match future.try_get() {
        Some(Ok(Reply::ComplexAck { payload: reply, .. })) => {
            assert_eq!(reply.as_slice(), payload.as_slice())
        }
        other => panic!("unexpected reply {:?}", other),
    }
}
