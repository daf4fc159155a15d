//! The dispatch/send orchestrator.
//!
//! An [`Endpoint`] glues the codec, the transaction table, the network and the
//! service handler together. Every entry point follows the same pattern:
//! take the table lock, run a pure transition, release the lock, then carry
//! out the resulting actions (network sends, handler calls, future
//! completions). No I/O or user code ever runs under the table lock.

use std::{
    collections::VecDeque,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    time::{Duration, Instant},
};

use bacflow_core::{
    config::Config,
    constants::UNCONFIRMED_REQUEST_HEADER_SIZE,
    error::{DecodeError, ErrorKind, Result},
    payload::Payload,
    transport::Network,
};
use bacflow_protocol::{Apdu, ApduDecoder, ApduEncoder, UnconfirmedRequest};
use bacflow_transaction::{
    Action, CancelHook, IncomingRequest, ReplyFuture, TransactionKey, TransactionTable,
};
use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;

use crate::{
    driver::{self, DriverHandle, DriverSignal},
    handler::ServiceHandler,
    time::{Clock, SystemClock},
};

/// Shared state behind every clone of an [`Endpoint`].
pub(crate) struct Inner {
    config: Config,
    network: Arc<dyn Network>,
    handler: Arc<dyn ServiceHandler>,
    clock: Arc<dyn Clock>,
    table: Mutex<TransactionTable>,
    driver_signal: Mutex<Option<Sender<DriverSignal>>>,
    shut_down: AtomicBool,
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("config", &self.config)
            .field("network", &"<network>")
            .field("handler", &"<handler>")
            .field("table", &self.table)
            .field("shut_down", &self.shut_down)
            .finish()
    }
}

impl Inner {
    pub(crate) fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Runs `f` under the table lock and wakes the driver if the earliest
    /// deadline became earlier.
    fn with_table<R>(&self, now: Instant, f: impl FnOnce(&mut TransactionTable, Instant) -> R) -> R {
        let (result, earlier) = {
            let mut table = self.table.lock();
            let before = table.next_deadline();
            let result = f(&mut table, now);
            let after = table.next_deadline();
            let earlier = match (before, after) {
                (None, Some(_)) => true,
                (Some(before), Some(after)) => after < before,
                _ => false,
            };
            (result, earlier)
        };
        if earlier {
            self.wake_driver();
        }
        result
    }

    fn wake_driver(&self) {
        if let Some(signal) = self.driver_signal.lock().as_ref() {
            // Full means a wake is already pending.
            let _ = signal.try_send(DriverSignal::Wake);
        }
    }

    fn handle_incoming(&self, peer: SocketAddr, bytes: &[u8]) -> Result<()> {
        if self.is_shut_down() {
            tracing::debug!("Dropping {} byte frame from {}: endpoint is shut down", bytes.len(), peer);
            return Ok(());
        }
        let apdu = ApduDecoder::decode(bytes).map_err(|err| match err {
            DecodeError::UnknownPduType(nibble) => ErrorKind::IllegalPduType(nibble),
            other => ErrorKind::Decode(other),
        })?;
        tracing::trace!("Received {:?} from {}", apdu.pdu_type(), peer);

        if let Apdu::UnconfirmedRequest(request) = &apdu {
            self.handler.handle_unconfirmed(peer, request.service_choice, &request.payload);
            return Ok(());
        }
        let actions = self.with_table(self.now(), |table, now| {
            // Checked again under the lock: shutdown may have emptied the table meanwhile.
            if self.is_shut_down() {
                return Vec::new();
            }
            table.handle_pdu(peer, &apdu, now, &self.config)
        });
        self.perform(actions);
        Ok(())
    }

    pub(crate) fn poll_timeouts(&self, now: Instant) {
        let actions = self.with_table(now, |table, now| table.poll_timeouts(now, &self.config));
        self.perform(actions);
    }

    pub(crate) fn time_until_next_deadline(&self) -> Option<Duration> {
        let deadline = self.table.lock().next_deadline()?;
        Some(deadline.saturating_duration_since(self.now()))
    }

    /// Carries out actions outside the table lock. Handler answers may
    /// produce further actions, which are appended to the queue.
    fn perform(&self, actions: Vec<Action>) {
        let mut pending: VecDeque<Action> = actions.into();
        while let Some(action) = pending.pop_front() {
            match action {
                Action::Send { peer, apdu } => self.transmit(&peer, &apdu, false),
                Action::Dispatch(request) => pending.extend(self.dispatch(request)),
                Action::Resolve { completer, result } => {
                    completer.complete(result);
                }
            }
        }
    }

    fn dispatch(&self, request: IncomingRequest) -> Vec<Action> {
        let IncomingRequest { key, service_choice, payload } = request;
        tracing::debug!(
            "Dispatching service {} ({} bytes) from {}",
            service_choice,
            payload.len(),
            key.peer
        );
        let response =
            self.handler.handle_confirmed(key.peer, key.invoke_id, service_choice, &payload);
        self.with_table(self.now(), |table, now| table.respond(key, response, now, &self.config))
    }

    fn transmit(&self, peer: &SocketAddr, apdu: &Apdu, broadcast: bool) {
        let bytes = match ApduEncoder::encode(apdu) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::error!("Failed to encode {:?}: {}", apdu.pdu_type(), err);
                return;
            }
        };
        tracing::trace!("Sending {:?} ({} bytes) to {}", apdu.pdu_type(), bytes.len(), peer);
        if let Err(err) = self.network.send(peer, &bytes, broadcast) {
            tracing::error!("Failed to send {:?} to {}: {}", apdu.pdu_type(), peer, err);
        }
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_shut_down() {
            Err(ErrorKind::ShutDown)
        } else {
            Ok(())
        }
    }
}

impl CancelHook for Inner {
    fn cancel(&self, key: TransactionKey) {
        let actions = self.with_table(self.now(), |table, _| table.cancel(key));
        self.perform(actions);
    }
}

/// A node's confirmed-service engine bound to a network and a service handler.
///
/// Cloning is cheap; clones share the same transaction table.
#[derive(Debug, Clone)]
pub struct Endpoint {
    inner: Arc<Inner>,
}

impl Endpoint {
    /// Creates an endpoint and registers it as the network's receive callback.
    pub fn new(
        config: Config,
        network: Arc<dyn Network>,
        handler: Arc<dyn ServiceHandler>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let inner = Arc::new(Inner {
            config,
            network,
            handler,
            clock,
            table: Mutex::new(TransactionTable::new()),
            driver_signal: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&inner);
        inner.network.on_receive(Box::new(move |peer, bytes| {
            if let Some(inner) = weak.upgrade() {
                if let Err(err) = inner.handle_incoming(peer, bytes) {
                    tracing::warn!("Dropping frame from {}: {}", peer, err);
                }
            }
        }))?;

        Ok(Self { inner })
    }

    /// Creates an endpoint driven by the system clock.
    pub fn with_system_clock(
        config: Config,
        network: Arc<dyn Network>,
        handler: Arc<dyn ServiceHandler>,
    ) -> Result<Self> {
        Self::new(config, network, handler, Arc::new(SystemClock))
    }

    /// Configuration in force.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Sends a confirmed request and returns the handle on its reply.
    ///
    /// Large payloads are segmented. Fails with `NoAvailableInvokeId` when 256
    /// requests are already open.
    pub fn send_confirmed(
        &self,
        peer: SocketAddr,
        service_choice: u8,
        payload: impl Into<Payload>,
    ) -> Result<ReplyFuture> {
        self.inner.ensure_running()?;
        let payload = payload.into();
        let hook: Weak<dyn CancelHook> = Arc::downgrade(&self.inner) as Weak<dyn CancelHook>;
        let (future, actions) = self.inner.with_table(self.inner.now(), |table, now| {
            table.begin_request(peer, service_choice, payload, now, &self.inner.config, Some(hook))
        })?;
        self.inner.perform(actions);
        Ok(future)
    }

    /// Sends an unconfirmed request; no transaction is opened.
    pub fn send_unconfirmed(
        &self,
        peer: SocketAddr,
        service_choice: u8,
        payload: &[u8],
        broadcast: bool,
    ) -> Result<()> {
        self.inner.ensure_running()?;
        let limit = (self.inner.config.max_apdu_length_accepted as usize)
            .saturating_sub(UNCONFIRMED_REQUEST_HEADER_SIZE);
        if payload.len() > limit {
            return Err(ErrorKind::PayloadTooLarge { size: payload.len(), limit });
        }
        let apdu = Apdu::UnconfirmedRequest(UnconfirmedRequest {
            service_choice,
            payload: Payload::from(payload),
        });
        let bytes = ApduEncoder::encode(&apdu)?;
        self.inner.network.send(&peer, &bytes, broadcast)?;
        Ok(())
    }

    /// Feeds one received frame into the engine.
    ///
    /// Malformed frames are reported and otherwise ignored. After
    /// [`Endpoint::shutdown`] every frame is dropped.
    pub fn handle_incoming(&self, peer: SocketAddr, bytes: &[u8]) -> Result<()> {
        self.inner.handle_incoming(peer, bytes)
    }

    /// Advances every transaction whose deadline passed at `now`.
    pub fn poll_timeouts(&self, now: Instant) {
        self.inner.poll_timeouts(now);
    }

    /// Earliest deadline among open transactions.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.inner.table.lock().next_deadline()
    }

    /// Number of open transactions.
    pub fn open_transactions(&self) -> usize {
        self.inner.table.lock().len()
    }

    /// Invoke ids held by open requests.
    pub fn outstanding_invoke_ids(&self) -> usize {
        self.inner.table.lock().outstanding_invoke_ids()
    }

    /// Starts the background timeout driver.
    pub fn spawn_timeout_driver(&self) -> Result<DriverHandle> {
        self.inner.ensure_running()?;
        let (signal, receiver) = bounded(1);
        *self.inner.driver_signal.lock() = Some(signal.clone());
        let handle = driver::spawn(
            Arc::downgrade(&self.inner),
            signal,
            receiver,
            self.inner.config.driver_idle_interval,
        )?;
        Ok(handle)
    }

    /// Refuses new requests, drops every open transaction and ignores
    /// frames that arrive afterwards.
    ///
    /// Pending reply futures resolve with `ShutDown`. Peers are not notified.
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let closed = self.inner.table.lock().close_all();
        if let Some(signal) = self.inner.driver_signal.lock().take() {
            let _ = signal.try_send(DriverSignal::Shutdown);
        }
        tracing::debug!("Endpoint shut down, dropped {} open transactions", closed);
    }
}
