//! Single-assignment reply cells handed to the caller of a confirmed request.
//!
//! A [`ReplyFuture`] and its [`ReplyCompleter`] share one slot. The completer
//! stays with the transaction; the future goes to the caller. The slot is
//! written at most once, and waiters block on a condition variable until the
//! slot holds a result. Being woken alone never counts as completion.

use std::{
    sync::{Arc, Weak},
    time::{Duration, Instant},
};

use bacflow_core::payload::Payload;
use bacflow_protocol::{AbortReason, RejectReason};
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::transaction::TransactionKey;

/// Positive outcome of a confirmed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// The peer answered with a SimpleACK.
    SimpleAck {
        /// Service choice echoed by the peer
        service_choice: u8,
    },
    /// The peer answered with a ComplexACK, reassembled if it was segmented.
    ComplexAck {
        /// Service choice echoed by the peer
        service_choice: u8,
        /// Service ack bytes
        payload: Payload,
    },
}

/// Retry stage at which a transaction gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutStage {
    /// No reply to the request.
    NoResponse,
    /// No SegmentACK for an outstanding window.
    NoAck,
}

/// Failure outcome of a confirmed request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransactionError {
    /// Retries were exhausted without an answer.
    #[error("transaction timed out ({stage:?}) after {retries} retries")]
    Timeout {
        /// Retransmissions performed before giving up
        retries: u8,
        /// What was being waited for
        stage: TimeoutStage,
    },
    /// The peer aborted the transaction.
    #[error("peer aborted: {reason:?}")]
    PeerAbort {
        /// Reason given by the peer
        reason: AbortReason,
        /// The abort came from the responding side
        server: bool,
    },
    /// The peer rejected the request.
    #[error("peer rejected: {reason:?}")]
    PeerReject {
        /// Reason given by the peer
        reason: RejectReason,
    },
    /// The service failed on the peer.
    #[error("peer error for service {service_choice}: class {error_class:?} code {error_code:?}")]
    PeerError {
        /// Service choice of the failed request
        service_choice: u8,
        /// Error class, when the payload carries one
        error_class: Option<u32>,
        /// Error code, when the payload carries one
        error_code: Option<u32>,
        /// Raw error payload
        payload: Payload,
    },
    /// This node aborted the transaction.
    #[error("aborted locally: {reason:?}")]
    LocalAbort {
        /// Reason sent to the peer
        reason: AbortReason,
    },
    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,
    /// The transaction was dropped before it finished, for instance because
    /// the endpoint shut down.
    #[error("transaction dropped before completion")]
    ShutDown,
}

/// What a reply future resolves to.
pub type ReplyResult = Result<Reply, TransactionError>;

/// Receives cancellation requests from reply futures.
///
/// Implemented by whatever owns the transaction table, so a cancelled future
/// can abort its transaction and free the invoke id.
pub trait CancelHook: Send + Sync {
    /// Aborts the transaction identified by `key`, if it is still open.
    fn cancel(&self, key: TransactionKey);
}

#[derive(Debug, Default)]
struct Slot {
    result: Option<ReplyResult>,
}

#[derive(Debug, Default)]
struct Shared {
    slot: Mutex<Slot>,
    ready: Condvar,
}

impl Shared {
    fn set(&self, result: ReplyResult) -> bool {
        let mut slot = self.slot.lock();
        if slot.result.is_some() {
            return false;
        }
        slot.result = Some(result);
        drop(slot);
        self.ready.notify_all();
        true
    }
}

/// Creates a connected future/completer pair for the transaction `key`.
pub fn reply_channel(
    key: TransactionKey,
    cancel_hook: Option<Weak<dyn CancelHook>>,
) -> (ReplyFuture, ReplyCompleter) {
    let shared = Arc::new(Shared::default());
    (
        ReplyFuture { shared: shared.clone(), key, cancel_hook },
        ReplyCompleter { shared, key },
    )
}

/// Writing half of a reply cell, owned by the transaction.
#[derive(Debug)]
pub struct ReplyCompleter {
    shared: Arc<Shared>,
    key: TransactionKey,
}

impl ReplyCompleter {
    /// Sets the result. Returns false if the cell already held one
    /// (for instance because the caller cancelled first).
    pub fn complete(&self, result: ReplyResult) -> bool {
        let set = self.shared.set(result);
        if !set {
            tracing::debug!("Reply for {:?} already resolved, dropping late result", self.key);
        }
        set
    }

    /// Returns true if the cell already holds a result.
    pub fn is_done(&self) -> bool {
        self.shared.slot.lock().result.is_some()
    }
}

impl Drop for ReplyCompleter {
    fn drop(&mut self) {
        // Waiters must never block on a transaction that no longer exists.
        self.shared.set(Err(TransactionError::ShutDown));
    }
}

/// Handle on the eventual reply to a confirmed request.
///
/// Clones share the same cell, so several threads may wait on one request.
#[derive(Clone)]
pub struct ReplyFuture {
    shared: Arc<Shared>,
    key: TransactionKey,
    cancel_hook: Option<Weak<dyn CancelHook>>,
}

impl std::fmt::Debug for ReplyFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyFuture")
            .field("key", &self.key)
            .field("done", &self.is_done())
            .finish()
    }
}

impl ReplyFuture {
    /// Transaction this future belongs to.
    pub fn key(&self) -> TransactionKey {
        self.key
    }

    /// Invoke id of the request.
    pub fn invoke_id(&self) -> u8 {
        self.key.invoke_id
    }

    /// Blocks until the result is set.
    pub fn wait(&self) -> ReplyResult {
        let mut slot = self.shared.slot.lock();
        loop {
            if let Some(result) = slot.result.as_ref() {
                return result.clone();
            }
            self.shared.ready.wait(&mut slot);
        }
    }

    /// Blocks until the result is set or `timeout` elapses.
    ///
    /// Returns `None` on expiry; the request stays open.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ReplyResult> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.shared.slot.lock();
        loop {
            if let Some(result) = slot.result.as_ref() {
                return Some(result.clone());
            }
            if self.shared.ready.wait_until(&mut slot, deadline).timed_out() {
                return slot.result.clone();
            }
        }
    }

    /// Returns the result if it is already set.
    pub fn try_get(&self) -> Option<ReplyResult> {
        self.shared.slot.lock().result.clone()
    }

    /// Returns true once a result is set.
    pub fn is_done(&self) -> bool {
        self.shared.slot.lock().result.is_some()
    }

    /// Resolves the future with `Cancelled` and asks the owner to abort the
    /// transaction. Returns false if the future was already resolved.
    pub fn cancel(&self) -> bool {
        if !self.shared.set(Err(TransactionError::Cancelled)) {
            return false;
        }
        if let Some(hook) = self.cancel_hook.as_ref().and_then(Weak::upgrade) {
            hook.cancel(self.key);
        }
        true
    }

    #[cfg(test)]
    fn notify_without_result(&self) {
        self.shared.ready.notify_all();
    }
}
