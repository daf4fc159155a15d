use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::Weak,
    time::Instant,
};

use bacflow_core::{
    config::Config,
    constants::CONFIRMED_REQUEST_HEADER_SIZE,
    error::{ErrorKind, Result},
    payload::Payload,
};
use bacflow_protocol::Apdu;

use crate::{
    invoke_id::InvokeIdAllocator,
    reply::{reply_channel, CancelHook, ReplyFuture},
    transaction::{Action, Role, ServiceFailure, ServiceResponse, Transaction, TransactionKey},
};

/// All open transactions of one node, keyed by peer, invoke id and role.
///
/// The table owns every [`Transaction`] and the invoke-id allocator. Its
/// methods only compute; the [`Action`]s they return are carried out by the
/// caller after releasing whatever lock guards the table.
#[derive(Debug, Default)]
pub struct TransactionTable {
    transactions: HashMap<TransactionKey, Transaction>,
    invoke_ids: InvokeIdAllocator,
}

impl TransactionTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens an initiator transaction for a confirmed request.
    ///
    /// Fails with `PayloadTooLarge` if the request would need segmentation
    /// while it is disabled, and with `NoAvailableInvokeId` if every id is in use.
    pub fn begin_request(
        &mut self,
        peer: SocketAddr,
        service_choice: u8,
        payload: Payload,
        now: Instant,
        config: &Config,
        cancel_hook: Option<Weak<dyn CancelHook>>,
    ) -> Result<(ReplyFuture, Vec<Action>)> {
        let limit = (config.max_apdu_length_accepted as usize)
            .saturating_sub(CONFIRMED_REQUEST_HEADER_SIZE);
        if payload.len() > limit && !config.segmentation_supported {
            return Err(ErrorKind::PayloadTooLarge { size: payload.len(), limit });
        }
        let invoke_id = self.invoke_ids.allocate()?;
        let key = TransactionKey { peer, invoke_id, role: Role::Initiator };
        let (future, completer) = reply_channel(key, cancel_hook);
        let (transaction, actions) =
            Transaction::initiate(key, service_choice, payload, completer, now, config);
        tracing::debug!("Opened {:?} for service {}", key, service_choice);
        self.transactions.insert(key, transaction);
        Ok((future, actions))
    }

    /// Routes a received PDU to its transaction.
    ///
    /// PDUs sent by a server belong to transactions we initiated; the rest
    /// belong to transactions we respond to. Terminal PDUs for unknown invoke
    /// ids are discarded. Unconfirmed requests never reach the table.
    pub fn handle_pdu(
        &mut self,
        peer: SocketAddr,
        apdu: &Apdu,
        now: Instant,
        config: &Config,
    ) -> Vec<Action> {
        let Some(invoke_id) = apdu.invoke_id() else {
            return Vec::new();
        };
        let role = if apdu.sent_by_server() { Role::Initiator } else { Role::Responder };
        let key = TransactionKey { peer, invoke_id, role };

        if let Some(transaction) = self.transactions.get_mut(&key) {
            let actions = transaction.on_pdu(apdu, now, config);
            self.retire(key);
            return actions;
        }

        match apdu {
            Apdu::ConfirmedRequest(request) => {
                let (transaction, actions) =
                    Transaction::receive_request(key, request, now, config);
                if let Some(transaction) = transaction {
                    if !transaction.state().is_terminal() {
                        tracing::debug!("Opened {:?} for service {}", key, request.service_choice);
                        self.transactions.insert(key, transaction);
                    }
                }
                actions
            }
            other => {
                tracing::debug!(
                    "Discarding {:?} for unknown invoke id {} from {}",
                    other.pdu_type(),
                    invoke_id,
                    peer
                );
                Vec::new()
            }
        }
    }

    /// Delivers the service handler's answer for a dispatched request.
    pub fn respond(
        &mut self,
        key: TransactionKey,
        response: std::result::Result<ServiceResponse, ServiceFailure>,
        now: Instant,
        config: &Config,
    ) -> Vec<Action> {
        let actions = match self.transactions.get_mut(&key) {
            Some(transaction) => transaction.respond(response, now, config),
            None => {
                tracing::debug!("Dropping response for closed {:?}", key);
                return Vec::new();
            }
        };
        self.retire(key);
        actions
    }

    /// Runs the timeout transition of every transaction whose deadline has passed.
    pub fn poll_timeouts(&mut self, now: Instant, config: &Config) -> Vec<Action> {
        let due: Vec<TransactionKey> = self
            .transactions
            .values()
            .filter(|transaction| transaction.is_due(now))
            .map(Transaction::key)
            .collect();
        let mut actions = Vec::new();
        for key in due {
            if let Some(transaction) = self.transactions.get_mut(&key) {
                actions.extend(transaction.on_timeout(now, config));
            }
            self.retire(key);
        }
        actions
    }

    /// Aborts and removes the transaction behind a cancelled reply future.
    pub fn cancel(&mut self, key: TransactionKey) -> Vec<Action> {
        match self.transactions.remove(&key) {
            Some(mut transaction) => {
                tracing::debug!("Cancelled {:?}", key);
                let actions = transaction.cancel();
                self.release(key);
                actions
            }
            None => Vec::new(),
        }
    }

    /// Drops every open transaction without telling the peers.
    ///
    /// Pending reply futures resolve with `ShutDown`. Returns how many were open.
    pub fn close_all(&mut self) -> usize {
        let count = self.transactions.len();
        for (key, _) in self.transactions.drain() {
            if key.role == Role::Initiator {
                self.invoke_ids.release(key.invoke_id);
            }
        }
        count
    }

    /// Earliest deadline among open transactions.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.transactions.values().filter_map(Transaction::deadline).min()
    }

    /// Looks up an open transaction.
    pub fn get(&self, key: &TransactionKey) -> Option<&Transaction> {
        self.transactions.get(key)
    }

    /// Number of open transactions.
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    /// Returns true if no transaction is open.
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Invoke ids currently held by initiator transactions.
    pub fn outstanding_invoke_ids(&self) -> usize {
        self.invoke_ids.outstanding()
    }

    /// Removes the transaction if it reached a terminal state.
    fn retire(&mut self, key: TransactionKey) {
        let terminal = self
            .transactions
            .get(&key)
            .is_some_and(|transaction| transaction.state().is_terminal());
        if terminal {
            if let Some(transaction) = self.transactions.remove(&key) {
                tracing::debug!("Closed {:?} in {:?}", key, transaction.state());
            }
            self.release(key);
        }
    }

    fn release(&mut self, key: TransactionKey) {
        if key.role == Role::Initiator {
            self.invoke_ids.release(key.invoke_id);
        }
    }
}
