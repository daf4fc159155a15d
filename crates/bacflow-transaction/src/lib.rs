#![warn(missing_docs)]

//! bacflow-transaction: the confirmed-service transaction layer.
//!
//! - `InvokeIdAllocator` hands out request correlation ids
//! - `Transaction` is a pure state machine emitting `Action`s
//! - `TransactionTable` owns every open transaction and routes PDUs to them
//! - `ReplyFuture` is the caller's handle on the eventual outcome

/// Invoke id allocation.
pub mod invoke_id;
/// Reply futures and transaction outcomes.
pub mod reply;
/// Transaction lifecycle states.
pub mod state;
/// The transaction table.
pub mod table;
/// Per-transaction state machine.
pub mod transaction;

pub use invoke_id::InvokeIdAllocator;
pub use reply::{
    reply_channel, CancelHook, Reply, ReplyCompleter, ReplyFuture, ReplyResult, TimeoutStage,
    TransactionError,
};
pub use state::TransactionState;
pub use table::TransactionTable;
pub use transaction::{
    Action, IncomingRequest, Role, ServiceFailure, ServiceResponse, Transaction, TransactionKey,
};
