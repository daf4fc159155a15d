#![warn(missing_docs)]

//! Bacflow: a small public API facade for the workspace.
//!
//! This crate re-exports what an application needs to exchange confirmed
//! services over BACnet-style APDUs:
//!
//! - The endpoint and its collaborators (`Endpoint`, `UdpNetwork`, `ServiceHandler`)
//! - Reply futures and outcomes (`ReplyFuture`, `Reply`, `TransactionError`)
//! - Core configuration and errors (`Config`, `ErrorKind`)
//! - The APDU model and codec, for tools that work on raw frames
//!
//! Example
//! ```ignore
//! use std::sync::Arc;
//! use bacflow::prelude::*;
//!
//! let config = Config::default();
//! let network = Arc::new(UdpNetwork::bind_any(&config).unwrap());
//! let endpoint = Endpoint::with_system_clock(config, network, Arc::new(RejectAll)).unwrap();
//! let _driver = endpoint.spawn_timeout_driver().unwrap();
//!
//! let reply = endpoint.send_confirmed("127.0.0.1:47808".parse().unwrap(), 12, vec![0x0C]).unwrap();
//! match reply.wait() {
//!     Ok(Reply::ComplexAck { payload, .. }) => println!("{} bytes back", payload.len()),
//!     other => println!("{:?}", other),
//! }
//! ```

// Core config, errors and collaborator trait
pub use bacflow_core::{
    config::Config,
    error::{DecodeError, ErrorKind, Result, SegmentationError},
    payload::Payload,
    transport::{Network, ReceiveCallback},
};
// Host: the orchestrator, time sources and the UDP network
pub use bacflow_host::{
    Clock, DriverHandle, Endpoint, ManualClock, RejectAll, ServiceFailure, ServiceHandler,
    ServiceResponse, SystemClock, UdpNetwork,
};
// Protocol: APDU model and codec
pub use bacflow_protocol::{
    AbortReason, Apdu, ApduDecoder, ApduEncoder, InvokeId, MaxSegments, PduType, RejectReason,
};
// Transactions: reply futures and outcomes
pub use bacflow_transaction::{
    Reply, ReplyFuture, ReplyResult, Role, TimeoutStage, TransactionError, TransactionKey,
};

/// Convenience prelude with the most commonly used items.
pub mod prelude {
    pub use crate::{
        AbortReason, Config, Endpoint, ErrorKind, Payload, RejectAll, RejectReason, Reply,
        ReplyFuture, ServiceFailure, ServiceHandler, ServiceResponse, TransactionError,
        UdpNetwork,
    };
}
