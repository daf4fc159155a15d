#![warn(missing_docs)]

//! bacflow-host: runs the transaction engine against a real network.
//!
//! [`Endpoint`] is the dispatch/send orchestrator. It owns the transaction
//! table behind a single lock, feeds received frames through it, calls the
//! [`ServiceHandler`] for complete requests, and is driven in time either by
//! [`Endpoint::poll_timeouts`] or by the background driver returned from
//! [`Endpoint::spawn_timeout_driver`].

mod driver;
mod endpoint;
/// Service-handler collaborator.
pub mod handler;
/// Time source abstraction.
pub mod time;
/// UDP network collaborator.
pub mod udp;

pub use driver::DriverHandle;
pub use endpoint::Endpoint;
pub use handler::{RejectAll, ServiceFailure, ServiceHandler, ServiceResponse};
pub use time::{Clock, ManualClock, SystemClock};
pub use udp::UdpNetwork;
