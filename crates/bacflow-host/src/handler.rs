//! Service-handler collaborator.

use std::net::SocketAddr;

use bacflow_protocol::InvokeId;
pub use bacflow_transaction::{ServiceFailure, ServiceResponse};

/// Produces answers for incoming service requests.
///
/// Called by the endpoint outside the transaction table lock, on whichever
/// thread delivered the final frame of the request.
pub trait ServiceHandler: Send + Sync {
    /// Handles a complete (reassembled) confirmed request.
    fn handle_confirmed(
        &self,
        peer: SocketAddr,
        invoke_id: InvokeId,
        service_choice: u8,
        payload: &[u8],
    ) -> Result<ServiceResponse, ServiceFailure>;

    /// Handles an unconfirmed request. No answer is sent.
    fn handle_unconfirmed(&self, peer: SocketAddr, service_choice: u8, payload: &[u8]);
}

/// Handler that rejects every confirmed request and ignores unconfirmed ones.
///
/// Suits nodes that only act as clients.
#[derive(Debug, Default)]
pub struct RejectAll;

impl ServiceHandler for RejectAll {
    fn handle_confirmed(
        &self,
        _peer: SocketAddr,
        _invoke_id: InvokeId,
        _service_choice: u8,
        _payload: &[u8],
    ) -> Result<ServiceResponse, ServiceFailure> {
        Err(ServiceFailure::Reject(bacflow_protocol::RejectReason::UnrecognizedService))
    }

    fn handle_unconfirmed(&self, _peer: SocketAddr, _service_choice: u8, _payload: &[u8]) {}
}
