//! Network collaborator abstraction.

use std::{io::Result, net::SocketAddr};

/// Callback invoked with every datagram the network receives.
pub type ReceiveCallback = Box<dyn Fn(SocketAddr, &[u8]) + Send + Sync>;

/// Datagram network the engine sends APDUs through.
///
/// The engine never manages sockets itself. Implementations may be a UDP
/// socket, an MS/TP port driver, or an in-memory loopback used in tests.
pub trait Network: Send + Sync {
    /// Sends one encoded APDU to `peer`. `broadcast` marks a local broadcast.
    fn send(&self, peer: &SocketAddr, payload: &[u8], broadcast: bool) -> Result<()>;

    /// Registers the callback that receives incoming datagrams.
    ///
    /// Called once by the endpoint at construction. Implementations may invoke
    /// the callback concurrently from several receive threads.
    fn on_receive(&self, callback: ReceiveCallback) -> Result<()>;

    /// Returns the local address of this node, if it has one.
    fn local_addr(&self) -> Result<SocketAddr>;
}
