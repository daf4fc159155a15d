use std::{
    io,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs, UdpSocket},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use bacflow_core::{
    config::Config,
    transport::{Network, ReceiveCallback},
};
use parking_lot::Mutex;
use socket2::Socket as Socket2;

/// How often the receive thread checks whether it should stop.
const RECEIVE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Applies socket options from configuration to a UdpSocket.
fn apply_socket_options(socket: &UdpSocket, config: &Config) -> io::Result<()> {
    let socket2 = Socket2::from(socket.try_clone()?);

    if let Some(size) = config.socket_recv_buffer_size {
        socket2.set_recv_buffer_size(size)?;
    }
    if let Some(size) = config.socket_send_buffer_size {
        socket2.set_send_buffer_size(size)?;
    }
    if config.socket_broadcast {
        socket.set_broadcast(true)?;
    }
    socket.set_read_timeout(Some(RECEIVE_POLL_INTERVAL))?;

    Ok(())
}

/// [`Network`] over a UDP socket.
///
/// Each datagram carries exactly one APDU. A dedicated thread receives
/// datagrams and hands them to the registered callback.
pub struct UdpNetwork {
    socket: UdpSocket,
    receive_buffer_size: usize,
    broadcast: bool,
    running: Arc<AtomicBool>,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for UdpNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpNetwork")
            .field("local_addr", &self.socket.local_addr().ok())
            .field("broadcast", &self.broadcast)
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish()
    }
}

impl UdpNetwork {
    /// Binds to `addresses` and applies the socket options from `config`.
    pub fn bind<A: ToSocketAddrs>(addresses: A, config: &Config) -> io::Result<Self> {
        let socket = UdpSocket::bind(addresses)?;
        apply_socket_options(&socket, config)?;
        Ok(Self {
            socket,
            receive_buffer_size: config.receive_buffer_size,
            broadcast: config.socket_broadcast,
            running: Arc::new(AtomicBool::new(false)),
            receiver: Mutex::new(None),
        })
    }

    /// Binds to any free port on localhost.
    pub fn bind_any(config: &Config) -> io::Result<Self> {
        Self::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0), config)
    }

    /// Stops the receive thread, if one is running.
    pub fn close(&self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.receiver.lock().take() {
            // The last endpoint reference may be dropped on the receive thread itself.
            if thread.thread().id() == thread::current().id() {
                return;
            }
            if thread.join().is_err() {
                tracing::error!("UDP receive thread panicked");
            }
        }
    }
}

impl Network for UdpNetwork {
    fn send(&self, peer: &SocketAddr, payload: &[u8], broadcast: bool) -> io::Result<()> {
        if broadcast && !self.broadcast {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "broadcast disabled on this socket",
            ));
        }
        let sent = self.socket.send_to(payload, peer)?;
        if sent != payload.len() {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "datagram truncated on send"));
        }
        Ok(())
    }

    fn on_receive(&self, callback: ReceiveCallback) -> io::Result<()> {
        let mut receiver = self.receiver.lock();
        if receiver.is_some() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "receive callback already registered",
            ));
        }
        let socket = self.socket.try_clone()?;
        let running = self.running.clone();
        let buffer_size = self.receive_buffer_size;
        running.store(true, Ordering::Release);
        let thread = thread::Builder::new()
            .name("bacflow-udp-recv".into())
            .spawn(move || receive_loop(socket, running, buffer_size, callback))?;
        *receiver = Some(thread);
        Ok(())
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl Drop for UdpNetwork {
    fn drop(&mut self) {
        self.close();
    }
}

fn receive_loop(
    socket: UdpSocket,
    running: Arc<AtomicBool>,
    buffer_size: usize,
    callback: ReceiveCallback,
) {
    let mut buffer = vec![0u8; buffer_size];
    while running.load(Ordering::Acquire) {
        match socket.recv_from(&mut buffer) {
            Ok((len, peer)) => callback(peer, &buffer[..len]),
            Err(err)
                if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
            // ICMP port-unreachable surfaces here on some platforms.
            Err(err) if err.kind() == io::ErrorKind::ConnectionReset => {}
            Err(err) => {
                tracing::error!("UDP receive failed: {}", err);
                thread::sleep(RECEIVE_POLL_INTERVAL);
            }
        }
    }
}
