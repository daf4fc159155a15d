//! Echo responder: answers confirmed service 12 with a ComplexACK carrying
//! the request bytes back, and logs unconfirmed requests.
//!
//! Run:
//! - cargo run -p bacflow --example responder
//! - RUST_LOG=debug cargo run -p bacflow --example responder -- 127.0.0.1:47808

use std::{env, net::SocketAddr, sync::Arc, thread, time::Duration};

use bacflow::prelude::*;
use bacflow::InvokeId;
use tracing_subscriber::EnvFilter;

const ECHO: u8 = 12;

struct Echo;

impl ServiceHandler for Echo {
    fn handle_confirmed(
        &self,
        peer: SocketAddr,
        invoke_id: InvokeId,
        service_choice: u8,
        payload: &[u8],
    ) -> Result<ServiceResponse, ServiceFailure> {
        println!(
            "[confirmed] from={} invoke_id={} service={} bytes={}",
            peer,
            invoke_id,
            service_choice,
            payload.len()
        );
        match service_choice {
            ECHO => Ok(ServiceResponse::ComplexAck(Payload::from(payload))),
            _ => Err(ServiceFailure::Reject(RejectReason::UnrecognizedService)),
        }
    }

    fn handle_unconfirmed(&self, peer: SocketAddr, service_choice: u8, payload: &[u8]) {
        println!("[unconfirmed] from={} service={} bytes={}", peer, service_choice, payload.len());
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let bind_addr: SocketAddr = env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 47808)));

    let config = Config::default();
    let network = Arc::new(UdpNetwork::bind(bind_addr, &config)?);
    let endpoint = Endpoint::with_system_clock(config, network, Arc::new(Echo))?;
    let _driver = endpoint.spawn_timeout_driver()?;
    println!("bacflow echo responder listening on {}", bind_addr);

    loop {
        thread::sleep(Duration::from_secs(5));
        println!("[status] open transactions: {}", endpoint.open_transactions());
    }
}
