//! Sends confirmed echo requests to a responder and prints the replies.
//!
//! Run the responder first:
//! - cargo run -p bacflow --example responder -- 127.0.0.1:47808
//!
//! Then run the initiator:
//! - cargo run -p bacflow --example initiator -- 127.0.0.1:47808
//! - cargo run -p bacflow --example initiator -- 127.0.0.1:47808 4000 3
//!   (sends 3 requests of 4000 bytes each, which are segmented)

use std::{env, net::SocketAddr, sync::Arc, time::Instant};

use bacflow::prelude::*;
use tracing_subscriber::EnvFilter;

const ECHO: u8 = 12;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    // Args: <responder_addr> [size] [count]
    let mut args = env::args().skip(1);
    let responder: SocketAddr = args
        .next()
        .unwrap_or_else(|| "127.0.0.1:47808".to_string())
        .parse()?;
    let size: usize = args.next().and_then(|s| s.parse().ok()).unwrap_or(200);
    let count: usize = args.next().and_then(|s| s.parse().ok()).unwrap_or(5);

    let config = Config::default();
    let network = Arc::new(UdpNetwork::bind("127.0.0.1:0", &config)?);
    let endpoint = Endpoint::with_system_clock(config, network, Arc::new(RejectAll))?;
    let _driver = endpoint.spawn_timeout_driver()?;

    for i in 0..count {
        let payload: Vec<u8> = (0..size).map(|b| (b + i) as u8).collect();
        let started = Instant::now();
        let reply = endpoint.send_confirmed(responder, ECHO, payload.clone())?;
        match reply.wait() {
            Ok(Reply::ComplexAck { payload: echoed, .. }) => println!(
                "[reply] invoke_id={} bytes={} intact={} in {:?}",
                reply.invoke_id(),
                echoed.len(),
                echoed.as_slice() == payload.as_slice(),
                started.elapsed()
            ),
            Ok(other) => println!("[reply] invoke_id={} {:?}", reply.invoke_id(), other),
            Err(err) => println!("[failed] invoke_id={} {}", reply.invoke_id(), err),
        }
    }

    endpoint.shutdown();
    println!("done");
    Ok(())
}
