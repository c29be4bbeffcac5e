//! Echo client: sends a few messages and prints what comes back.
//!
//! Run `echo-server` first, then:
//!   cargo run --example echo-client -- 127.0.0.1 7878

use sockstream::{SocketStream, TransportConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "127.0.0.1".to_string());
    let port: u16 = match args.next() {
        Some(port) => port.parse()?,
        None => 7878,
    };

    let mut stream = SocketStream::connect(&host, port, TransportConfig::default())?;
    info!(peer = ?stream.transport().peer_addr().ok(), "connected");

    for message in ["some data", "another data"] {
        let mut echo = String::new();
        stream.write_str(message)?.read_string(&mut echo)?;
        println!("{echo}");
    }

    let liveness = stream.transport().is_data_available()?;
    info!(
        connected = liveness.connected,
        pending = liveness.available_bytes,
        "done"
    );
    Ok(())
}
