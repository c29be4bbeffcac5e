//! Echo server: every frame received is sent straight back.
//!
//! Run with:
//!   cargo run --example echo-server -- 7878
//!
//! Then in another terminal:
//!   cargo run --example echo-client -- 127.0.0.1 7878
//!
//! Set `RUST_LOG=debug` to see transport activity.

use std::net::TcpListener;
use std::time::Duration;

use sockstream::{SocketStream, TransportConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_PORT: u16 = 7878;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .init();

    let port = match std::env::args().nth(1) {
        Some(port) => port.parse()?,
        None => DEFAULT_PORT,
    };

    let listener = TcpListener::bind(("127.0.0.1", port))?;
    info!(addr = %listener.local_addr()?, "listening");

    for accepted in listener.incoming() {
        let stream = match accepted {
            Ok(stream) => stream,
            Err(err) => {
                warn!(error = %err, "accept failed");
                continue;
            }
        };

        std::thread::spawn(move || {
            let peer = stream.peer_addr().ok();
            let config = TransportConfig::default().with_timeout(Duration::ZERO);
            match SocketStream::adopt(stream, config) {
                Ok(mut client) => {
                    if let Err(err) = echo(&mut client) {
                        warn!(?peer, error = %err, "client failed");
                    }
                }
                Err(err) => warn!(?peer, error = %err, "could not set up client"),
            }
            info!(?peer, "client disconnected");
        });
    }

    Ok(())
}

fn echo(client: &mut SocketStream) -> sockstream::buffer::Result<()> {
    let mut message = Vec::new();
    loop {
        client.read_bytes(&mut message)?;
        if client.eof() {
            return Ok(());
        }
        info!(len = message.len(), "echoing");
        client.write_bytes(&message)?;
    }
}
