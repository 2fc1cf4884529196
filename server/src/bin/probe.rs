//! Connects to a running gatekeeper server once and reports whether the
//! connection was admitted.

use bincode::{deserialize, serialize};
use clap::Parser;
use gatekeeper_shared::{strip_color_codes, Packet, PROTOCOL_VERSION};
use log::{debug, info, warn};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Server address to connect to
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    server: SocketAddr,
    /// Player name to connect as
    #[arg(short, long, default_value = "probe")]
    name: String,
    /// Seconds to wait for the admission decision
    #[arg(short, long, default_value = "10")]
    wait: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    debug!("Probe socket bound to {}", socket.local_addr()?);

    let connect = Packet::Connect {
        client_version: PROTOCOL_VERSION,
        name: args.name.clone(),
    };
    info!("Connecting to {} as {}", args.server, args.name);
    socket.send_to(&serialize(&connect)?, args.server).await?;

    let mut buf = [0u8; 2048];
    let len = match timeout(Duration::from_secs(args.wait), socket.recv_from(&mut buf)).await {
        Ok(received) => received?.0,
        Err(_) => {
            warn!("No answer from {} within {}s", args.server, args.wait);
            return Ok(());
        }
    };

    match deserialize::<Packet>(&buf[0..len])? {
        Packet::Connected { client_id } => {
            println!("Admitted with client ID {}", client_id);
            socket.send_to(&serialize(&Packet::Disconnect)?, args.server).await?;
        }
        Packet::Disconnected { reason } => {
            println!("Rejected: {}", strip_color_codes(&reason));
        }
        other => println!("Unexpected packet: {:?}", other),
    }

    Ok(())
}
