//! WebSocket echo server with keepalive pings.
//!
//! Run with: cargo run --example echo_server
//! Then connect with any WebSocket client to ws://127.0.0.1:9001/

use std::error::Error;
use std::time::Duration;

use http::HeaderMap;
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};
use wsgate::{
    CloseCode, Config, HandshakePolicy, KeepAlive, Message, RawTransport, Upgrader, run_pinger,
};

const ADDR: &str = "127.0.0.1:9001";
const WRITE_WAIT: Duration = Duration::from_secs(10);
const PONG_WAIT: Duration = Duration::from_secs(60);
const MAX_MESSAGE_SIZE: usize = 512 * 1024;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,wsgate=debug".into()),
        )
        .init();

    let upgrader = Upgrader::new(
        HandshakePolicy::new()
            .with_compression(true)
            .with_subprotocols(["echo"])
            .with_config(Config::server().with_max_message_size(MAX_MESSAGE_SIZE)),
    );

    let listener = TcpListener::bind(ADDR).await?;
    info!("echo server listening on {ADDR}");

    loop {
        let (stream, addr) = listener.accept().await?;
        let upgrader = upgrader.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(upgrader, stream).await {
                warn!(%addr, error = %e, "connection ended with error");
            }
        });
    }
}

async fn handle_connection(upgrader: Upgrader, stream: TcpStream) -> wsgate::Result<()> {
    let max_head = upgrader.policy().config().limits.max_handshake_size;
    let (request, transport) = RawTransport::read_request(stream, max_head).await?;
    let mut conn = upgrader
        .upgrade(&request, HeaderMap::new(), transport)
        .await?;
    info!(
        path = request.uri().path(),
        subprotocol = conn.subprotocol(),
        compression = conn.compression_enabled(),
        "client connected"
    );

    let keepalive = KeepAlive::new(PONG_WAIT);
    conn.set_read_deadline(Some(keepalive.next_deadline()));
    let period = keepalive.ping_period();
    conn.set_control_handler(keepalive);

    let (mut reader, writer) = conn.split();
    let pinger = tokio::spawn(run_pinger(writer.clone(), period, WRITE_WAIT));

    let result = async {
        while let Some(message) = reader.read_message().await? {
            match message {
                Message::Close(frame) => {
                    info!(?frame, "client closed");
                    break;
                }
                message => {
                    writer.set_write_deadline(Some(tokio::time::Instant::now() + WRITE_WAIT));
                    writer.write_message(message).await?;
                }
            }
        }
        Ok::<_, wsgate::Error>(())
    }
    .await;

    if let Err(e) = &result {
        if e.is_unexpected_close_error(&[CloseCode::GoingAway, CloseCode::Normal]) {
            warn!(error = %e, "unexpected close");
        }
    }
    pinger.abort();
    result
}
