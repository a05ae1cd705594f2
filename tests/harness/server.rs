//! WebSocket echo server on a random local port.

use std::net::SocketAddr;
use std::sync::Arc;

use http::HeaderMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use wsgate::{HandshakePolicy, RawTransport, Upgrader};

pub struct TestServer {
    handle: JoinHandle<()>,
    stop: Arc<Notify>,
}

impl TestServer {
    /// Echo server with the default policy.
    pub async fn spawn() -> (Self, SocketAddr) {
        Self::spawn_with(HandshakePolicy::new()).await
    }

    pub async fn spawn_with(policy: HandshakePolicy) -> (Self, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let upgrader = Upgrader::new(policy);
        let stop = Arc::new(Notify::new());

        let notified = stop.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = notified.notified() => break,
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { continue };
                        let upgrader = upgrader.clone();
                        tokio::spawn(async move {
                            let _ = serve(upgrader, stream).await;
                        });
                    }
                }
            }
        });

        (Self { handle, stop }, addr)
    }

    pub async fn shutdown(self) {
        self.stop.notify_one();
        let _ = self.handle.await;
    }
}

async fn serve(upgrader: Upgrader, stream: TcpStream) -> wsgate::Result<()> {
    let max_head = upgrader.policy().config().limits.max_handshake_size;
    let (request, transport) = RawTransport::read_request(stream, max_head).await?;
    let mut conn = upgrader
        .upgrade(&request, HeaderMap::new(), transport)
        .await?;

    while let Some(msg) = conn.read_message().await? {
        if msg.is_close() {
            break;
        }
        conn.write_message(msg).await?;
    }
    Ok(())
}
