//! Minimal WebSocket client: a hand-written upgrade request followed by a
//! client-role connection.

use std::net::SocketAddr;
use std::time::Duration;

use http::StatusCode;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use wsgate::{
    CloseCode, Config, Connection, Error, HandshakeError, Message, Role, compute_accept_key,
};

pub const CLIENT_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

/// Send an upgrade request with `extra` headers and read the response head.
///
/// Returns the head (status line and headers) and the stream positioned at
/// the first byte after it.
pub async fn raw_handshake(
    addr: SocketAddr,
    extra: &[(&str, &str)],
) -> std::io::Result<(String, BufReader<TcpStream>)> {
    let mut stream = BufReader::new(TcpStream::connect(addr).await?);

    let mut request = format!(
        "GET /ws HTTP/1.1\r\nHost: {addr}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
         Sec-WebSocket-Key: {CLIENT_KEY}\r\n"
    );
    if !extra.iter().any(|(name, _)| name.eq_ignore_ascii_case("sec-websocket-version")) {
        request.push_str("Sec-WebSocket-Version: 13\r\n");
    }
    for (name, value) in extra {
        request.push_str(&format!("{name}: {value}\r\n"));
    }
    request.push_str("\r\n");
    stream.get_mut().write_all(request.as_bytes()).await?;

    let mut head = String::new();
    loop {
        let read = stream.read_line(&mut head).await?;
        if read == 0 || head.ends_with("\r\n\r\n") {
            break;
        }
    }
    Ok((head, stream))
}

fn header<'a>(head: &'a str, name: &str) -> Option<&'a str> {
    head.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim())
    })
}

pub struct TestClient {
    pub id: usize,
    conn: Connection<BufReader<TcpStream>>,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> wsgate::Result<Self> {
        Self::connect_with(addr, 0, &[], Config::client()).await
    }

    pub async fn connect_with_id(addr: SocketAddr, id: usize) -> wsgate::Result<Self> {
        Self::connect_with(addr, id, &[], Config::client()).await
    }

    pub async fn connect_with(
        addr: SocketAddr,
        id: usize,
        extra: &[(&str, &str)],
        config: Config,
    ) -> wsgate::Result<Self> {
        let (head, stream) = raw_handshake(addr, extra).await?;
        let status = head
            .split(' ')
            .nth(1)
            .and_then(|code| code.parse::<u16>().ok())
            .and_then(|code| StatusCode::from_u16(code).ok())
            .unwrap_or(StatusCode::BAD_GATEWAY);
        if status != StatusCode::SWITCHING_PROTOCOLS {
            return Err(Error::Handshake(HandshakeError::new(status, head)));
        }
        assert_eq!(
            header(&head, "sec-websocket-accept"),
            Some(compute_accept_key(CLIENT_KEY).as_str())
        );

        let subprotocol = header(&head, "sec-websocket-protocol").map(str::to_owned);
        let compression = header(&head, "sec-websocket-extensions")
            .is_some_and(|ext| ext.starts_with("permessage-deflate"));
        let conn = Connection::negotiated(stream, Role::Client, config, subprotocol, compression);
        Ok(Self { id, conn })
    }

    pub fn conn(&mut self) -> &mut Connection<BufReader<TcpStream>> {
        &mut self.conn
    }

    pub fn into_conn(self) -> Connection<BufReader<TcpStream>> {
        self.conn
    }

    pub async fn send_text(&self, text: &str) -> wsgate::Result<()> {
        self.conn.write_message(Message::text(text)).await
    }

    pub async fn send_binary(&self, data: &[u8]) -> wsgate::Result<()> {
        self.conn.write_message(Message::binary(data)).await
    }

    pub async fn recv(&mut self) -> wsgate::Result<Option<Message>> {
        self.conn.read_message().await
    }

    /// Next text message; `None` once the peer closed.
    pub async fn recv_text(&mut self) -> wsgate::Result<Option<String>> {
        loop {
            match self.conn.read_message().await? {
                Some(Message::Text(text)) => return Ok(Some(text)),
                Some(Message::Close(_)) | None => return Ok(None),
                Some(_) => continue,
            }
        }
    }

    pub async fn close(&mut self) -> wsgate::Result<()> {
        self.conn
            .close_with_grace(CloseCode::Normal, "", Duration::from_secs(1))
            .await
    }
}
