use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tracing::debug;

use crate::config::Config;
use crate::connection::control::ControlHandler;
use crate::connection::lifecycle::Shared;
use crate::connection::reader::MessageReader;
use crate::connection::writer::{FragmentWriter, FrameSink, MessageWriter};
use crate::connection::{CloseState, Role};
use crate::error::Result;
use crate::message::{CloseCode, Message};
use crate::protocol::OpCode;

/// A WebSocket connection over an established duplex stream.
///
/// Created after a successful handshake, usually by
/// [`Upgrader::upgrade`](crate::upgrade::Upgrader::upgrade). Reads and
/// writes may run concurrently from two tasks via [`split`](Self::split).
///
/// ## Example
///
/// ```rust,ignore
/// use wsgate::{CloseCode, Config, Connection, Message, Role};
///
/// let mut conn = Connection::new(stream, Role::Server, Config::server());
/// while let Some(msg) = conn.read_message().await? {
///     if msg.is_close() {
///         break;
///     }
///     conn.write_message(msg).await?;
/// }
/// ```
pub struct Connection<S> {
    reader: MessageReader<S>,
    writer: MessageWriter<S>,
}

impl<S: AsyncRead + AsyncWrite> Connection<S> {
    /// Wrap a stream on which the handshake already completed, without
    /// subprotocol or compression.
    pub fn new(io: S, role: Role, config: Config) -> Self {
        Self::negotiated(io, role, config, None, false)
    }

    /// Wrap a stream with the outcome of a handshake.
    pub fn negotiated(
        io: S,
        role: Role,
        config: Config,
        subprotocol: Option<String>,
        compression: bool,
    ) -> Self {
        let (read, write) = tokio::io::split(io);
        let sink = FrameSink::new(write, role, &config);
        let shared = Arc::new(Shared::new(sink, role, &config, subprotocol, compression));
        let reader = MessageReader::new(read, Arc::clone(&shared), &config, compression);
        Self {
            reader,
            writer: MessageWriter { shared },
        }
    }

    /// See [`MessageReader::read_message`].
    ///
    /// # Errors
    ///
    /// Every error is fatal to the connection.
    pub async fn read_message(&mut self) -> Result<Option<Message>> {
        self.reader.read_message().await
    }

    /// See [`MessageWriter::write_message`].
    ///
    /// # Errors
    ///
    /// See [`MessageWriter::write_message`].
    pub async fn write_message(&self, message: Message) -> Result<()> {
        self.writer.write_message(message).await
    }

    /// See [`MessageWriter::write_control`].
    ///
    /// # Errors
    ///
    /// See [`MessageWriter::write_control`].
    pub async fn write_control(
        &self,
        opcode: OpCode,
        payload: &[u8],
        deadline: Option<Instant>,
    ) -> Result<()> {
        self.writer.write_control(opcode, payload, deadline).await
    }

    /// See [`MessageWriter::begin`].
    ///
    /// # Errors
    ///
    /// See [`MessageWriter::begin`].
    pub async fn begin(&self, opcode: OpCode) -> Result<FragmentWriter<S>> {
        self.writer.begin(opcode).await
    }

    /// Send a close frame without waiting for the peer's reply.
    ///
    /// # Errors
    ///
    /// See [`MessageWriter::close`].
    pub async fn close(&self, code: CloseCode, reason: &str) -> Result<()> {
        self.writer.close(code, reason).await
    }

    /// [`close_with_grace`](Self::close_with_grace) using the configured
    /// [`Timeouts::close_grace`](crate::config::Timeouts::close_grace).
    ///
    /// # Errors
    ///
    /// Only errors from sending the close frame are returned.
    pub async fn close_gracefully(&mut self, code: CloseCode, reason: &str) -> Result<()> {
        let grace = self.writer.shared.timeouts.close_grace;
        self.close_with_grace(code, reason, grace).await
    }

    /// Send a close frame, then read (discarding data) until the peer's close
    /// frame arrives, the stream ends or `grace` elapses. The transport is
    /// shut down in every case.
    ///
    /// # Errors
    ///
    /// Only errors from sending the close frame are returned.
    pub async fn close_with_grace(
        &mut self,
        code: CloseCode,
        reason: &str,
        grace: Duration,
    ) -> Result<()> {
        self.writer.close(code, reason).await?;
        self.reader.set_read_deadline(Some(Instant::now() + grace));
        loop {
            match self.reader.read_message().await {
                Ok(Some(Message::Close(_)) | None) => break,
                Ok(Some(_)) => {}
                Err(err) => {
                    debug!(error = %err, "close handshake not completed");
                    break;
                }
            }
        }
        self.writer.shared.teardown().await;
        Ok(())
    }

    /// Resolves once the connection is fully closed.
    pub async fn closed(&self) {
        self.writer.closed().await;
    }
}

impl<S> Connection<S> {
    pub fn set_read_deadline(&mut self, deadline: Option<Instant>) {
        self.reader.set_read_deadline(deadline);
    }

    pub fn set_write_deadline(&self, deadline: Option<Instant>) {
        self.writer.set_write_deadline(deadline);
    }

    /// Largest message the reader accepts, after decompression.
    pub fn set_read_limit(&mut self, limit: usize) {
        self.reader.set_read_limit(limit);
    }

    pub fn enable_write_compression(&self, enabled: bool) {
        self.writer.enable_write_compression(enabled);
    }

    pub fn set_compression_level(&self, level: u32) {
        self.writer.set_compression_level(level);
    }

    /// Replace the ping/pong/close hooks.
    pub fn set_control_handler(&mut self, handler: impl ControlHandler + 'static) {
        self.reader.set_control_handler(handler);
    }

    /// The subprotocol agreed during the handshake.
    #[must_use]
    pub fn subprotocol(&self) -> Option<&str> {
        self.writer.shared.subprotocol.as_deref()
    }

    /// Whether permessage-deflate was negotiated.
    #[must_use]
    pub fn compression_enabled(&self) -> bool {
        self.writer.shared.negotiated_compression
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.writer.shared.role
    }

    #[must_use]
    pub fn state(&self) -> CloseState {
        self.writer.state()
    }

    /// A writer handle that may be moved to another task.
    #[must_use]
    pub fn writer(&self) -> MessageWriter<S> {
        self.writer.clone()
    }

    /// Separate the read and write sides so they can be driven by
    /// different tasks.
    #[must_use]
    pub fn split(self) -> (MessageReader<S>, MessageWriter<S>) {
        (self.reader, self.writer)
    }
}

impl<S> std::fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("reader", &self.reader)
            .field("writer", &self.writer)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Limits, Timeouts};
    use crate::connection::run_pinger;
    use crate::error::Error;
    use crate::extensions::compress;
    use crate::message::CloseFrame;
    use crate::protocol::Frame;
    use bytes::BytesMut;
    use std::io::Cursor;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadBuf};

    /// Replays `read_data`, records writes into a buffer the test keeps.
    struct MockStream {
        read_data: Cursor<Vec<u8>>,
        written: Arc<Mutex<Vec<u8>>>,
    }

    impl MockStream {
        fn new(data: Vec<u8>) -> (Self, Arc<Mutex<Vec<u8>>>) {
            let written = Arc::new(Mutex::new(Vec::new()));
            let stream = Self {
                read_data: Cursor::new(data),
                written: Arc::clone(&written),
            };
            (stream, written)
        }
    }

    impl AsyncRead for MockStream {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            let pos = self.read_data.position() as usize;
            let data = self.read_data.get_ref();
            if pos >= data.len() {
                return Poll::Ready(Ok(()));
            }
            let remaining = &data[pos..];
            let to_copy = std::cmp::min(remaining.len(), buf.remaining());
            buf.put_slice(&remaining[..to_copy]);
            self.read_data.set_position((pos + to_copy) as u64);
            Poll::Ready(Ok(()))
        }
    }

    impl AsyncWrite for MockStream {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            self.written.lock().unwrap().extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn masked(frame: Frame) -> Vec<u8> {
        let mut buf = BytesMut::new();
        frame.with_mask(Some([1, 2, 3, 4])).encode(&mut buf);
        buf.to_vec()
    }

    fn decode_written(written: &Arc<Mutex<Vec<u8>>>) -> Vec<Frame> {
        let codec = crate::protocol::frame::FrameCodec::new(Role::Client, usize::MAX)
            .with_compression(true);
        let mut buf = BytesMut::from(&written.lock().unwrap()[..]);
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(&mut buf).unwrap() {
            frames.push(frame);
        }
        frames
    }

    fn server(data: Vec<u8>) -> (Connection<MockStream>, Arc<Mutex<Vec<u8>>>) {
        let (stream, written) = MockStream::new(data);
        (Connection::new(stream, Role::Server, Config::server()), written)
    }

    #[tokio::test]
    async fn test_write_text_message() {
        let (conn, written) = server(vec![]);
        conn.write_message(Message::text("Hello")).await.unwrap();
        assert_eq!(&written.lock().unwrap()[..], &[0x81, 0x05, b'H', b'e', b'l', b'l', b'o']);
    }

    #[tokio::test]
    async fn test_client_masks_outgoing() {
        let (stream, written) = MockStream::new(vec![]);
        let conn = Connection::new(stream, Role::Client, Config::client());
        conn.write_message(Message::binary(vec![1, 2, 3])).await.unwrap();

        let bytes = written.lock().unwrap().clone();
        assert_eq!(bytes[0], 0x82);
        assert_eq!(bytes[1], 0x80 | 3);
        assert_eq!(bytes.len(), 2 + 4 + 3);
    }

    #[tokio::test]
    async fn test_read_message() {
        let (mut conn, _) = server(masked(Frame::text("Hello")));
        let msg = conn.read_message().await.unwrap().unwrap();
        assert_eq!(msg, Message::text("Hello"));
    }

    #[tokio::test]
    async fn test_read_fragments_with_interleaved_ping() {
        let mut data = masked(Frame::new(false, OpCode::Binary, vec![0u8; 10]));
        data.extend(masked(Frame::ping("hb")));
        data.extend(masked(Frame::new(false, OpCode::Continuation, vec![1u8; 10])));
        data.extend(masked(Frame::new(true, OpCode::Continuation, vec![2u8; 5])));
        let (mut conn, written) = server(data);

        let msg = conn.read_message().await.unwrap().unwrap();
        let payload = msg.into_data().unwrap();
        assert_eq!(payload.len(), 25);
        assert_eq!(&payload[20..], &[2u8; 5]);

        let frames = decode_written(&written);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].opcode, OpCode::Pong);
        assert_eq!(frames[0].payload(), b"hb");
    }

    #[tokio::test]
    async fn test_peer_close_is_echoed() {
        let (mut conn, written) = server(masked(Frame::close(CloseCode::Normal, "bye")));

        let msg = conn.read_message().await.unwrap().unwrap();
        assert_eq!(msg, Message::close(CloseCode::Normal, "bye"));
        assert_eq!(conn.state(), CloseState::Closed);

        let frames = decode_written(&written);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].opcode, OpCode::Close);
        assert_eq!(&frames[0].payload()[..2], &1000u16.to_be_bytes());

        assert_eq!(conn.read_message().await.unwrap(), None);
        let err = conn.write_message(Message::text("late")).await.unwrap_err();
        assert!(err.is_close_error(&[CloseCode::Normal]));
    }

    #[tokio::test]
    async fn test_one_byte_close_is_protocol_error() {
        let (mut conn, written) = server(masked(Frame::new(true, OpCode::Close, vec![0x03])));

        let err = conn.read_message().await.unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation(_)));
        assert_eq!(conn.state(), CloseState::Closed);

        let frames = decode_written(&written);
        assert_eq!(frames[0].opcode, OpCode::Close);
        assert_eq!(&frames[0].payload()[..2], &1002u16.to_be_bytes());

        // The error sticks.
        assert_eq!(conn.read_message().await.unwrap_err(), err);
    }

    #[tokio::test]
    async fn test_unmasked_frame_rejected_by_server() {
        let mut buf = BytesMut::new();
        Frame::text("x").encode(&mut buf);
        let (mut conn, _) = server(buf.to_vec());
        assert_eq!(conn.read_message().await.unwrap_err(), Error::UnmaskedClientFrame);
    }

    #[tokio::test]
    async fn test_read_limit() {
        let (mut conn, written) = server(masked(Frame::binary(vec![0u8; 64])));
        conn.set_read_limit(32);
        let err = conn.read_message().await.unwrap_err();
        assert!(matches!(err, Error::MessageTooLarge { .. }));

        let frames = decode_written(&written);
        assert_eq!(&frames[0].payload()[..2], &1009u16.to_be_bytes());
    }

    #[tokio::test]
    async fn test_eof_without_close() {
        let (mut conn, _) = server(vec![]);
        let err = conn.read_message().await.unwrap_err();
        assert_eq!(err, Error::ConnectionClosed(None));
        assert!(err.is_unexpected_close_error(&[CloseCode::Normal]));
    }

    #[tokio::test]
    async fn test_close_then_write_fails() {
        let (conn, written) = server(vec![]);
        conn.close(CloseCode::Normal, "done").await.unwrap();
        assert_eq!(conn.state(), CloseState::CloseSent);

        assert_eq!(
            conn.write_message(Message::text("x")).await,
            Err(Error::AlreadyClosed)
        );
        assert_eq!(
            conn.close(CloseCode::Normal, "again").await,
            Err(Error::AlreadyClosed)
        );
        assert_eq!(decode_written(&written).len(), 1);
    }

    #[tokio::test]
    async fn test_close_rejects_reserved_code() {
        let (conn, _) = server(vec![]);
        assert_eq!(
            conn.close(CloseCode::Abnormal, "").await,
            Err(Error::InvalidCloseCode(1006))
        );
        assert_eq!(conn.state(), CloseState::Open);
    }

    #[tokio::test]
    async fn test_write_control_validation() {
        let (conn, _) = server(vec![]);
        assert!(matches!(
            conn.write_control(OpCode::Text, b"", None).await,
            Err(Error::ProtocolViolation(_))
        ));
        assert_eq!(
            conn.write_control(OpCode::Ping, &[0u8; 126], None).await,
            Err(Error::ControlFrameTooLarge(126))
        );
        conn.write_control(OpCode::Ping, b"ok", None).await.unwrap();
    }

    #[tokio::test]
    async fn test_write_fragmented_and_compressed() {
        let (stream, written) = MockStream::new(vec![]);
        let config = Config::server().with_fragment_size(8);
        let conn = Connection::negotiated(stream, Role::Server, config, None, true);
        assert!(conn.compression_enabled());

        let text = "abcdefgh".repeat(20);
        conn.write_message(Message::text(text.clone())).await.unwrap();

        let frames = decode_written(&written);
        assert!(frames[0].rsv1);
        assert!(frames[1..].iter().all(|f| !f.rsv1 && f.opcode == OpCode::Continuation));
        let wire: Vec<u8> = frames.iter().flat_map(|f| f.payload().to_vec()).collect();
        assert_eq!(wire, compress(text.as_bytes(), 1).unwrap());
    }

    #[tokio::test]
    async fn test_compression_can_be_disabled_per_connection() {
        let (stream, written) = MockStream::new(vec![]);
        let conn = Connection::negotiated(stream, Role::Server, Config::server(), None, true);
        conn.enable_write_compression(false);
        conn.write_message(Message::text("plain")).await.unwrap();
        let frames = decode_written(&written);
        assert!(!frames[0].rsv1);
        assert_eq!(frames[0].payload(), b"plain");
    }

    #[tokio::test]
    async fn test_compressed_message_read() {
        let payload = compress(b"squeeze me squeeze me", 6).unwrap();
        let frame = Frame::new(true, OpCode::Text, payload).with_rsv1(true);
        let (stream, _) = MockStream::new(masked(frame));
        let mut conn = Connection::negotiated(stream, Role::Server, Config::server(), None, true);
        let msg = conn.read_message().await.unwrap().unwrap();
        assert_eq!(msg.as_text(), Some("squeeze me squeeze me"));
    }

    #[tokio::test]
    async fn test_streaming_writer() {
        let (stream, written) = MockStream::new(vec![]);
        let conn = Connection::new(stream, Role::Server, Config::server().with_fragment_size(4));

        let mut fragments = conn.begin(OpCode::Binary).await.unwrap();
        fragments.write(&[1, 2, 3]).await.unwrap();
        fragments.write(&[4, 5, 6, 7, 8, 9]).await.unwrap();
        fragments.finish().await.unwrap();

        let frames = decode_written(&written);
        let fins: Vec<_> = frames.iter().map(|f| f.fin).collect();
        assert_eq!(fins, vec![false, false, true]);
        assert_eq!(frames[0].opcode, OpCode::Binary);
        assert_eq!(frames[1].opcode, OpCode::Continuation);
        assert_eq!(frames[0].payload(), &[1, 2, 3, 4]);
        assert_eq!(frames[1].payload(), &[5, 6, 7, 8]);
        assert_eq!(frames[2].payload(), &[9]);
    }

    #[tokio::test]
    async fn test_abandoned_streaming_writer_closes_connection() {
        let (stream, _) = MockStream::new(vec![]);
        let conn = Connection::new(stream, Role::Server, Config::server().with_fragment_size(2));
        {
            let mut fragments = conn.begin(OpCode::Text).await.unwrap();
            fragments.write(b"abcdef").await.unwrap();
        }
        assert_eq!(conn.state(), CloseState::Closed);
    }

    #[tokio::test]
    async fn test_close_with_grace_over_duplex() {
        let (local, mut remote) = tokio::io::duplex(1024);
        let mut conn = Connection::new(local, Role::Server, Config::server());

        let peer = tokio::spawn(async move {
            // Read the server's close frame, answer with a masked close.
            let mut buf = vec![0u8; 64];
            let n = remote.read(&mut buf).await.unwrap();
            assert_eq!(buf[0], 0x88);
            assert!(n >= 4);
            remote
                .write_all(&masked(Frame::close(CloseCode::Normal, "")))
                .await
                .unwrap();
        });

        conn.close_with_grace(CloseCode::Normal, "shutdown", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(conn.state(), CloseState::Closed);
        peer.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_gracefully_gives_up_on_silent_peer() {
        let (local, _remote) = tokio::io::duplex(1024);
        let timeouts = Timeouts::new(
            Duration::from_secs(10),
            Duration::from_millis(50),
            Duration::from_secs(1),
        );
        let config = Config::server().with_timeouts(timeouts);
        let mut conn = Connection::new(local, Role::Server, config);

        conn.close_gracefully(CloseCode::GoingAway, "").await.unwrap();
        assert_eq!(conn.state(), CloseState::Closed);
    }

    #[tokio::test]
    async fn test_read_deadline() {
        let (local, _remote) = tokio::io::duplex(64);
        let mut conn = Connection::new(local, Role::Server, Config::server());
        conn.set_read_deadline(Some(Instant::now() + Duration::from_millis(20)));
        assert_eq!(conn.read_message().await.unwrap_err(), Error::Timeout);
        assert_eq!(conn.state(), CloseState::Closed);
    }

    #[tokio::test]
    async fn test_closed_signal_wakes_reader() {
        let (local, _remote) = tokio::io::duplex(64);
        let conn = Connection::new(local, Role::Server, Config::server());
        let (mut reader, writer) = conn.split();

        let read = tokio::spawn(async move { reader.read_message().await });
        writer
            .close_and_wait(CloseCode::GoingAway, "", Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(read.await.unwrap(), Err(Error::AlreadyClosed));
        writer.closed().await;
    }

    #[tokio::test]
    async fn test_read_limit_keeps_frame_cap() {
        let mut data = masked(Frame::new(false, OpCode::Binary, vec![7u8; 32]));
        data.extend(masked(Frame::new(true, OpCode::Continuation, vec![7u8; 32])));
        data.extend(masked(Frame::binary(vec![0u8; 64])));
        let (stream, _) = MockStream::new(data);
        let config = Config::server().with_limits(Limits::new(32, 48, 8192));
        let mut conn = Connection::new(stream, Role::Server, config);
        conn.set_read_limit(4096);

        let msg = conn.read_message().await.unwrap().unwrap();
        assert_eq!(msg.as_binary(), Some(&[7u8; 64][..]));
        let err = conn.read_message().await.unwrap_err();
        assert_eq!(err, Error::MessageTooLarge { size: 64, max: 32 });
    }

    #[tokio::test]
    async fn test_ping_dropped_while_writer_busy() {
        let mut data = masked(Frame::ping("hi"));
        data.extend(masked(Frame::text("after")));
        let (mut conn, written) = server(data);

        let shared = Arc::clone(&conn.writer.shared);
        let busy = shared.sink.lock().await;
        let msg = conn.read_message().await.unwrap().unwrap();
        assert_eq!(msg.as_text(), Some("after"));
        assert_eq!(conn.state(), CloseState::Open);
        drop(busy);

        assert!(decode_written(&written).is_empty());
    }

    #[tokio::test]
    async fn test_write_deadline_closes_connection() {
        let (local, _remote) = tokio::io::duplex(64);
        let conn = Connection::new(local, Role::Server, Config::server());
        conn.set_write_deadline(Some(Instant::now() + Duration::from_millis(20)));

        let result = conn.write_message(Message::binary(vec![0u8; 4096])).await;
        assert_eq!(result, Err(Error::Timeout));
        assert_eq!(conn.state(), CloseState::Closed);
        assert_eq!(
            conn.write_message(Message::text("late")).await,
            Err(Error::AlreadyClosed)
        );
    }

    #[tokio::test]
    async fn test_control_write_deadline_closes_connection() {
        let (local, _remote) = tokio::io::duplex(16);
        let conn = Connection::new(local, Role::Server, Config::server());

        let deadline = Some(Instant::now() + Duration::from_millis(20));
        let result = conn.write_control(OpCode::Ping, &[0u8; 125], deadline).await;
        assert_eq!(result, Err(Error::Timeout));
        assert_eq!(conn.state(), CloseState::Closed);
    }

    #[tokio::test]
    async fn test_begin_times_out_waiting_for_message_gate() {
        let (local, _remote) = tokio::io::duplex(1024);
        let conn = Connection::new(local, Role::Server, Config::server());

        let _pending = conn.begin(OpCode::Text).await.unwrap();
        conn.set_write_deadline(Some(Instant::now() + Duration::from_millis(20)));
        assert_eq!(conn.begin(OpCode::Binary).await.unwrap_err(), Error::Timeout);
        assert_eq!(conn.state(), CloseState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pinger_runs_until_closed() {
        let (local, mut remote) = tokio::io::duplex(1024);
        let conn = Connection::new(local, Role::Server, Config::server());
        let writer = conn.writer();
        let pinger = tokio::spawn(run_pinger(
            conn.writer(),
            Duration::from_secs(5),
            Duration::from_secs(1),
        ));

        tokio::time::sleep(Duration::from_secs(11)).await;
        let mut pings = [0u8; 4];
        remote.read_exact(&mut pings).await.unwrap();
        assert_eq!(pings, [0x89, 0x00, 0x89, 0x00]);

        writer
            .close_and_wait(CloseCode::GoingAway, "", Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(pinger.await.unwrap(), Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_reply_shuts_transport_when_writer_busy() {
        let (local, mut remote) = tokio::io::duplex(1024);
        let timeouts = Timeouts::new(
            Duration::from_secs(10),
            Duration::from_secs(10),
            Duration::from_millis(50),
        );
        let config = Config::server().with_timeouts(timeouts);
        let conn = Connection::new(local, Role::Server, config);
        let shared = Arc::clone(&conn.writer.shared);
        let (mut reader, _writer) = conn.split();

        let busy = shared.sink.lock().await;
        remote
            .write_all(&masked(Frame::close(CloseCode::Normal, "bye")))
            .await
            .unwrap();
        let read = tokio::spawn(async move { reader.read_message().await });

        // Release the frame writer after the echo gave up but before the
        // shutdown attempt does.
        tokio::time::sleep(Duration::from_millis(75)).await;
        drop(busy);

        let msg = read.await.unwrap().unwrap();
        assert_eq!(msg, Some(Message::close(CloseCode::Normal, "bye")));
        assert_eq!(shared.state(), CloseState::Closed);

        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(Duration::from_secs(1), remote.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn test_peer_close_frame_round_trip() {
        let frame = CloseFrame::new(CloseCode::Normal, "bye");
        assert_eq!(CloseFrame::parse(&frame.to_payload()).unwrap(), Some(frame));
    }
}
