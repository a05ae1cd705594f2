//! Configuration and limits for WebSocket connections.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::BytesMut;

/// Resource limits for a connection.
///
/// These limits prevent resource exhaustion attacks and ensure
/// bounded memory usage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum payload length accepted in a single frame.
    ///
    /// Default: 16 MB (16 * 1024 * 1024)
    pub max_frame_size: usize,

    /// Maximum size of a complete message in bytes.
    ///
    /// This applies to the total size after reassembling all fragments and,
    /// for compressed messages, after decompression.
    ///
    /// Default: 64 MB (64 * 1024 * 1024)
    pub max_message_size: usize,

    /// Maximum size of the upgrade request head in bytes.
    ///
    /// Default: 8 KB (8192)
    pub max_handshake_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_frame_size: 16 * 1024 * 1024,   // 16 MB
            max_message_size: 64 * 1024 * 1024, // 64 MB
            max_handshake_size: 8192,
        }
    }
}

impl Limits {
    /// Create new limits with custom values.
    #[must_use]
    pub const fn new(
        max_frame_size: usize,
        max_message_size: usize,
        max_handshake_size: usize,
    ) -> Self {
        Self {
            max_frame_size,
            max_message_size,
            max_handshake_size,
        }
    }

    /// Create limits suitable for small embedded systems.
    ///
    /// - Max frame: 64 KB
    /// - Max message: 256 KB
    /// - Max handshake: 4 KB
    #[must_use]
    pub const fn embedded() -> Self {
        Self {
            max_frame_size: 64 * 1024,
            max_message_size: 256 * 1024,
            max_handshake_size: 4096,
        }
    }
}

/// Timeout configuration for WebSocket connections.
///
/// Per-operation read and write deadlines are absolute and set by the caller
/// on the connection; these are the engine's own bounded waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Time allowed to write the upgrade response and take over the stream.
    ///
    /// Default: 10 seconds
    pub handshake: Duration,

    /// How long an application-initiated close waits for the peer's close
    /// frame before the transport is shut down.
    ///
    /// Default: 10 seconds
    pub close_grace: Duration,

    /// Bound on waiting for the frame writer when echoing a close frame.
    ///
    /// Default: 1 second
    pub control_reply: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(10),
            close_grace: Duration::from_secs(10),
            control_reply: Duration::from_secs(1),
        }
    }
}

impl Timeouts {
    /// Create new timeouts with custom values.
    #[must_use]
    pub const fn new(handshake: Duration, close_grace: Duration, control_reply: Duration) -> Self {
        Self {
            handshake,
            close_grace,
            control_reply,
        }
    }
}

/// A bounded pool of write buffers shared between connections.
///
/// Connections take a buffer when they need to serialize a frame and give it
/// back afterwards, so idle connections hold no write memory.
#[derive(Debug, Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    buffers: Mutex<Vec<BytesMut>>,
    buffer_size: usize,
    max_pooled: usize,
}

impl BufferPool {
    /// Create a pool handing out buffers of `buffer_size` capacity, keeping at
    /// most `max_pooled` idle buffers.
    #[must_use]
    pub fn new(buffer_size: usize, max_pooled: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                buffers: Mutex::new(Vec::with_capacity(max_pooled)),
                buffer_size,
                max_pooled,
            }),
        }
    }

    /// Take a buffer from the pool, allocating if it is empty.
    #[must_use]
    pub fn acquire(&self) -> BytesMut {
        let pooled = match self.inner.buffers.lock() {
            Ok(mut buffers) => buffers.pop(),
            Err(poisoned) => poisoned.into_inner().pop(),
        };
        pooled.unwrap_or_else(|| BytesMut::with_capacity(self.inner.buffer_size))
    }

    /// Return a buffer to the pool.
    ///
    /// Buffers that grew far past the pool size are dropped rather than kept.
    pub fn release(&self, mut buf: BytesMut) {
        if buf.capacity() > self.inner.buffer_size * 4 {
            return;
        }
        buf.clear();
        let mut buffers = match self.inner.buffers.lock() {
            Ok(buffers) => buffers,
            Err(poisoned) => poisoned.into_inner(),
        };
        if buffers.len() < self.inner.max_pooled {
            buffers.push(buf);
        }
    }

    /// Number of idle buffers currently pooled.
    #[must_use]
    pub fn idle(&self) -> usize {
        match self.inner.buffers.lock() {
            Ok(buffers) => buffers.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

/// WebSocket connection configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Resource limits.
    pub limits: Limits,

    /// Fragment size for outgoing messages (in bytes).
    ///
    /// Messages larger than this will be split into multiple frames.
    ///
    /// Default: 16 KB (16 * 1024)
    pub fragment_size: usize,

    /// Read buffer size (in bytes).
    ///
    /// Default: 4 KB (4096)
    pub read_buffer_size: usize,

    /// Write buffer size (in bytes). Ignored when a pool is configured.
    ///
    /// Default: 4 KB (4096)
    pub write_buffer_size: usize,

    /// Shared pool of write buffers.
    ///
    /// Default: None (each connection owns its write buffer)
    pub write_buffer_pool: Option<BufferPool>,

    /// DEFLATE level used for outgoing compressed messages (0-9).
    ///
    /// Default: 1
    pub compression_level: u32,

    /// Engine timeouts.
    pub timeouts: Timeouts,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            fragment_size: 16 * 1024,
            read_buffer_size: 4096,
            write_buffer_size: 4096,
            write_buffer_pool: None,
            compression_level: 1,
            timeouts: Timeouts::default(),
        }
    }
}

impl Config {
    /// Create a new configuration with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set custom limits.
    #[must_use]
    pub const fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the maximum message size, leaving other limits alone.
    #[must_use]
    pub const fn with_max_message_size(mut self, size: usize) -> Self {
        self.limits.max_message_size = size;
        self
    }

    /// Set fragment size for outgoing messages.
    #[must_use]
    pub const fn with_fragment_size(mut self, size: usize) -> Self {
        self.fragment_size = size;
        self
    }

    /// Set read buffer size.
    #[must_use]
    pub const fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Set write buffer size.
    #[must_use]
    pub const fn with_write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }

    /// Share write buffers through `pool`.
    #[must_use]
    pub fn with_write_buffer_pool(mut self, pool: BufferPool) -> Self {
        self.write_buffer_pool = Some(pool);
        self
    }

    /// Set the DEFLATE level for outgoing messages. Values above 9 are clamped.
    #[must_use]
    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level.min(9);
        self
    }

    /// Set timeout configuration.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Configuration for the server side of a connection.
    #[must_use]
    pub fn server() -> Self {
        Self::default()
    }

    /// Configuration for the client side of a connection.
    ///
    /// Clients rarely receive large messages, so the read limit is lower.
    #[must_use]
    pub fn client() -> Self {
        Self {
            limits: Limits {
                max_message_size: 16 * 1024 * 1024,
                ..Limits::default()
            },
            ..Default::default()
        }
    }
}
