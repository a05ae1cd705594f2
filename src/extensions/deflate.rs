//! permessage-deflate with no context takeover (RFC 7692).
//!
//! Every message gets a fresh raw-DEFLATE stream. The sync-flush marker that
//! ends each compressed message is stripped on send and put back on receive.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::error::{Error, Result};

/// Sync-flush marker removed from the end of every compressed message.
pub const DEFLATE_TRAILER: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

const CHUNK: usize = 4096;

/// Compressor for one outgoing message.
///
/// Input is fed with [`write`](Self::write); compressed bytes accumulate and
/// may be drained with [`take`](Self::take) while the message is still being
/// produced. [`finish`](Self::finish) flushes and returns the tail.
pub struct MessageCompressor {
    inner: Compress,
    out: Vec<u8>,
    emitted: usize,
}

impl std::fmt::Debug for MessageCompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageCompressor")
            .field("buffered", &self.out.len())
            .field("emitted", &self.emitted)
            .finish()
    }
}

impl MessageCompressor {
    #[must_use]
    pub fn new(level: u32) -> Self {
        Self {
            inner: Compress::new(Compression::new(level.min(9)), false),
            out: Vec::with_capacity(CHUNK),
            emitted: 0,
        }
    }

    /// Compress `data` into the internal buffer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Compression`] if the DEFLATE stream fails.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.run(data, FlushCompress::None)
    }

    /// Compressed bytes ready to be sent.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.out.len()
    }

    /// Drain up to `max` compressed bytes from the front of the buffer.
    pub fn take(&mut self, max: usize) -> Vec<u8> {
        let n = max.min(self.out.len());
        self.emitted += n;
        self.out.drain(..n).collect()
    }

    /// Flush the stream and return the remaining bytes with the marker
    /// stripped.
    ///
    /// A message that compressed to nothing at all yields the single byte
    /// `0x00`, which the peer inflates to an empty payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Compression`] if the DEFLATE stream fails.
    pub fn finish(mut self) -> Result<Vec<u8>> {
        self.run(&[], FlushCompress::Sync)?;
        if self.out.ends_with(&DEFLATE_TRAILER) {
            self.out.truncate(self.out.len() - DEFLATE_TRAILER.len());
        }
        if self.out.is_empty() && self.emitted == 0 {
            self.out.push(0x00);
        }
        Ok(self.out)
    }

    fn run(&mut self, data: &[u8], flush: FlushCompress) -> Result<()> {
        let mut consumed = 0;
        loop {
            if self.out.len() == self.out.capacity() {
                self.out.reserve(CHUNK);
            }
            let before = self.inner.total_in();
            self.inner
                .compress_vec(&data[consumed..], &mut self.out, flush)
                .map_err(|e| Error::Compression(format!("deflate error: {e}")))?;
            consumed += (self.inner.total_in() - before) as usize;

            // A full output buffer may hide more pending output.
            if consumed == data.len() && self.out.len() < self.out.capacity() {
                return Ok(());
            }
        }
    }
}

/// Compress a whole message payload.
///
/// # Errors
///
/// Returns [`Error::Compression`] if the DEFLATE stream fails.
pub fn compress(data: &[u8], level: u32) -> Result<Vec<u8>> {
    let mut compressor = MessageCompressor::new(level);
    compressor.write(data)?;
    compressor.finish()
}

/// Inflate a received message payload, refusing to produce more than
/// `max_size` bytes.
///
/// # Errors
///
/// - [`Error::Compression`] for a corrupt or truncated stream.
/// - [`Error::MessageTooLarge`] when the output would exceed `max_size`.
pub fn decompress(data: &[u8], max_size: usize) -> Result<Vec<u8>> {
    let mut input = Vec::with_capacity(data.len() + DEFLATE_TRAILER.len());
    input.extend_from_slice(data);
    input.extend_from_slice(&DEFLATE_TRAILER);

    let mut inflater = Decompress::new(false);
    let mut out: Vec<u8> =
        Vec::with_capacity((data.len() * 4).max(CHUNK).min(max_size.saturating_add(1)));
    let mut consumed = 0;

    loop {
        if out.len() > max_size {
            return Err(Error::MessageTooLarge {
                size: out.len(),
                max: max_size,
            });
        }
        if out.len() == out.capacity() {
            let grow = out
                .capacity()
                .max(CHUNK)
                .min((max_size - out.len()).saturating_add(1));
            out.reserve_exact(grow);
        }

        let before_in = inflater.total_in();
        let before_out = inflater.total_out();
        let status = inflater
            .decompress_vec(&input[consumed..], &mut out, FlushDecompress::Sync)
            .map_err(|e| Error::Compression(format!("inflate error: {e}")))?;
        let read = (inflater.total_in() - before_in) as usize;
        let written = (inflater.total_out() - before_out) as usize;
        consumed += read;

        if status == Status::StreamEnd {
            break;
        }
        if consumed == input.len() && out.len() < out.capacity() {
            break;
        }
        if read == 0 && written == 0 && out.len() < out.capacity() {
            return Err(Error::Compression("truncated deflate stream".into()));
        }
    }

    if out.len() > max_size {
        return Err(Error::MessageTooLarge {
            size: out.len(),
            max: max_size,
        });
    }
    Ok(out)
}
