//! Payload masking (RFC 6455 Section 5.3).

/// XOR `data` with the 4-byte `mask`, starting at mask offset 0.
///
/// Applying the same mask twice restores the input.
#[inline]
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    let mask_u32 = u32::from_ne_bytes(mask);
    let mut chunks = data.chunks_exact_mut(4);
    for chunk in &mut chunks {
        let val = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        chunk.copy_from_slice(&(val ^ mask_u32).to_ne_bytes());
    }
    for (i, byte) in chunks.into_remainder().iter_mut().enumerate() {
        *byte ^= mask[i];
    }
}

/// Source of client mask keys.
///
/// Seeded once from the OS, then stepped with a mixing function so each frame
/// gets an unpredictable key without a syscall.
#[derive(Debug)]
pub struct MaskGenerator {
    state: u32,
}

impl MaskGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: random_seed(),
        }
    }

    /// Produce the next mask key.
    pub fn next_mask(&mut self) -> [u8; 4] {
        self.state = self.state.wrapping_add(0x9E37_79B9);
        let a = self.state.wrapping_mul(0x85EB_CA6B);
        let b = a ^ (a >> 13);
        b.wrapping_mul(0xC2B2_AE35).to_le_bytes()
    }
}

impl Default for MaskGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn random_seed() -> u32 {
    let mut buf = [0u8; 4];
    if getrandom::getrandom(&mut buf).is_ok() {
        u32::from_le_bytes(buf)
    } else {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0x1234_5678)
    }
}
