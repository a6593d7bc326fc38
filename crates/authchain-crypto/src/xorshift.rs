//! xorshift128+ deterministic PRNG.
//!
//! Both endpoints seed this generator from shared secrets (rolling MAC
//! values, the pre-shared key) and replay it in lockstep, so padding
//! lengths agree without ever appearing on the wire. The exact update
//! function is wire-visible: any deviation desynchronizes the two sides.

/// Mask applied before the left shift in the update function.
///
/// Keeps the shifted operand to 41 bits so `<< 23` stays within `u64`.
const MOV_MASK: u64 = (1 << 41) - 1;

/// Deterministic 64-bit generator with a 128-bit state.
///
/// Reseeding with [`seed`](Self::seed) or
/// [`seed_with_len`](Self::seed_with_len) fully replaces the state, so a
/// single instance can be reused across frames.
#[derive(Debug, Clone, Default)]
pub struct XorShift128Plus {
    v0: u64,
    v1: u64,
}

impl XorShift128Plus {
    /// Generator with an all-zero state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the state and return the next 64-bit output.
    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.v0;
        let y = self.v1;
        self.v0 = y;
        x ^= (x & MOV_MASK) << 23;
        x ^= y ^ (x >> 17) ^ (y >> 26);
        self.v1 = x;
        x.wrapping_add(y)
    }

    /// Seed the state from the first 16 bytes of `bin` (little endian),
    /// zero-padded when shorter.
    pub fn seed(&mut self, bin: &[u8]) {
        let buf = pad16(bin);
        self.v0 = u64::from_le_bytes(first8(&buf));
        self.v1 = u64::from_le_bytes(last8(&buf));
    }

    /// Seed like [`seed`](Self::seed), but splice `length` (little
    /// endian) over the first two bytes and stir with four throwaway
    /// outputs.
    pub fn seed_with_len(&mut self, bin: &[u8], length: u16) {
        let mut buf = pad16(bin);
        buf[0..2].copy_from_slice(&length.to_le_bytes());
        self.v0 = u64::from_le_bytes(first8(&buf));
        self.v1 = u64::from_le_bytes(last8(&buf));
        for _ in 0..4 {
            self.next_u64();
        }
    }
}

fn pad16(bin: &[u8]) -> [u8; 16] {
    let mut buf = [0u8; 16];
    let n = bin.len().min(16);
    buf[..n].copy_from_slice(&bin[..n]);
    buf
}

fn first8(buf: &[u8; 16]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&buf[..8]);
    out
}

fn last8(buf: &[u8; 16]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&buf[8..]);
    out
}
