//! Stream frame codec.
//!
//! Every frame is `le16(len XOR mask) ‖ padded body ‖ tag`, where the
//! mask and the padding PRNG seed both come from the previous frame's
//! HMAC. The chain head therefore advances exactly once per frame, in
//! lockstep on both sides; a reordered, dropped, or replayed frame
//! breaks every subsequent tag.
//!
//! This module is the only writer of the chain head. [`pack`] installs
//! the new hash after the tag is emitted; [`unpack`] installs it only
//! after the tag verifies, so a failed decode never desynchronizes the
//! chain.

use authchain_crypto::{XorShift128Plus, hmac_md5};
use bytes::{BufMut, Bytes, BytesMut};
use rand::RngCore;

use crate::errors::FrameError;
use crate::padding::PaddingOracle;

/// Hard cap on `body + padding`; anything larger is treated as a
/// desynchronized or hostile stream.
pub const FRAME_SIZE_LIMIT: usize = 4096;

/// Length prefix plus trailing tag.
pub const FRAME_OVERHEAD: usize = 4;

/// Rolling MAC chain head for one direction, paired with the padding
/// generator that follows it.
#[derive(Debug, Clone)]
pub struct ChainHead {
    /// HMAC of the previous frame (or the handshake-derived seed).
    pub hash: [u8; 16],
    /// Deterministic generator reseeded from `hash` each frame.
    pub rng: XorShift128Plus,
}

impl ChainHead {
    /// Chain seeded from a handshake hash.
    pub fn new(hash: [u8; 16]) -> Self {
        Self { hash, rng: XorShift128Plus::new() }
    }

    /// Mask applied to the wire length field.
    fn length_mask(&self) -> u16 {
        u16::from_le_bytes([self.hash[14], self.hash[15]])
    }
}

/// Result of one [`unpack`] attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unpacked {
    /// The buffer does not hold a complete frame yet.
    NeedMore,
    /// One frame was consumed.
    Frame {
        /// Body ciphertext, padding stripped.
        body: Vec<u8>,
        /// Bytes to drain from the receive buffer.
        consumed: usize,
    },
}

fn mac_key(user_key: &[u8], seq: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(user_key.len() + 4);
    key.extend_from_slice(user_key);
    key.extend_from_slice(&seq.to_le_bytes());
    key
}

/// Pack one body (already stream-encrypted) into a frame.
///
/// Draws the padding length and body offset from `chain.rng`, fills the
/// padding from `pad_rng`, and advances the chain head to the new
/// frame's HMAC.
pub fn pack(
    body: &[u8],
    user_key: &[u8],
    pack_id: u32,
    chain: &mut ChainHead,
    oracle: &PaddingOracle,
    pad_rng: &mut dyn RngCore,
) -> Bytes {
    let rand_len = oracle.data_len(body.len(), &chain.hash, &mut chain.rng);
    let mut pad = vec![0u8; rand_len];
    pad_rng.fill_bytes(&mut pad);

    let wire_len = (body.len() as u16) ^ chain.length_mask();
    let mut frame = BytesMut::with_capacity(2 + body.len() + rand_len + 2);
    frame.put_u16_le(wire_len);
    if body.is_empty() {
        frame.put_slice(&pad);
    } else if rand_len > 0 {
        let start = PaddingOracle::start_pos(rand_len, &mut chain.rng);
        frame.put_slice(&pad[..start]);
        frame.put_slice(body);
        frame.put_slice(&pad[start..]);
    } else {
        frame.put_slice(body);
    }

    let digest = hmac_md5(&mac_key(user_key, pack_id), &frame);
    frame.put_slice(&digest[..2]);
    chain.hash = digest;
    frame.freeze()
}

/// Try to unpack one frame from the front of `buf`.
///
/// On success the chain head advances and `consumed` bytes must be
/// drained. On [`Unpacked::NeedMore`] and on error the chain head is
/// left untouched (the PRNG may have been reseeded, but the next
/// attempt reseeds it again from the same hash).
pub fn unpack(
    buf: &[u8],
    user_key: &[u8],
    recv_id: u32,
    chain: &mut ChainHead,
    oracle: &PaddingOracle,
) -> Result<Unpacked, FrameError> {
    if buf.len() <= FRAME_OVERHEAD {
        return Ok(Unpacked::NeedMore);
    }

    let data_len = (u16::from_le_bytes([buf[0], buf[1]]) ^ chain.length_mask()) as usize;
    let rand_len = oracle.data_len(data_len, &chain.hash, &mut chain.rng);
    let total = data_len + rand_len;
    if total >= FRAME_SIZE_LIMIT {
        return Err(FrameError::Oversize { len: total, limit: FRAME_SIZE_LIMIT });
    }
    if total + FRAME_OVERHEAD > buf.len() {
        return Ok(Unpacked::NeedMore);
    }

    let digest = hmac_md5(&mac_key(user_key, recv_id), &buf[..total + 2]);
    if digest[..2] != buf[total + 2..total + 4] {
        return Err(FrameError::TagMismatch { seq: recv_id });
    }

    let mut pos = 2;
    if data_len > 0 && rand_len > 0 {
        pos = 2 + PaddingOracle::start_pos(rand_len, &mut chain.rng);
    }
    let body = buf[pos..pos + data_len].to_vec();
    chain.hash = digest;
    Ok(Unpacked::Frame { body, consumed: total + FRAME_OVERHEAD })
}
