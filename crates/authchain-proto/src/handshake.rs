//! First-packet handshake codec.
//!
//! The 36-byte header is `check_head(12) ‖ identity(20) ‖ tag(4)`:
//!
//! - `check_head`: 4 random bytes plus the first 8 bytes of
//!   `HMAC(iv ‖ key, random)`; lets the server cheaply reject peers
//!   that do not hold the pre-shared key before touching user state.
//! - `identity`: the uid (masked with chain bytes) and the sealed auth
//!   block carrying `(utc_time, client_id, connection_id, overhead)`.
//! - `tag`: first 4 bytes of `HMAC(user_key, identity)`.
//!
//! The two HMACs double as the initial heads of the per-direction MAC
//! chains, which is what binds the rest of the stream to this
//! handshake.

use authchain_crypto::{auth_block, block_key, hmac_md5};

use crate::errors::HandshakeError;

/// Full header length.
pub const HEADER_LEN: usize = 36;

/// Length of the random-plus-HMAC prologue.
pub const CHECK_HEAD_LEN: usize = 12;

/// Cleartext of the sealed auth block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthPayload {
    /// Client wallclock, seconds, truncated to 32 bits.
    pub utc_time: u32,
    /// Per-device identifier chosen at first connect.
    pub client_id: u32,
    /// Per-connection counter admitted once by the server.
    pub connection_id: u32,
    /// Frame overhead the client's outer layer charges.
    pub overhead: u16,
}

impl AuthPayload {
    fn to_block(self) -> [u8; 16] {
        let mut block = [0u8; 16];
        block[0..4].copy_from_slice(&self.utc_time.to_le_bytes());
        block[4..8].copy_from_slice(&self.client_id.to_le_bytes());
        block[8..12].copy_from_slice(&self.connection_id.to_le_bytes());
        block[12..14].copy_from_slice(&self.overhead.to_le_bytes());
        // block[14..16] is reserved and stays zero.
        block
    }

    fn from_block(block: &[u8; 16]) -> Self {
        Self {
            utc_time: u32::from_le_bytes([block[0], block[1], block[2], block[3]]),
            client_id: u32::from_le_bytes([block[4], block[5], block[6], block[7]]),
            connection_id: u32::from_le_bytes([block[8], block[9], block[10], block[11]]),
            overhead: u16::from_le_bytes([block[12], block[13]]),
        }
    }
}

/// A built header plus the chain seeds it established.
#[derive(Debug, Clone)]
pub struct SealedHello {
    /// The 36 bytes to put on the wire.
    pub wire: [u8; HEADER_LEN],
    /// Seed for the client→server chain (check-head HMAC).
    pub client_hash: [u8; 16],
    /// Seed for the server→client chain (identity HMAC).
    pub server_hash: [u8; 16],
}

/// Build the handshake header.
///
/// `check_head` must be 4 fresh random bytes; `uid` is either the
/// configured user id or 4 random bytes when running keyless.
pub fn seal_hello(
    payload: AuthPayload,
    uid: [u8; 4],
    user_key: &[u8],
    iv: &[u8],
    key: &[u8],
    salt: &[u8],
    check_head: [u8; 4],
) -> SealedHello {
    let mut mac_key = Vec::with_capacity(iv.len() + key.len());
    mac_key.extend_from_slice(iv);
    mac_key.extend_from_slice(key);
    let client_hash = hmac_md5(&mac_key, &check_head);

    let sealed = auth_block::seal(&block_key(user_key, salt), &payload.to_block());
    let masked_uid =
        u32::from_le_bytes(uid) ^ u32::from_le_bytes([client_hash[8], client_hash[9], client_hash[10], client_hash[11]]);

    let mut identity = [0u8; 20];
    identity[0..4].copy_from_slice(&masked_uid.to_le_bytes());
    identity[4..20].copy_from_slice(&sealed);
    let server_hash = hmac_md5(user_key, &identity);

    let mut wire = [0u8; HEADER_LEN];
    wire[0..4].copy_from_slice(&check_head);
    wire[4..12].copy_from_slice(&client_hash[0..8]);
    wire[12..32].copy_from_slice(&identity);
    wire[32..36].copy_from_slice(&server_hash[0..4]);

    SealedHello { wire, client_hash, server_hash }
}

/// Outcome of the prologue check on a partially buffered header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeadCheck {
    /// Not enough bytes buffered to say anything.
    NeedMore,
    /// The buffered HMAC prefix contradicts the pre-shared key.
    Mismatch,
    /// Prologue verified; carries the chain seed.
    Verified {
        /// `HMAC(recv_iv ‖ key, check_head)`.
        hash: [u8; 16],
    },
}

/// Verify the check-head prologue as far as the buffer allows.
///
/// The prefix is checked once 7, 8, or at least 12 bytes are buffered;
/// shorter buffers (and the 9..=11 gap) are simply "need more".
pub fn verify_check_head(buf: &[u8], recv_iv: &[u8], key: &[u8]) -> HeadCheck {
    if buf.len() < 7 || (buf.len() > 8 && buf.len() < CHECK_HEAD_LEN) {
        return HeadCheck::NeedMore;
    }
    let checked = buf.len().min(CHECK_HEAD_LEN);

    let mut mac_key = Vec::with_capacity(recv_iv.len() + key.len());
    mac_key.extend_from_slice(recv_iv);
    mac_key.extend_from_slice(key);
    let hash = hmac_md5(&mac_key, &buf[0..4]);

    if hash[..checked - 4] != buf[4..checked] {
        return HeadCheck::Mismatch;
    }
    if buf.len() < CHECK_HEAD_LEN {
        return HeadCheck::NeedMore;
    }
    HeadCheck::Verified { hash }
}

/// Recover the uid from a verified header prefix.
pub fn extract_uid(head: &[u8], client_hash: &[u8; 16]) -> u32 {
    u32::from_le_bytes([head[12], head[13], head[14], head[15]])
        ^ u32::from_le_bytes([client_hash[8], client_hash[9], client_hash[10], client_hash[11]])
}

/// A parsed identity block plus the server-direction chain seed.
#[derive(Debug, Clone)]
pub struct OpenedHello {
    /// Decrypted auth payload.
    pub payload: AuthPayload,
    /// Seed for the server→client chain (identity HMAC).
    pub server_hash: [u8; 16],
}

/// Verify and open the identity block of a full 36-byte header.
pub fn open_hello(
    head: &[u8; HEADER_LEN],
    user_key: &[u8],
    salt: &[u8],
) -> Result<OpenedHello, HandshakeError> {
    let server_hash = hmac_md5(user_key, &head[12..32]);
    if server_hash[..4] != head[32..36] {
        return Err(HandshakeError::AuthTagMismatch);
    }

    let mut sealed = [0u8; 16];
    sealed.copy_from_slice(&head[16..32]);
    let block = auth_block::open(&block_key(user_key, salt), &sealed);

    Ok(OpenedHello { payload: AuthPayload::from_block(&block), server_hash })
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &[u8] = b"server-secret";
    const IV: &[u8] = b"0123456789abcdef";
    const SALT: &[u8] = b"auth_chain_a";

    fn payload() -> AuthPayload {
        AuthPayload { utc_time: 0x5f00_0000, client_id: 0xdead_beef, connection_id: 42, overhead: 4 }
    }

    #[test]
    fn seal_open_round_trip() {
        let hello = seal_hello(payload(), [9, 9, 9, 9], KEY, IV, KEY, SALT, [1, 2, 3, 4]);

        match verify_check_head(&hello.wire, IV, KEY) {
            HeadCheck::Verified { hash } => assert_eq!(hash, hello.client_hash),
            other => unreachable!("{other:?}"),
        }

        let uid = extract_uid(&hello.wire, &hello.client_hash);
        assert_eq!(uid.to_le_bytes(), [9, 9, 9, 9]);

        let opened = open_hello(&hello.wire, KEY, SALT).unwrap();
        assert_eq!(opened.payload, payload());
        assert_eq!(opened.server_hash, hello.server_hash);
    }

    #[test]
    fn check_head_partial_prefixes() {
        let hello = seal_hello(payload(), [0; 4], KEY, IV, KEY, SALT, [5, 6, 7, 8]);

        for n in 0..7 {
            assert_eq!(verify_check_head(&hello.wire[..n], IV, KEY), HeadCheck::NeedMore);
        }
        // 7 and 8 bytes allow a partial verdict but still need more.
        assert_eq!(verify_check_head(&hello.wire[..7], IV, KEY), HeadCheck::NeedMore);
        assert_eq!(verify_check_head(&hello.wire[..8], IV, KEY), HeadCheck::NeedMore);
        for n in 9..12 {
            assert_eq!(verify_check_head(&hello.wire[..n], IV, KEY), HeadCheck::NeedMore);
        }
        assert!(matches!(
            verify_check_head(&hello.wire[..12], IV, KEY),
            HeadCheck::Verified { .. }
        ));
    }

    #[test]
    fn check_head_detects_wrong_key() {
        let hello = seal_hello(payload(), [0; 4], KEY, IV, KEY, SALT, [5, 6, 7, 8]);
        assert_eq!(verify_check_head(&hello.wire[..7], IV, b"other"), HeadCheck::Mismatch);
        assert_eq!(verify_check_head(&hello.wire, IV, b"other"), HeadCheck::Mismatch);
    }

    #[test]
    fn identity_tag_rejects_wrong_user_key() {
        let hello = seal_hello(payload(), [0; 4], b"user-key", IV, KEY, SALT, [5, 6, 7, 8]);
        assert!(matches!(
            open_hello(&hello.wire, b"wrong-user-key", SALT),
            Err(HandshakeError::AuthTagMismatch)
        ));
    }

    #[test]
    fn salt_separates_variants() {
        let hello = seal_hello(payload(), [0; 4], KEY, IV, KEY, b"auth_chain_a", [5, 6, 7, 8]);
        // Same user key, wrong salt: the tag still verifies (it does not
        // cover the salt) but the decrypted block is garbage.
        let opened = open_hello(&hello.wire, KEY, b"auth_chain_b").unwrap();
        assert_ne!(opened.payload, payload());
    }
}
