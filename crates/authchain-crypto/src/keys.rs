//! Keyed digests and passphrase-to-key derivation.
//!
//! Cipher keys are never used raw: the wire format builds an ASCII
//! passphrase (base64 pieces plus an optional salt) and collapses it to
//! 16 bytes with MD5, matching OpenSSL's `EVP_BytesToKey` for a
//! 16-byte key with no IV material consumed.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};

type HmacMd5 = Hmac<Md5>;

/// MD5 digest of `data`.
pub fn md5(data: &[u8]) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// HMAC-MD5 of `data` under `key`.
///
/// Drives the rolling per-frame MAC chain and every handshake check.
pub fn hmac_md5(key: &[u8], data: &[u8]) -> [u8; 16] {
    let Ok(mut mac) = HmacMd5::new_from_slice(key) else {
        unreachable!("HMAC-MD5 accepts any key size");
    };
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Collapse a passphrase to a 16-byte cipher key.
///
/// `EVP_BytesToKey` with MD5 produces `MD5(passphrase)` as its first
/// 16 output bytes, which is all the 128-bit ciphers here consume.
pub fn bytes_to_key(passphrase: &[u8]) -> [u8; 16] {
    md5(passphrase)
}

/// Key for the per-connection RC4 stream: derived from
/// `base64(user_key) ‖ base64(nonce)` where `nonce` is the hash bound
/// to this connection (or datagram).
pub fn stream_key(user_key: &[u8], nonce: &[u8]) -> [u8; 16] {
    let mut passphrase = BASE64.encode(user_key).into_bytes();
    passphrase.extend_from_slice(BASE64.encode(nonce).as_bytes());
    bytes_to_key(&passphrase)
}

/// Key for the AES-128-CBC handshake block: derived from
/// `base64(user_key) ‖ salt` where `salt` names the protocol variant.
pub fn block_key(user_key: &[u8], salt: &[u8]) -> [u8; 16] {
    let mut passphrase = BASE64.encode(user_key).into_bytes();
    passphrase.extend_from_slice(salt);
    bytes_to_key(&passphrase)
}
