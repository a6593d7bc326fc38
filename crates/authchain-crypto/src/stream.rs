//! RC4 keystream wrapper.
//!
//! Each direction of a connection owns an independent keystream over the
//! same derived key; datagrams get a fresh keystream per packet. The
//! 16-byte key always comes out of [`crate::keys::stream_key`], so the
//! variable-length passphrase never reaches the cipher itself.

use rc4::consts::U16;
use rc4::{KeyInit, Rc4, StreamCipher};

/// A single RC4 keystream position.
pub struct Rc4Stream {
    inner: Rc4<U16>,
}

impl Rc4Stream {
    /// Fresh keystream for `key`, starting at offset zero.
    pub fn new(key: &[u8; 16]) -> Self {
        Self { inner: Rc4::new(key.into()) }
    }

    /// XOR the next keystream bytes into `buf` in place.
    pub fn apply(&mut self, buf: &mut [u8]) {
        self.inner.apply_keystream(buf);
    }

    /// Copying variant of [`apply`](Self::apply).
    pub fn process(&mut self, data: &[u8]) -> Vec<u8> {
        let mut out = data.to_vec();
        self.apply(&mut out);
        out
    }
}

impl core::fmt::Debug for Rc4Stream {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Rc4Stream").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::stream_key;

    #[test]
    fn derived_key_vector() {
        // Keystream under the key derived from ("secret", "0123456789abcdef"),
        // captured from the reference implementation.
        let key = stream_key(b"secret", b"0123456789abcdef");
        let mut cipher = Rc4Stream::new(&key);
        assert_eq!(hex::encode(cipher.process(b"hello")), "2e99907341");
    }

    #[test]
    fn round_trip_with_independent_streams() {
        let key = stream_key(b"k", b"nonce");
        let mut enc = Rc4Stream::new(&key);
        let mut dec = Rc4Stream::new(&key);
        let plain = b"the quick brown fox jumps over the lazy dog";
        let ct = enc.process(plain);
        assert_ne!(ct.as_slice(), plain.as_slice());
        assert_eq!(dec.process(&ct), plain);
    }

    #[test]
    fn keystream_position_advances() {
        let key = stream_key(b"k", b"nonce");
        let mut cipher = Rc4Stream::new(&key);
        let a = cipher.process(b"aaaa");
        let b = cipher.process(b"aaaa");
        assert_ne!(a, b);
    }
}
