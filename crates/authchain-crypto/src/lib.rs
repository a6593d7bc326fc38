//! Cryptographic primitives for the auth-chain obfuscation protocols.
//!
//! Everything here is deterministic: the deterministic PRNG that both
//! endpoints replay to agree on padding lengths, the keyed digests that
//! drive the rolling MAC chain, and the two ciphers the handshake and
//! data path use. Entropy is never drawn inside this crate — callers
//! supply random bytes, which keeps every function testable with fixed
//! vectors.
//!
//! # Key derivation
//!
//! All cipher keys are derived from an ASCII passphrase with a single
//! MD5 pass (the classic `EVP_BytesToKey` construction collapsed to its
//! 16-byte-key case). See [`keys`] for the passphrase layouts.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod auth_block;
pub mod keys;
pub mod stream;
pub mod xorshift;

pub use keys::{block_key, bytes_to_key, hmac_md5, md5, stream_key};
pub use stream::Rc4Stream;
pub use xorshift::XorShift128Plus;
