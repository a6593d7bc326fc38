//! AES-128-CBC sealing of the 16-byte handshake auth block.
//!
//! The handshake transports exactly one cipher block with a zero IV.
//! (The original stack sliced off a prepended IV rather than a
//! ciphertext block, so the bytes on the wire are the plain single-block
//! CBC output.)

use aes::Aes128;
use cbc::cipher::generic_array::GenericArray;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// Size of the sealed auth block.
pub const BLOCK_LEN: usize = 16;

/// Encrypt one auth block under `key` with a zero IV.
pub fn seal(key: &[u8; 16], plain: &[u8; BLOCK_LEN]) -> [u8; BLOCK_LEN] {
    let iv = [0u8; 16];
    let mut block = GenericArray::clone_from_slice(plain);
    Aes128CbcEnc::new(key.into(), (&iv).into()).encrypt_block_mut(&mut block);
    block.into()
}

/// Decrypt one auth block under `key` with a zero IV.
pub fn open(key: &[u8; 16], sealed: &[u8; BLOCK_LEN]) -> [u8; BLOCK_LEN] {
    let iv = [0u8; 16];
    let mut block = GenericArray::clone_from_slice(sealed);
    Aes128CbcDec::new(key.into(), (&iv).into()).decrypt_block_mut(&mut block);
    block.into()
}
