//! Fuzz target for handshake header parsing.
//!
//! Both the partial prologue check and the full identity open must
//! tolerate arbitrary input without panicking.

#![no_main]

use authchain_proto::handshake;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = handshake::verify_check_head(data, b"fuzz-iv", b"fuzz-key");

    if data.len() >= handshake::HEADER_LEN {
        let mut head = [0u8; handshake::HEADER_LEN];
        head.copy_from_slice(&data[..handshake::HEADER_LEN]);
        let _ = handshake::open_hello(&head, b"fuzz-user-key", b"auth_chain_a");
    }
});
