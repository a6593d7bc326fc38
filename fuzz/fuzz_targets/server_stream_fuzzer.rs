//! Fuzz target for the whole server receive path.
//!
//! Drives a server session with arbitrary chunked input: whatever the
//! bytes, `server_post_decrypt` must return cleanly (decoded data,
//! decoy, or a typed framing error) and never panic.

#![no_main]

use std::sync::Arc;

use authchain_core::clock::ManualClock;
use authchain_core::registry::ReplayRegistry;
use authchain_core::server_info::ServerInfo;
use authchain_core::session::Session;
use authchain_core::Variant;
use libfuzzer_sys::fuzz_target;
use rand::SeedableRng;
use rand::rngs::StdRng;

fuzz_target!(|data: &[u8]| {
    let clock = ManualClock::new(1_700_000_000);
    let registry = ReplayRegistry::new("auth_chain_a", clock.clone());
    let mut info = ServerInfo::new(&b"fuzz-key"[..], registry);
    info.iv = b"iviviviviviviviv".to_vec();
    info.recv_iv = b"iviviviviviviviv".to_vec();
    info.overhead = 4;
    let mut server = Session::with_parts(
        Variant::A,
        info,
        clock,
        Box::new(StdRng::seed_from_u64(0)),
    );

    for chunk in data.chunks(37) {
        if server.server_post_decrypt(chunk).is_err() {
            break;
        }
    }
});
