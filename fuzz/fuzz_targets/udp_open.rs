//! Fuzz target for datagram opening, both directions.

#![no_main]

use authchain_crypto::XorShift128Plus;
use authchain_proto::udp;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut rng = XorShift128Plus::new();
    if let Some((_, hash)) = udp::server_peek(data, b"fuzz-key") {
        let _ = udp::server_open(data, b"fuzz-user-key", &hash, &mut rng);
    }
    let _ = udp::client_open(data, b"fuzz-user-key", b"fuzz-key", &mut rng);
});
