//! Fuzz target for stream frame unpacking.
//!
//! Arbitrary bytes through `frame::unpack` must only ever yield
//! NeedMore, a frame, or a typed error — never a panic, overflow, or
//! buffer over-read, for any variant and any chain state.

#![no_main]

use authchain_proto::frame::{self, ChainHead};
use authchain_proto::padding::{PaddingOracle, Variant};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() < 17 {
        return;
    }
    let variant = match data[0] % 6 {
        0 => Variant::A,
        1 => Variant::B,
        2 => Variant::C,
        3 => Variant::D,
        4 => Variant::E,
        _ => Variant::F,
    };
    let mut hash = [0u8; 16];
    hash.copy_from_slice(&data[1..17]);
    let buf = &data[17..];

    let oracle = PaddingOracle::new(variant, b"fuzz-key", 4, 0);
    let mut chain = ChainHead::new(hash);
    let _ = frame::unpack(buf, b"fuzz-user-key", 1, &mut chain, &oracle);
});
