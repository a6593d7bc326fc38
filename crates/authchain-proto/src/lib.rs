//! Wire formats for the auth-chain obfuscation protocols.
//!
//! The protocol wraps an opaque byte stream into frames whose lengths
//! are drawn from a deterministic PRNG that both endpoints replay, so
//! the on-wire sizes look random while never being negotiated. Four
//! layers live here:
//!
//! - [`padding`]: the per-variant length oracles and their size lists
//! - [`frame`]: the rolling-MAC frame codec for the TCP stream
//! - [`handshake`]: the 36-byte first packet binding
//!   `(user, client, connection)`
//! - [`udp`]: the single-shot datagram codec
//!
//! Everything is pure with respect to I/O and time; entropy for padding
//! bytes is passed in by the caller.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod errors;
pub mod frame;
pub mod handshake;
pub mod padding;
pub mod udp;

pub use errors::{FrameError, HandshakeError};
pub use frame::{ChainHead, Unpacked};
pub use padding::{PaddingOracle, Variant};
