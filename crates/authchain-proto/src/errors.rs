//! Error types for the wire codecs.
//!
//! Frame and handshake failures are terminal for a connection: the
//! session reacts by falling back to raw pass-through (and, server
//! side, answering with a decoy). Nothing here is retried.

use thiserror::Error;

/// Errors raised while unpacking stream frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Decoded frame length breaches the hard size limit.
    ///
    /// Either the length mask is out of sync or the peer is not
    /// speaking this protocol.
    #[error("frame length {len} exceeds the {limit} byte limit")]
    Oversize {
        /// Claimed body-plus-padding length
        len: usize,
        /// The hard limit that was breached
        limit: usize,
    },

    /// The 2-byte frame tag does not match the computed HMAC.
    #[error("frame checksum mismatch at packet {seq}")]
    TagMismatch {
        /// Receive counter of the failing frame
        seq: u32,
    },
}

/// Errors raised while opening the first packet.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// The 4-byte tag over the identity block does not verify.
    #[error("auth block HMAC mismatch")]
    AuthTagMismatch,
}
