//! Session state machine and replay defense for the auth-chain
//! protocols.
//!
//! The outer proxy owns the sockets; this crate owns everything
//! between them and the wire format:
//!
//! - [`Session`]: per-connection state machine exposing the
//!   `pre_encrypt` / `post_decrypt` stream operations and their
//!   datagram counterparts
//! - [`ReplayRegistry`]: process-wide admission of
//!   `(user, client, connection)` triples
//! - [`ServerInfo`]: the semantic inputs handed in by the proxy
//! - [`Clock`]: injectable time, so liveness and epoch logic is
//!   testable without sleeping
//!
//! Sessions are single-threaded and never block; the registry is the
//! only shared state and takes one coarse lock.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod clock;
pub mod error;
pub mod registry;
pub mod server_info;
pub mod session;

pub use authchain_proto::Variant;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::SessionError;
pub use registry::ReplayRegistry;
pub use server_info::{ProtocolParam, ServerInfo};
pub use session::Session;
