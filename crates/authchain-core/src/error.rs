//! Error types for session processing.
//!
//! Every error here is terminal for its session: the state machine has
//! already switched to raw pass-through by the time the error reaches
//! the caller, and the outer proxy is expected to drop the connection.

use authchain_proto::FrameError;
use thiserror::Error;

/// Errors surfaced by the stream decode operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// A stream frame failed to decode past the point of recovery.
    #[error("stream framing error: {0}")]
    Frame(#[from] FrameError),
}
