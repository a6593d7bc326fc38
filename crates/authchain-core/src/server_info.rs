//! Per-connection server parameters and the `protocol_param` grammar.
//!
//! `ServerInfo` is handed in by the outer proxy and is read-only here
//! except for `tcp_mss`, which the server side updates after the first
//! decoded frame.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::registry::ReplayRegistry;

/// Seconds in a day; the default epoch length for variant `f`.
pub const DEFAULT_KEY_INTERVAL: u64 = 60 * 60 * 24;

/// Default cap on concurrently active clients per user.
pub const DEFAULT_MAX_CLIENT: usize = 64;

/// Parsed form of the `protocol_param` config string.
///
/// Grammar: `[max_client[:user_id:user_key]][#interval]`. Unparseable
/// pieces fall back to defaults rather than erroring, matching the
/// permissive handling in deployed configs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolParam {
    /// Cap on concurrently active clients per user.
    pub max_client: usize,
    /// Client-side credentials (`user_id:user_key`), when configured.
    pub user: Option<(u32, Vec<u8>)>,
    /// Variant-f epoch length in seconds.
    pub interval: u64,
}

impl Default for ProtocolParam {
    fn default() -> Self {
        Self { max_client: DEFAULT_MAX_CLIENT, user: None, interval: DEFAULT_KEY_INTERVAL }
    }
}

impl ProtocolParam {
    /// Parse a `protocol_param` string.
    pub fn parse(param: &str) -> Self {
        let mut out = Self::default();

        let mut hash_parts = param.split('#');
        if let Some(head) = hash_parts.next() {
            if let Ok(n) = head.parse::<usize>() {
                out.max_client = n;
            }
        }
        if let Some(interval) = hash_parts.next() {
            if let Ok(n) = interval.parse::<u64>() {
                out.interval = n;
            }
        }

        // Credentials split on ':' over the whole string, second field
        // taken verbatim.
        let mut colon_parts = param.splitn(3, ':');
        if let (Some(uid), Some(key)) = (colon_parts.next(), colon_parts.next()) {
            if let Ok(uid) = uid.parse::<u32>() {
                out.user = Some((uid, key.as_bytes().to_vec()));
            }
        }

        out
    }
}

/// Callback fired when a known uid completes a handshake.
pub type UpdateUserFn = Arc<dyn Fn([u8; 4]) + Send + Sync>;

/// Inputs from the outer proxy for one connection.
pub struct ServerInfo {
    /// Long-term pre-shared secret.
    pub key: Vec<u8>,
    /// Per-connection IV of the outer send cipher; handshake entropy.
    pub iv: Vec<u8>,
    /// Per-connection IV of the outer receive cipher.
    pub recv_iv: Vec<u8>,
    /// Known users: uid (little-endian bytes) to per-user key.
    pub users: HashMap<[u8; 4], Vec<u8>>,
    /// Extra bytes per frame charged by the outer layer.
    pub overhead: u16,
    /// Raw protocol parameter string; see [`ProtocolParam`].
    pub protocol_param: String,
    /// Peer MSS; mirrored back by the server capped to 1500.
    pub tcp_mss: u16,
    /// Process-wide replay registry shared by all sessions.
    pub data: Arc<ReplayRegistry>,
    /// Invoked with the uid whenever a known user authenticates.
    pub update_user: Option<UpdateUserFn>,
    /// Peer address, for logs only.
    pub client: String,
    /// Peer port, for logs only.
    pub client_port: u16,
}

impl ServerInfo {
    /// Minimal info around a key and a shared registry; remaining
    /// fields start at their protocol defaults.
    pub fn new(key: impl Into<Vec<u8>>, data: Arc<ReplayRegistry>) -> Self {
        Self {
            key: key.into(),
            iv: Vec::new(),
            recv_iv: Vec::new(),
            users: HashMap::new(),
            overhead: 0,
            protocol_param: String::new(),
            tcp_mss: 1440,
            data,
            update_user: None,
            client: String::new(),
            client_port: 0,
        }
    }
}

impl fmt::Debug for ServerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerInfo")
            .field("users", &self.users.len())
            .field("overhead", &self.overhead)
            .field("protocol_param", &self.protocol_param)
            .field("tcp_mss", &self.tcp_mss)
            .field("client", &self.client)
            .field("client_port", &self.client_port)
            .finish_non_exhaustive()
    }
}
