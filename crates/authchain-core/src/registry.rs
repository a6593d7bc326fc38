//! Replay-defense registry.
//!
//! One instance per server process, shared by every session. Tracks,
//! per `(user, client)`, a sliding window over connection ids: each id
//! is admitted at most once, ids behind the window are replays, and ids
//! far ahead are garbage. Clients that stay quiet for ten minutes are
//! eviction candidates, bounded per user by an LRU map.
//!
//! On the client side the same structure owns the process-wide
//! `(client_id, connection_id)` allocation.
//!
//! All operations take one coarse lock and never perform I/O; the
//! clock read is the only external call.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use rand::RngCore;
use tracing::warn;

use crate::clock::Clock;

/// Idle seconds after which a window stops being active.
const ACTIVE_TIMEOUT: u64 = 60 * 10;

/// Window never slides further than this behind its back edge.
const WINDOW_SIZE: i64 = 0x1000;

/// Ids this far past the front edge are rejected outright.
const ADMIT_HORIZON: i64 = 0x4000;

/// Sliding admission window for one `(user, client)` pair.
///
/// Invariants after any successful insert: `front <= back`,
/// `back - front <= 0x1000`, and every allocated id lies in
/// `[front, back)`. `front` may start negative (a fresh window opens 64
/// ids behind its first connection), which is why the bounds are
/// signed.
#[derive(Debug)]
pub struct ConnectionWindow {
    front: i64,
    back: i64,
    alloc: HashSet<i64>,
    enable: bool,
    last_update: u64,
    refs: u32,
}

impl ConnectionWindow {
    fn new(begin_id: u32, now: u64) -> Self {
        Self {
            front: i64::from(begin_id) - 64,
            back: i64::from(begin_id) + 1,
            alloc: HashSet::new(),
            enable: true,
            last_update: now,
            refs: 0,
        }
    }

    fn re_enable(&mut self, connection_id: u32) {
        self.enable = true;
        self.front = i64::from(connection_id) - 64;
        self.back = i64::from(connection_id) + 1;
        self.alloc.clear();
    }

    fn is_active(&self, now: u64) -> bool {
        self.refs > 0 && now.saturating_sub(self.last_update) < ACTIVE_TIMEOUT
    }

    fn insert(&mut self, connection_id: u32, now: u64, name: &str) -> bool {
        if !self.enable {
            warn!(name, "connection window disabled");
            return false;
        }
        if !self.is_active(now) {
            self.re_enable(connection_id);
        }
        self.last_update = now;

        let id = i64::from(connection_id);
        if id < self.front {
            warn!(name, connection_id, "deprecated connection id, replay suspected");
            return false;
        }
        if id > self.front + ADMIT_HORIZON {
            warn!(name, connection_id, "connection id beyond admission horizon");
            return false;
        }
        if self.alloc.contains(&id) {
            warn!(name, connection_id, "duplicate connection id, replay suspected");
            return false;
        }

        if self.back <= id {
            self.back = id + 1;
        }
        self.alloc.insert(id);
        while self.alloc.contains(&self.front) || self.front + WINDOW_SIZE < self.back {
            self.alloc.remove(&self.front);
            self.front += 1;
        }
        self.refs += 1;
        true
    }

    fn touch(&mut self, now: u64) {
        self.last_update = now;
    }

    fn release(&mut self) {
        self.refs = self.refs.saturating_sub(1);
    }
}

struct RegistryInner {
    /// Per-user LRU of client windows. Unknown users (no resolvable
    /// uid) share the `None` bucket.
    users: HashMap<Option<u32>, LruCache<u32, ConnectionWindow>>,
    max_client: usize,
    max_buffer: NonZeroUsize,
    /// Client-side identity: random per-process device id.
    local_client_id: Option<[u8; 4]>,
    /// Client-side connection counter.
    connection_id: u32,
}

/// Process-wide replay registry.
pub struct ReplayRegistry {
    name: String,
    clock: Arc<dyn Clock>,
    inner: Mutex<RegistryInner>,
}

impl ReplayRegistry {
    /// Registry for the method `name` (logs only) on the given clock.
    pub fn new(name: impl Into<String>, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            clock,
            inner: Mutex::new(RegistryInner {
                users: HashMap::new(),
                max_client: 64,
                max_buffer: buffer_for(64),
                local_client_id: None,
                connection_id: 0,
            }),
        })
    }

    /// Set the per-user active-client cap.
    pub fn set_max_client(&self, max_client: usize) {
        let mut inner = self.inner.lock();
        inner.max_client = max_client;
        inner.max_buffer = buffer_for(max_client);
        let cap = inner.max_buffer;
        for cache in inner.users.values_mut() {
            cache.resize(cap);
        }
    }

    /// Admit `(user, client, connection)`.
    ///
    /// `false` means replay, duplicate, out-of-window id, or no
    /// evictable client slot; the session must reject the handshake.
    pub fn insert(&self, user: Option<u32>, client_id: u32, connection_id: u32) -> bool {
        let now = self.clock.now_secs();
        let mut inner = self.inner.lock();
        let max_client = inner.max_client;
        let cap = inner.max_buffer;
        let clients = inner.users.entry(user).or_insert_with(|| LruCache::new(cap));

        let stale = match clients.get(&client_id) {
            None => true,
            Some(window) => !window.enable,
        };
        if stale {
            if clients.len() >= max_client && !clients.is_empty() {
                // Full: only an inactive least-recently-used client
                // frees a slot.
                let evictable = clients
                    .peek_lru()
                    .is_some_and(|(_, window)| !window.is_active(now));
                if !evictable {
                    warn!(name = %self.name, "no inactive client to evict");
                    return false;
                }
                clients.pop_lru();
            }
            if let Some(window) = clients.get_mut(&client_id) {
                window.re_enable(connection_id);
            } else {
                clients.put(client_id, ConnectionWindow::new(connection_id, now));
            }
        }
        clients
            .get_mut(&client_id)
            .is_some_and(|window| window.insert(connection_id, now, &self.name))
    }

    /// Refresh liveness after a successfully decrypted payload.
    pub fn update(&self, user: Option<u32>, client_id: u32) {
        let now = self.clock.now_secs();
        let mut inner = self.inner.lock();
        if let Some(clients) = inner.users.get_mut(&user) {
            if let Some(window) = clients.get_mut(&client_id) {
                window.touch(now);
            }
        }
    }

    /// Drop one session's reference to its client window.
    pub fn remove(&self, user: Option<u32>, client_id: u32) {
        let mut inner = self.inner.lock();
        if let Some(clients) = inner.users.get_mut(&user) {
            if let Some(window) = clients.get_mut(&client_id) {
                window.release();
            }
        }
    }

    /// Allocate the next client-side `(client_id, connection_id)` pair.
    ///
    /// The device id is random per process; the connection counter
    /// starts at a random 24-bit value and the whole identity is
    /// re-rolled once the counter passes `0xFF00_0000`.
    pub fn next_connection(&self, rng: &mut dyn RngCore) -> ([u8; 4], u32) {
        let mut inner = self.inner.lock();
        if inner.connection_id > 0xFF00_0000 {
            inner.local_client_id = None;
        }
        if inner.local_client_id.is_none() {
            let mut id = [0u8; 4];
            rng.fill_bytes(&mut id);
            inner.local_client_id = Some(id);
            inner.connection_id = rng.next_u32() & 0x00FF_FFFF;
        }
        inner.connection_id = inner.connection_id.wrapping_add(1);
        let client_id = inner.local_client_id.unwrap_or_default();
        (client_id, inner.connection_id)
    }
}

impl std::fmt::Debug for ReplayRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayRegistry").field("name", &self.name).finish_non_exhaustive()
    }
}

fn buffer_for(max_client: usize) -> NonZeroUsize {
    NonZeroUsize::new((max_client * 2).max(1024)).unwrap_or(NonZeroUsize::MIN)
}
