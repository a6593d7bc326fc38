//! Per-connection session state machine.
//!
//! One `Session` wraps one proxied connection, on either side:
//!
//! ```text
//! client: Init --first pre_encrypt--> Streaming --fatal--> RawTrans
//! server: Init --header accepted----> Streaming --fatal--> RawTrans
//! ```
//!
//! The client's first `pre_encrypt` emits the 36-byte handshake header
//! followed by framed data; the server's first `post_decrypt` verifies
//! it, binds `(user, client, connection)` through the replay registry,
//! and seeds both MAC chains from the handshake HMACs. After a fatal
//! error the session passes bytes through untouched; the decoy reply on
//! the server's first frame makes a probing client see garbage instead
//! of an error.
//!
//! Methods are not re-entrant and never block; the registry is the only
//! shared state.

use std::sync::Arc;

use authchain_crypto::{Rc4Stream, md5, stream_key};
use authchain_proto::frame::{self, ChainHead, Unpacked};
use authchain_proto::handshake::{self, AuthPayload, HeadCheck};
use authchain_proto::padding::{PaddingOracle, Variant};
use authchain_proto::udp;
use bytes::{BufMut, BytesMut};
use rand::RngCore;
use rand::rngs::OsRng;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::SessionError;
use crate::server_info::{ProtocolParam, ServerInfo};

/// Maximum plaintext bytes per frame until the peer's MSS is known.
const DEFAULT_UNIT_LEN: usize = 2800;

/// Handshake timestamps may skew up to a day in either direction.
const MAX_TIME_DIF: i32 = 60 * 60 * 24;

/// Size of the all-`'E'` decoy answered to unauthenticated peers.
const DECOY_LEN: usize = 2048;

/// Frame overhead advertised to the outer layer while authenticated.
const FRAME_OVERHEAD: u16 = 4;

/// Per-connection protocol state for one side of a connection.
pub struct Session {
    variant: Variant,
    server_info: ServerInfo,
    param: ProtocolParam,
    oracle: PaddingOracle,
    clock: Arc<dyn Clock>,
    csprng: Box<dyn RngCore + Send>,

    raw_trans: bool,
    has_sent_header: bool,
    has_recv_header: bool,

    /// Client→server MAC chain (send side on the client, receive side
    /// on the server).
    client_chain: ChainHead,
    /// Server→client MAC chain.
    server_chain: ChainHead,
    pack_id: u32,
    recv_id: u32,
    recv_buf: BytesMut,

    unit_len: usize,
    overhead: u16,
    client_over_head: u16,

    user_id: Option<[u8; 4]>,
    user_key: Option<Vec<u8>>,
    enc: Option<Rc4Stream>,
    dec: Option<Rc4Stream>,
    client_id: u32,
    connection_id: u32,
}

impl Session {
    /// Session on the system clock and OS entropy.
    pub fn new(variant: Variant, server_info: ServerInfo) -> Self {
        Self::with_parts(variant, server_info, Arc::new(SystemClock), Box::new(OsRng))
    }

    /// Session with an injected clock and entropy source (tests).
    pub fn with_parts(
        variant: Variant,
        server_info: ServerInfo,
        clock: Arc<dyn Clock>,
        csprng: Box<dyn RngCore + Send>,
    ) -> Self {
        let param = ProtocolParam::parse(&server_info.protocol_param);
        server_info.data.set_max_client(param.max_client);
        let epoch = clock.now_secs() / param.interval.max(1);
        let oracle = PaddingOracle::new(variant, &server_info.key, server_info.overhead, epoch);

        Self {
            variant,
            server_info,
            param,
            oracle,
            clock,
            csprng,
            raw_trans: false,
            has_sent_header: false,
            has_recv_header: false,
            client_chain: ChainHead::new([0u8; 16]),
            server_chain: ChainHead::new([0u8; 16]),
            pack_id: 1,
            recv_id: 1,
            recv_buf: BytesMut::new(),
            unit_len: DEFAULT_UNIT_LEN,
            overhead: FRAME_OVERHEAD,
            client_over_head: FRAME_OVERHEAD,
            user_id: None,
            user_key: None,
            enc: None,
            dec: None,
            client_id: 0,
            connection_id: 0,
        }
    }

    /// Frame overhead currently charged to the outer layer.
    ///
    /// Drops to zero once the session has degraded to pass-through.
    pub fn get_overhead(&self, _from_client: bool) -> u16 {
        self.overhead
    }

    /// The variant this session speaks.
    pub fn variant(&self) -> Variant {
        self.variant
    }

    /// Server parameters (the server side updates `tcp_mss` in place).
    pub fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    /// Client id bound by the handshake (zero until then).
    pub fn client_id(&self) -> u32 {
        self.client_id
    }

    /// Connection id bound by the handshake (zero until then).
    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    /// Release this session's replay-registry reference.
    pub fn dispose(&mut self) {
        self.server_info
            .data
            .remove(self.user_id.map(u32::from_le_bytes), self.client_id);
    }

    fn registry_user(&self) -> Option<u32> {
        self.user_id.map(u32::from_le_bytes)
    }

    /// Variant `f` re-derives its size list when the epoch ticks.
    fn refresh_epoch(&mut self) {
        if self.variant == Variant::F {
            let epoch = self.clock.now_secs() / self.param.interval.max(1);
            self.oracle.refresh_epoch(&self.server_info.key, epoch);
        }
    }

    fn now32(&self) -> u32 {
        (self.clock.now_secs() & 0xFFFF_FFFF) as u32
    }

    fn not_match_return(&mut self) -> (Vec<u8>, bool) {
        self.raw_trans = true;
        self.overhead = 0;
        (vec![b'E'; DECOY_LEN], false)
    }

    fn fatal(&mut self) {
        self.raw_trans = true;
        self.overhead = 0;
        self.recv_buf.clear();
    }

    fn encrypt_body(&mut self, plain: &[u8]) -> Vec<u8> {
        match &mut self.enc {
            Some(cipher) => cipher.process(plain),
            None => plain.to_vec(),
        }
    }

    fn decrypt_body(&mut self, body: &[u8]) -> Vec<u8> {
        match &mut self.dec {
            Some(cipher) => cipher.process(body),
            None => body.to_vec(),
        }
    }

    fn pack_client_data(&mut self, plain: &[u8]) -> bytes::Bytes {
        let body = self.encrypt_body(plain);
        let wire = frame::pack(
            &body,
            self.user_key.as_deref().unwrap_or(&[]),
            self.pack_id,
            &mut self.client_chain,
            &self.oracle,
            &mut self.csprng,
        );
        self.pack_id = self.pack_id.wrapping_add(1);
        wire
    }

    fn pack_server_data(&mut self, plain: &[u8]) -> bytes::Bytes {
        let body = self.encrypt_body(plain);
        let wire = frame::pack(
            &body,
            self.user_key.as_deref().unwrap_or(&[]),
            self.pack_id,
            &mut self.server_chain,
            &self.oracle,
            &mut self.csprng,
        );
        self.pack_id = self.pack_id.wrapping_add(1);
        wire
    }

    // --- client side, stream ---

    /// Wrap outgoing clear bytes; the first call prepends the
    /// handshake header.
    pub fn client_pre_encrypt(&mut self, buf: &[u8]) -> Vec<u8> {
        self.refresh_epoch();
        let mut out = BytesMut::new();
        let mut rest = buf;

        if !self.has_sent_header {
            let head = head_size(buf, 30);
            let first = rest.len().min((self.csprng.next_u32() % 32) as usize + head);
            let hello = self.build_hello();
            // The first framed body leads with our observed MSS; the
            // server mirrors it back capped to 1500.
            let mut reported = Vec::with_capacity(first + 2);
            reported.extend_from_slice(&self.server_info.tcp_mss.to_le_bytes());
            reported.extend_from_slice(&rest[..first]);
            out.put_slice(&hello);
            out.put_slice(&self.pack_client_data(&reported));
            rest = &rest[first..];
            self.has_sent_header = true;
        }

        while rest.len() > self.unit_len {
            out.put_slice(&self.pack_client_data(&rest[..self.unit_len]));
            rest = &rest[self.unit_len..];
        }
        out.put_slice(&self.pack_client_data(rest));
        out.to_vec()
    }

    fn build_hello(&mut self) -> [u8; handshake::HEADER_LEN] {
        let (client_id, connection_id) = self.server_info.data.next_connection(&mut self.csprng);

        let (uid, user_key): ([u8; 4], Vec<u8>) = match &self.param.user {
            Some((id, key)) => (id.to_le_bytes(), key.clone()),
            None => {
                let mut uid = [0u8; 4];
                self.csprng.fill_bytes(&mut uid);
                (uid, self.server_info.key.clone())
            }
        };

        let payload = AuthPayload {
            utc_time: self.now32(),
            client_id: u32::from_le_bytes(client_id),
            connection_id,
            overhead: self.server_info.overhead,
        };

        let mut check_head = [0u8; 4];
        self.csprng.fill_bytes(&mut check_head);
        let hello = handshake::seal_hello(
            payload,
            uid,
            &user_key,
            &self.server_info.iv,
            &self.server_info.key,
            self.variant.salt(),
            check_head,
        );

        let rc4_key = stream_key(&user_key, &hello.client_hash);
        self.enc = Some(Rc4Stream::new(&rc4_key));
        self.dec = Some(Rc4Stream::new(&rc4_key));
        self.client_chain = ChainHead::new(hello.client_hash);
        self.server_chain = ChainHead::new(hello.server_hash);
        self.user_key = Some(user_key);
        debug!(connection_id, "handshake built");
        hello.wire
    }

    /// Unwrap incoming wire bytes on the client.
    ///
    /// The first decoded frame carries the server's MSS echo in its
    /// first two bytes, which is recorded and stripped.
    pub fn client_post_decrypt(&mut self, buf: &[u8]) -> Result<Vec<u8>, SessionError> {
        if self.raw_trans {
            return Ok(buf.to_vec());
        }
        self.refresh_epoch();
        self.recv_buf.put_slice(buf);
        let mut out = Vec::new();

        while self.recv_buf.len() > frame::FRAME_OVERHEAD {
            let step = frame::unpack(
                &self.recv_buf,
                self.user_key.as_deref().unwrap_or(&[]),
                self.recv_id,
                &mut self.server_chain,
                &self.oracle,
            );
            match step {
                Ok(Unpacked::NeedMore) => break,
                Ok(Unpacked::Frame { body, consumed }) => {
                    let mut plain = self.decrypt_body(&body);
                    if self.recv_id == 1 && plain.len() >= 2 {
                        self.server_info.tcp_mss = u16::from_le_bytes([plain[0], plain[1]]);
                        plain.drain(..2);
                    }
                    out.extend_from_slice(&plain);
                    self.recv_id = self.recv_id.wrapping_add(1);
                    let _ = self.recv_buf.split_to(consumed);
                }
                Err(err) => {
                    info!(variant = self.variant.name(), %err, "stream decode failed");
                    self.fatal();
                    return Err(err.into());
                }
            }
        }
        Ok(out)
    }

    // --- server side, stream ---

    /// Wrap outgoing clear bytes on the server.
    ///
    /// The first call prepends the mirrored MSS (capped to 1500) and
    /// derives the frame unit length from it.
    pub fn server_pre_encrypt(&mut self, buf: &[u8]) -> Vec<u8> {
        if self.raw_trans {
            return buf.to_vec();
        }
        self.refresh_epoch();
        let mut out = BytesMut::new();

        let prefixed: Option<Vec<u8>> = if self.pack_id == 1 {
            let tcp_mss = self.server_info.tcp_mss.min(1500);
            self.server_info.tcp_mss = tcp_mss;
            self.unit_len = usize::from(tcp_mss)
                .saturating_sub(usize::from(self.client_over_head))
                .max(1);
            let mut data = Vec::with_capacity(buf.len() + 2);
            data.extend_from_slice(&tcp_mss.to_le_bytes());
            data.extend_from_slice(buf);
            Some(data)
        } else {
            None
        };
        let mut rest: &[u8] = prefixed.as_deref().unwrap_or(buf);

        while rest.len() > self.unit_len {
            let (chunk, tail) = rest.split_at(self.unit_len);
            out.put_slice(&self.pack_server_data(chunk));
            rest = tail;
        }
        out.put_slice(&self.pack_server_data(rest));
        out.to_vec()
    }

    /// Unwrap incoming wire bytes on the server.
    ///
    /// Returns the decoded clear bytes and whether the caller should
    /// flush a response (handshake accepted or keepalive received).
    /// Unauthenticated garbage is answered with a decoy body and
    /// `false`.
    pub fn server_post_decrypt(&mut self, buf: &[u8]) -> Result<(Vec<u8>, bool), SessionError> {
        if self.raw_trans {
            return Ok((buf.to_vec(), false));
        }
        self.refresh_epoch();
        self.recv_buf.put_slice(buf);
        let mut sendback = false;

        if !self.has_recv_header {
            let hash = match handshake::verify_check_head(
                &self.recv_buf,
                &self.server_info.recv_iv,
                &self.server_info.key,
            ) {
                HeadCheck::Mismatch => {
                    warn!(
                        variant = self.variant.name(),
                        client = %self.server_info.client,
                        "handshake prologue mismatch"
                    );
                    return Ok(self.not_match_return());
                }
                HeadCheck::NeedMore => return Ok((Vec::new(), false)),
                HeadCheck::Verified { hash } => hash,
            };
            if self.recv_buf.len() < handshake::HEADER_LEN {
                return Ok((Vec::new(), false));
            }

            let uid_num = handshake::extract_uid(&self.recv_buf, &hash);
            let uid_bytes = uid_num.to_le_bytes();
            let user_key = if let Some(key) = self.server_info.users.get(&uid_bytes) {
                self.user_id = Some(uid_bytes);
                if let Some(update) = &self.server_info.update_user {
                    update(uid_bytes);
                }
                key.clone()
            } else if self.server_info.users.is_empty() {
                self.server_info.key.clone()
            } else {
                // Unknown uid with users configured: keep going with a
                // key that cannot verify, so probes see the same path.
                self.server_info.recv_iv.clone()
            };

            let mut head = [0u8; handshake::HEADER_LEN];
            head.copy_from_slice(&self.recv_buf[..handshake::HEADER_LEN]);
            let opened = match handshake::open_hello(&head, &user_key, self.variant.salt()) {
                Ok(opened) => opened,
                Err(err) => {
                    warn!(
                        variant = self.variant.name(),
                        client = %self.server_info.client,
                        port = self.server_info.client_port,
                        %err,
                        "handshake identity rejected"
                    );
                    return Ok(self.not_match_return());
                }
            };

            let time_dif = opened.payload.utc_time.wrapping_sub(self.now32()) as i32;
            if !(-MAX_TIME_DIF..=MAX_TIME_DIF).contains(&time_dif) {
                info!(variant = self.variant.name(), time_dif, "handshake timestamp out of range");
                return Ok(self.not_match_return());
            }

            let admitted = self.server_info.data.insert(
                self.user_id.map(u32::from_le_bytes),
                opened.payload.client_id,
                opened.payload.connection_id,
            );
            if !admitted {
                info!(variant = self.variant.name(), "connection id not admitted");
                return Ok(self.not_match_return());
            }

            self.client_id = opened.payload.client_id;
            self.connection_id = opened.payload.connection_id;
            self.client_over_head = opened.payload.overhead;

            let rc4_key = stream_key(&user_key, &hash);
            self.enc = Some(Rc4Stream::new(&rc4_key));
            self.dec = Some(Rc4Stream::new(&rc4_key));
            self.client_chain = ChainHead::new(hash);
            self.server_chain = ChainHead::new(opened.server_hash);
            self.user_key = Some(user_key);
            let _ = self.recv_buf.split_to(handshake::HEADER_LEN);
            self.has_recv_header = true;
            sendback = true;
        }

        let mut out = Vec::new();
        while self.recv_buf.len() > frame::FRAME_OVERHEAD {
            let step = frame::unpack(
                &self.recv_buf,
                self.user_key.as_deref().unwrap_or(&[]),
                self.recv_id,
                &mut self.client_chain,
                &self.oracle,
            );
            match step {
                Ok(Unpacked::NeedMore) => break,
                Ok(Unpacked::Frame { body, consumed }) => {
                    let first_frame = self.recv_id == 1;
                    self.recv_id = self.recv_id.wrapping_add(1);
                    if body.is_empty() {
                        sendback = true;
                    }
                    let mut plain = self.decrypt_body(&body);
                    if first_frame && plain.len() >= 2 {
                        let mss = u16::from_le_bytes([plain[0], plain[1]]);
                        self.server_info.tcp_mss = mss;
                        self.unit_len = usize::from(mss.min(1500))
                            .saturating_sub(usize::from(self.client_over_head))
                            .max(1);
                        plain.drain(..2);
                    }
                    out.extend_from_slice(&plain);
                    let _ = self.recv_buf.split_to(consumed);
                }
                Err(err) => {
                    self.fatal();
                    if self.recv_id == 1 {
                        info!(variant = self.variant.name(), %err, "first frame unreadable");
                        return Ok((vec![b'E'; DECOY_LEN], false));
                    }
                    info!(variant = self.variant.name(), %err, "stream decode failed");
                    return Err(err.into());
                }
            }
        }

        if !out.is_empty() {
            self.server_info.data.update(self.registry_user(), self.client_id);
        }
        Ok((out, sendback))
    }

    // --- datagram path ---

    /// Resolve the client-side UDP identity from config (hashed key) or
    /// fall back to the anonymous pre-shared-key identity.
    fn resolve_udp_client_identity(&mut self) {
        if self.user_key.is_some() {
            return;
        }
        match &self.param.user {
            Some((id, key)) => {
                self.user_id = Some(id.to_le_bytes());
                self.user_key = Some(md5(key).to_vec());
            }
            None => {
                let mut uid = [0u8; 4];
                self.csprng.fill_bytes(&mut uid);
                self.user_id = Some(uid);
                self.user_key = Some(self.server_info.key.clone());
            }
        }
    }

    /// Seal one outgoing client datagram.
    pub fn client_udp_pre_encrypt(&mut self, buf: &[u8]) -> Vec<u8> {
        self.resolve_udp_client_identity();
        let uid = self.user_id.unwrap_or_default();
        let user_key = self.user_key.clone().unwrap_or_default();
        udp::client_seal(
            buf,
            uid,
            &user_key,
            &self.server_info.key,
            &mut self.client_chain.rng,
            &mut self.csprng,
        )
    }

    /// Open one server reply datagram. `None` means drop.
    pub fn client_udp_post_decrypt(&mut self, buf: &[u8]) -> Option<Vec<u8>> {
        let user_key = self.user_key.clone()?;
        udp::client_open(buf, &user_key, &self.server_info.key, &mut self.server_chain.rng)
    }

    /// Seal one outgoing server datagram for `uid`.
    pub fn server_udp_pre_encrypt(&mut self, buf: &[u8], uid: Option<[u8; 4]>) -> Vec<u8> {
        let user_key = self.resolve_udp_server_key(uid).1;
        udp::server_seal(
            buf,
            &user_key,
            &self.server_info.key,
            &mut self.server_chain.rng,
            &mut self.csprng,
        )
    }

    /// Open one client datagram on the server.
    ///
    /// Returns the payload and the resolved uid; a failed tag yields an
    /// empty payload and no uid (the packet is silently dropped).
    pub fn server_udp_post_decrypt(&mut self, buf: &[u8]) -> (Vec<u8>, Option<[u8; 4]>) {
        let Some((uid_num, hash)) = udp::server_peek(buf, &self.server_info.key) else {
            return (Vec::new(), None);
        };
        let (uid, user_key) = self.resolve_udp_server_key(Some(uid_num.to_le_bytes()));
        match udp::server_open(buf, &user_key, &hash, &mut self.client_chain.rng) {
            Some(body) => (body, uid),
            None => (Vec::new(), None),
        }
    }

    fn resolve_udp_server_key(&self, uid: Option<[u8; 4]>) -> (Option<[u8; 4]>, Vec<u8>) {
        if let Some(uid) = uid {
            if let Some(key) = self.server_info.users.get(&uid) {
                return (Some(uid), key.clone());
            }
        }
        let fallback = if self.server_info.users.is_empty() {
            self.server_info.key.clone()
        } else {
            self.server_info.recv_iv.clone()
        };
        (None, fallback)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("variant", &self.variant)
            .field("raw_trans", &self.raw_trans)
            .field("has_sent_header", &self.has_sent_header)
            .field("has_recv_header", &self.has_recv_header)
            .field("pack_id", &self.pack_id)
            .field("recv_id", &self.recv_id)
            .finish_non_exhaustive()
    }
}

/// Outer-protocol header size sniffed from the first payload bytes.
///
/// Used only to size the first framed slice of the handshake packet.
fn head_size(buf: &[u8], default: usize) -> usize {
    if buf.len() < 2 {
        return default;
    }
    match buf[0] {
        1 => 7,
        4 => 19,
        3 => 4 + buf[1] as usize,
        _ => default,
    }
}
