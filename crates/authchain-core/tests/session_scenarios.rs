//! End-to-end session scenarios: handshake, round trips, replay
//! defense, MSS negotiation, and the degradation paths.
//!
//! Client and server sessions are driven byte-for-byte against each
//! other on manual clocks and seeded entropy, the way the outer proxy
//! would drive them against a socket.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use authchain_core::clock::ManualClock;
use authchain_core::registry::ReplayRegistry;
use authchain_core::server_info::ServerInfo;
use authchain_core::session::Session;
use authchain_core::Variant;
use rand::SeedableRng;
use rand::rngs::StdRng;

const KEY: &[u8] = b"secret";
const IV: &[u8] = b"0123456789abcdef";
const BASE_TIME: u64 = 1_700_000_000;

fn info(registry: &Arc<ReplayRegistry>, param: &str) -> ServerInfo {
    let mut info = ServerInfo::new(KEY, registry.clone());
    info.iv = IV.to_vec();
    info.recv_iv = IV.to_vec();
    info.overhead = 4;
    info.protocol_param = param.to_string();
    info
}

fn session(
    variant: Variant,
    registry: &Arc<ReplayRegistry>,
    clock: &Arc<ManualClock>,
    param: &str,
    seed: u64,
) -> Session {
    Session::with_parts(
        variant,
        info(registry, param),
        clock.clone(),
        Box::new(StdRng::seed_from_u64(seed)),
    )
}

/// A client (own registry, as in its own process) and a server sharing
/// `server_registry`.
fn pair(
    variant: Variant,
    clock: &Arc<ManualClock>,
    server_registry: &Arc<ReplayRegistry>,
    seed: u64,
) -> (Session, Session) {
    let client_registry = ReplayRegistry::new(variant.name(), clock.clone());
    let client = session(variant, &client_registry, clock, "", seed);
    let server = session(variant, server_registry, clock, "", seed + 1000);
    (client, server)
}

#[test]
fn single_frame_round_trip() {
    let clock = ManualClock::new(BASE_TIME);
    let registry = ReplayRegistry::new("auth_chain_a", clock.clone());
    let (mut client, mut server) = pair(Variant::A, &clock, &registry, 1);

    let wire = client.client_pre_encrypt(b"hello");
    let (out, sendback) = server.server_post_decrypt(&wire).unwrap();
    assert_eq!(out, b"hello");
    assert!(sendback);

    let reply = server.server_pre_encrypt(b"world");
    let out = client.client_post_decrypt(&reply).unwrap();
    assert_eq!(out, b"world");
}

#[test]
fn round_trip_every_variant() {
    for (i, variant) in [Variant::A, Variant::B, Variant::C, Variant::D, Variant::E, Variant::F]
        .into_iter()
        .enumerate()
    {
        let clock = ManualClock::new(BASE_TIME);
        let registry = ReplayRegistry::new(variant.name(), clock.clone());
        let (mut client, mut server) = pair(variant, &clock, &registry, 100 + i as u64);

        let payload = vec![0xa5u8; 10_000];
        let wire = client.client_pre_encrypt(&payload);
        let (out, _) = server.server_post_decrypt(&wire).unwrap();
        assert_eq!(out, payload, "{variant:?} client to server");

        let reply_payload = vec![0x5au8; 5_000];
        let reply = server.server_pre_encrypt(&reply_payload);
        let out = client.client_post_decrypt(&reply).unwrap();
        assert_eq!(out, reply_payload, "{variant:?} server to client");

        // A second exchange exercises the rolling chain past the
        // handshake frames.
        let wire = client.client_pre_encrypt(b"again");
        let (out, _) = server.server_post_decrypt(&wire).unwrap();
        assert_eq!(out, b"again", "{variant:?} second exchange");
    }
}

#[test]
fn chunked_delivery_matches_single_shot() {
    let clock = ManualClock::new(BASE_TIME);
    let registry = ReplayRegistry::new("auth_chain_c", clock.clone());
    let (mut client, mut server) = pair(Variant::C, &clock, &registry, 7);

    let payload: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
    let wire = client.client_pre_encrypt(&payload);

    let mut out = Vec::new();
    let mut sendback_seen = false;
    for chunk in wire.chunks(97) {
        let (piece, sendback) = server.server_post_decrypt(chunk).unwrap();
        out.extend_from_slice(&piece);
        sendback_seen |= sendback;
    }
    assert_eq!(out, payload);
    assert!(sendback_seen);
}

#[test]
fn handshake_replay_is_rejected() {
    let clock = ManualClock::new(BASE_TIME);
    let registry = ReplayRegistry::new("auth_chain_a", clock.clone());
    let (mut client, mut server) = pair(Variant::A, &clock, &registry, 2);

    let wire = client.client_pre_encrypt(b"hello");
    let (out, sendback) = server.server_post_decrypt(&wire).unwrap();
    assert_eq!(out, b"hello");
    assert!(sendback);

    // Identical bytes against a fresh session sharing the registry:
    // the connection id is already allocated, so the peer gets the
    // decoy and no response.
    let mut replayed_server = session(Variant::A, &registry, &clock, "", 9);
    let (out, sendback) = replayed_server.server_post_decrypt(&wire).unwrap();
    assert_eq!(out, vec![b'E'; 2048]);
    assert!(!sendback);
    assert_eq!(replayed_server.get_overhead(true), 0);
}

#[test]
fn mss_negotiation() {
    let clock = ManualClock::new(BASE_TIME);
    let registry = ReplayRegistry::new("auth_chain_a", clock.clone());
    let client_registry = ReplayRegistry::new("auth_chain_a", clock.clone());

    let mut client_info = info(&client_registry, "");
    client_info.tcp_mss = 1400;
    let mut client = Session::with_parts(
        Variant::A,
        client_info,
        clock.clone(),
        Box::new(StdRng::seed_from_u64(3)),
    );
    let mut server = session(Variant::A, &registry, &clock, "", 4);

    let wire = client.client_pre_encrypt(b"hi");
    let (out, _) = server.server_post_decrypt(&wire).unwrap();
    assert_eq!(out, b"hi");
    assert_eq!(server.server_info().tcp_mss, 1400);

    // The server mirrors the reported MSS back in its first frame.
    let reply = server.server_pre_encrypt(b"ok");
    let out = client.client_post_decrypt(&reply).unwrap();
    assert_eq!(out, b"ok");
    assert_eq!(client.server_info().tcp_mss, 1400);
}

#[test]
fn handshake_timestamp_skew() {
    // 86401 seconds ahead: rejected.
    for (offset, ahead, ok) in
        [(86_401u64, true, false), (86_399, true, true), (86_401, false, false), (86_399, false, true)]
    {
        let server_clock = ManualClock::new(BASE_TIME);
        let client_time =
            if ahead { BASE_TIME + offset } else { BASE_TIME - offset };
        let client_clock = ManualClock::new(client_time);

        let registry = ReplayRegistry::new("auth_chain_a", server_clock.clone());
        let client_registry = ReplayRegistry::new("auth_chain_a", client_clock.clone());
        let mut client = session(Variant::A, &client_registry, &client_clock, "", 5);
        let mut server = session(Variant::A, &registry, &server_clock, "", 6);

        let wire = client.client_pre_encrypt(b"hello");
        let (out, sendback) = server.server_post_decrypt(&wire).unwrap();
        if ok {
            assert_eq!(out, b"hello", "offset {offset} ahead {ahead}");
            assert!(sendback);
        } else {
            assert_eq!(out, vec![b'E'; 2048], "offset {offset} ahead {ahead}");
            assert!(!sendback);
        }
    }
}

#[test]
fn oversize_first_frame_draws_decoy() {
    let clock = ManualClock::new(BASE_TIME);
    let registry = ReplayRegistry::new("auth_chain_a", clock.clone());
    let (mut client, mut server) = pair(Variant::A, &clock, &registry, 11);

    let mut wire = client.client_pre_encrypt(b"hello");
    // Invert the first frame's masked length word (bytes right after
    // the 36-byte header): the decoded length lands far past the 4096
    // limit.
    wire[36] ^= 0xff;
    wire[37] ^= 0xff;

    let (out, sendback) = server.server_post_decrypt(&wire).unwrap();
    assert_eq!(out, vec![b'E'; 2048]);
    assert!(!sendback);

    // Degraded for good: bytes pass through untouched.
    let (out, sendback) = server.server_post_decrypt(b"anything").unwrap();
    assert_eq!(out, b"anything");
    assert!(!sendback);
}

#[test]
fn client_framing_error_enters_raw_passthrough() {
    let clock = ManualClock::new(BASE_TIME);
    let registry = ReplayRegistry::new("auth_chain_a", clock.clone());
    let (mut client, mut server) = pair(Variant::A, &clock, &registry, 12);

    let wire = client.client_pre_encrypt(b"hello");
    server.server_post_decrypt(&wire).unwrap();

    let mut reply = server.server_pre_encrypt(b"world");
    reply[0] ^= 0xff;
    reply[1] ^= 0xff;
    assert!(client.client_post_decrypt(&reply).is_err());

    // All subsequent input passes through unchanged.
    let out = client.client_post_decrypt(b"raw bytes").unwrap();
    assert_eq!(out, b"raw bytes");
    assert_eq!(client.get_overhead(true), 0);
}

#[test]
fn keepalive_frame_requests_sendback() {
    let clock = ManualClock::new(BASE_TIME);
    let registry = ReplayRegistry::new("auth_chain_a", clock.clone());
    let (mut client, mut server) = pair(Variant::A, &clock, &registry, 13);

    let wire = client.client_pre_encrypt(b"hello");
    server.server_post_decrypt(&wire).unwrap();

    // An empty write still emits a frame; the server answers it.
    let keepalive = client.client_pre_encrypt(b"");
    assert!(!keepalive.is_empty());
    let (out, sendback) = server.server_post_decrypt(&keepalive).unwrap();
    assert!(out.is_empty());
    assert!(sendback);
}

#[test]
fn configured_user_authenticates_and_fires_callback() {
    let clock = ManualClock::new(BASE_TIME);
    let registry = ReplayRegistry::new("auth_chain_a", clock.clone());
    let client_registry = ReplayRegistry::new("auth_chain_a", clock.clone());

    let seen = Arc::new(AtomicUsize::new(0));
    let seen_cb = seen.clone();

    let mut server_info = info(&registry, "");
    server_info.users.insert(1234u32.to_le_bytes(), b"per-user-key".to_vec());
    server_info.update_user = Some(Arc::new(move |uid| {
        assert_eq!(uid, 1234u32.to_le_bytes());
        seen_cb.fetch_add(1, Ordering::SeqCst);
    }));
    let mut server = Session::with_parts(
        Variant::A,
        server_info,
        clock.clone(),
        Box::new(StdRng::seed_from_u64(20)),
    );

    let mut client =
        session(Variant::A, &client_registry, &clock, "1234:per-user-key", 21);

    let wire = client.client_pre_encrypt(b"hello");
    let (out, sendback) = server.server_post_decrypt(&wire).unwrap();
    assert_eq!(out, b"hello");
    assert!(sendback);
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    let reply = server.server_pre_encrypt(b"world");
    assert_eq!(client.client_post_decrypt(&reply).unwrap(), b"world");
}

#[test]
fn unknown_user_is_rejected_when_users_are_configured() {
    let clock = ManualClock::new(BASE_TIME);
    let registry = ReplayRegistry::new("auth_chain_a", clock.clone());
    let client_registry = ReplayRegistry::new("auth_chain_a", clock.clone());

    let mut server_info = info(&registry, "");
    server_info.users.insert(42u32.to_le_bytes(), b"somebody-else".to_vec());
    let mut server = Session::with_parts(
        Variant::A,
        server_info,
        clock.clone(),
        Box::new(StdRng::seed_from_u64(30)),
    );

    // Keyless client: its random uid is unknown to the server, and the
    // recv_iv fallback key cannot verify the identity tag.
    let mut client = session(Variant::A, &client_registry, &clock, "", 31);
    let wire = client.client_pre_encrypt(b"hello");
    let (out, sendback) = server.server_post_decrypt(&wire).unwrap();
    assert_eq!(out, vec![b'E'; 2048]);
    assert!(!sendback);
}

#[test]
fn garbage_prologue_draws_decoy() {
    let clock = ManualClock::new(BASE_TIME);
    let registry = ReplayRegistry::new("auth_chain_a", clock.clone());
    let mut server = session(Variant::A, &registry, &clock, "", 40);

    let garbage = vec![0x55u8; 64];
    let (out, sendback) = server.server_post_decrypt(&garbage).unwrap();
    assert_eq!(out, vec![b'E'; 2048]);
    assert!(!sendback);
}

#[test]
fn short_prologue_waits_for_more() {
    let clock = ManualClock::new(BASE_TIME);
    let registry = ReplayRegistry::new("auth_chain_a", clock.clone());
    let (mut client, mut server) = pair(Variant::A, &clock, &registry, 41);

    let wire = client.client_pre_encrypt(b"hello");

    // Trickle the handshake in: nothing comes out until it is whole.
    let (out, sendback) = server.server_post_decrypt(&wire[..5]).unwrap();
    assert!(out.is_empty());
    assert!(!sendback);
    let (out, sendback) = server.server_post_decrypt(&wire[5..20]).unwrap();
    assert!(out.is_empty());
    assert!(!sendback);
    let (out, sendback) = server.server_post_decrypt(&wire[20..]).unwrap();
    assert_eq!(out, b"hello");
    assert!(sendback);
}

#[test]
fn dispose_frees_the_client_slot() {
    let clock = ManualClock::new(BASE_TIME);
    let registry = ReplayRegistry::new("auth_chain_a", clock.clone());

    // Server capped at one active client.
    let make_server = |seed| session(Variant::A, &registry, &clock, "1", seed);

    let client_registry_a = ReplayRegistry::new("auth_chain_a", clock.clone());
    let mut client_a = session(Variant::A, &client_registry_a, &clock, "1", 50);
    let mut server_a = make_server(51);
    let wire = client_a.client_pre_encrypt(b"a");
    let (out, _) = server_a.server_post_decrypt(&wire).unwrap();
    assert_eq!(out, b"a");

    // A second device cannot get a slot while the first is live.
    let client_registry_b = ReplayRegistry::new("auth_chain_a", clock.clone());
    let mut client_b = session(Variant::A, &client_registry_b, &clock, "1", 52);
    let wire_b = client_b.client_pre_encrypt(b"b");
    let mut server_b = make_server(53);
    let (out, _) = server_b.server_post_decrypt(&wire_b).unwrap();
    assert_eq!(out, vec![b'E'; 2048]);

    // Releasing the first session makes its window inactive and
    // evictable; the second device now gets in.
    server_a.dispose();
    let mut client_c = session(Variant::A, &client_registry_b, &clock, "1", 54);
    let wire_c = client_c.client_pre_encrypt(b"c");
    let mut server_c = make_server(55);
    let (out, _) = server_c.server_post_decrypt(&wire_c).unwrap();
    assert_eq!(out, b"c");
}

#[test]
fn variant_f_survives_epoch_rollover() {
    let clock = ManualClock::new(BASE_TIME);
    let registry = ReplayRegistry::new("auth_chain_f", clock.clone());
    let client_registry = ReplayRegistry::new("auth_chain_f", clock.clone());

    // One-hour epochs; the key must span the full 8 epoch-XOR bytes
    // for the rollover to actually change the size list.
    let build = |registry: &Arc<ReplayRegistry>, seed: u64| {
        let mut info = info(registry, "64#3600");
        info.key = b"long-epoch-shared-key".to_vec();
        Session::with_parts(
            Variant::F,
            info,
            clock.clone(),
            Box::new(StdRng::seed_from_u64(seed)),
        )
    };
    let mut client = build(&client_registry, 60);
    let mut server = build(&registry, 61);

    let wire = client.client_pre_encrypt(b"before");
    let (out, _) = server.server_post_decrypt(&wire).unwrap();
    assert_eq!(out, b"before");

    // Cross the epoch boundary; both sides re-derive their lists from
    // the shared clock and stay in step.
    clock.advance(3_601);
    let wire = client.client_pre_encrypt(b"after");
    let (out, _) = server.server_post_decrypt(&wire).unwrap();
    assert_eq!(out, b"after");

    let reply = server.server_pre_encrypt(b"reply");
    assert_eq!(client.client_post_decrypt(&reply).unwrap(), b"reply");
}

#[test]
fn udp_round_trip_keyless() {
    let clock = ManualClock::new(BASE_TIME);
    let registry = ReplayRegistry::new("auth_chain_a", clock.clone());
    let (mut client, mut server) = pair(Variant::A, &clock, &registry, 70);

    let wire = client.client_udp_pre_encrypt(b"datagram out");
    let (out, uid) = server.server_udp_post_decrypt(&wire);
    assert_eq!(out, b"datagram out");
    // No users configured: the uid cannot be resolved.
    assert_eq!(uid, None);

    let reply = server.server_udp_pre_encrypt(b"datagram back", uid);
    let out = client.client_udp_post_decrypt(&reply).unwrap();
    assert_eq!(out, b"datagram back");
}

#[test]
fn udp_bad_tag_is_dropped() {
    let clock = ManualClock::new(BASE_TIME);
    let registry = ReplayRegistry::new("auth_chain_a", clock.clone());
    let (mut client, mut server) = pair(Variant::A, &clock, &registry, 71);

    let mut wire = client.client_udp_pre_encrypt(b"datagram");
    let last = wire.len() - 1;
    wire[last] ^= 0x01;
    let (out, uid) = server.server_udp_post_decrypt(&wire);
    assert!(out.is_empty());
    assert_eq!(uid, None);
}

#[test]
fn overhead_reporting() {
    let clock = ManualClock::new(BASE_TIME);
    let registry = ReplayRegistry::new("auth_chain_a", clock.clone());
    let session = session(Variant::A, &registry, &clock, "", 80);
    assert_eq!(session.get_overhead(true), 4);
    assert_eq!(session.get_overhead(false), 4);
}
