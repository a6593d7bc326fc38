//! Single-shot datagram codec.
//!
//! Datagrams carry no chain state: each packet derives everything from
//! a few random `authdata` bytes whose keyed hash seeds the padding
//! length, the per-packet RC4 key, and (client→server) the uid mask.
//! Layouts, back to front:
//!
//! - client→server: `body ‖ pad ‖ authdata(3) ‖ masked_uid(4) ‖ tag(1)`
//! - server→client: `body ‖ pad ‖ authdata(7) ‖ tag(1)`
//!
//! A bad 1-byte tag means the packet is silently dropped.

use authchain_crypto::{Rc4Stream, XorShift128Plus, hmac_md5, stream_key};
use rand::RngCore;

use crate::padding::PaddingOracle;

/// Trailing bytes after the padding in a client→server packet.
const CLIENT_TRAILER: usize = 3 + 4 + 1;

/// Trailing bytes after the padding in a server→client packet.
const SERVER_TRAILER: usize = 7 + 1;

/// Seal one client→server datagram.
pub fn client_seal(
    payload: &[u8],
    user_id: [u8; 4],
    user_key: &[u8],
    server_key: &[u8],
    chain_rng: &mut XorShift128Plus,
    pad_rng: &mut dyn RngCore,
) -> Vec<u8> {
    let mut authdata = [0u8; 3];
    pad_rng.fill_bytes(&mut authdata);
    let hash = hmac_md5(server_key, &authdata);
    let masked_uid = u32::from_le_bytes(user_id)
        ^ u32::from_le_bytes([hash[0], hash[1], hash[2], hash[3]]);
    let rand_len = PaddingOracle::udp_len(&hash, chain_rng);

    let mut packet = Rc4Stream::new(&stream_key(user_key, &hash)).process(payload);
    let mut pad = vec![0u8; rand_len];
    pad_rng.fill_bytes(&mut pad);
    packet.extend_from_slice(&pad);
    packet.extend_from_slice(&authdata);
    packet.extend_from_slice(&masked_uid.to_le_bytes());

    let tag = hmac_md5(user_key, &packet);
    packet.push(tag[0]);
    packet
}

/// Uid and per-packet hash recovered from a client→server trailer.
///
/// Nothing is authenticated yet; the caller resolves the user key from
/// the uid and then calls [`server_open`].
pub fn server_peek(wire: &[u8], server_key: &[u8]) -> Option<(u32, [u8; 16])> {
    if wire.len() < CLIENT_TRAILER {
        return None;
    }
    let tail = wire.len() - CLIENT_TRAILER;
    let hash = hmac_md5(server_key, &wire[tail..tail + 3]);
    let uid = u32::from_le_bytes([
        wire[tail + 3],
        wire[tail + 4],
        wire[tail + 5],
        wire[tail + 6],
    ]) ^ u32::from_le_bytes([hash[0], hash[1], hash[2], hash[3]]);
    Some((uid, hash))
}

/// Authenticate and decrypt a client→server datagram.
///
/// `hash` is the value returned by [`server_peek`]; `chain_rng` must be
/// the generator paired with the client→server direction.
pub fn server_open(
    wire: &[u8],
    user_key: &[u8],
    hash: &[u8; 16],
    chain_rng: &mut XorShift128Plus,
) -> Option<Vec<u8>> {
    let (tag, body) = wire.split_last()?;
    if hmac_md5(user_key, body)[0] != *tag {
        return None;
    }
    let rand_len = PaddingOracle::udp_len(hash, chain_rng);
    let keep = wire.len().saturating_sub(CLIENT_TRAILER + rand_len);
    Some(Rc4Stream::new(&stream_key(user_key, hash)).process(&wire[..keep]))
}

/// Seal one server→client datagram.
pub fn server_seal(
    payload: &[u8],
    user_key: &[u8],
    server_key: &[u8],
    chain_rng: &mut XorShift128Plus,
    pad_rng: &mut dyn RngCore,
) -> Vec<u8> {
    let mut authdata = [0u8; 7];
    pad_rng.fill_bytes(&mut authdata);
    let hash = hmac_md5(server_key, &authdata);
    let rand_len = PaddingOracle::udp_len(&hash, chain_rng);

    let mut packet = Rc4Stream::new(&stream_key(user_key, &hash)).process(payload);
    let mut pad = vec![0u8; rand_len];
    pad_rng.fill_bytes(&mut pad);
    packet.extend_from_slice(&pad);
    packet.extend_from_slice(&authdata);

    let tag = hmac_md5(user_key, &packet);
    packet.push(tag[0]);
    packet
}

/// Authenticate and decrypt a server→client datagram.
pub fn client_open(
    wire: &[u8],
    user_key: &[u8],
    server_key: &[u8],
    chain_rng: &mut XorShift128Plus,
) -> Option<Vec<u8>> {
    if wire.len() <= SERVER_TRAILER {
        return None;
    }
    let (tag, body) = wire.split_last()?;
    if hmac_md5(user_key, body)[0] != *tag {
        return None;
    }
    let tail = wire.len() - SERVER_TRAILER;
    let hash = hmac_md5(server_key, &wire[tail..tail + 7]);
    let rand_len = PaddingOracle::udp_len(&hash, chain_rng);
    let keep = wire.len().saturating_sub(SERVER_TRAILER + rand_len);
    Some(Rc4Stream::new(&stream_key(user_key, &hash)).process(&wire[..keep]))
}
