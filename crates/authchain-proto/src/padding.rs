//! Per-variant padding-length oracles.
//!
//! For every frame, both endpoints compute the same padding length from
//! `(body size, rolling hash, shared lists)` without exchanging it. The
//! six variants differ only in how that length is chosen:
//!
//! - `a`: modulus ladder keyed on the body size
//! - `b`: two key-derived target-size lists with a ladder fallback
//! - `c`: one longer list, ladder fallback when the body outgrows it
//! - `d`: like `c`, list patched up to at least 1300, no fallback
//! - `e`: like `d` but always picks the smallest fitting target
//! - `f`: like `e` with the list re-derived per time epoch
//!
//! The `% 2340 % 2040 % 1440` reduction used when sampling list entries
//! biases the distribution and is part of the wire contract; it must
//! not be simplified.

use authchain_crypto::XorShift128Plus;

/// Protocol variant selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Variant {
    A,
    B,
    C,
    D,
    E,
    F,
}

impl Variant {
    /// Parse a method name such as `"auth_chain_a"`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "auth_chain_a" => Some(Self::A),
            "auth_chain_b" => Some(Self::B),
            "auth_chain_c" => Some(Self::C),
            "auth_chain_d" => Some(Self::D),
            "auth_chain_e" => Some(Self::E),
            "auth_chain_f" => Some(Self::F),
            _ => None,
        }
    }

    /// Canonical method name.
    pub fn name(self) -> &'static str {
        match self {
            Self::A => "auth_chain_a",
            Self::B => "auth_chain_b",
            Self::C => "auth_chain_c",
            Self::D => "auth_chain_d",
            Self::E => "auth_chain_e",
            Self::F => "auth_chain_f",
        }
    }

    /// Salt mixed into the handshake block key; equals the method name.
    pub fn salt(self) -> &'static [u8] {
        self.name().as_bytes()
    }
}

/// One sample of the size-list distribution.
fn sample(rng: &mut XorShift128Plus) -> u16 {
    (rng.next_u64() % 2340 % 2040 % 1440) as u16
}

/// `bisect_left`: first index whose entry is `>= need`.
fn lower_bound(list: &[u16], need: usize) -> usize {
    list.partition_point(|&v| (v as usize) < need)
}

/// Modulus ladder shared by variant `a` and the `b`/`c` fallbacks.
fn ladder(size: usize, rng: &mut XorShift128Plus) -> usize {
    if size > 1300 {
        (rng.next_u64() % 31) as usize
    } else if size > 900 {
        (rng.next_u64() % 127) as usize
    } else if size > 400 {
        (rng.next_u64() % 521) as usize
    } else {
        (rng.next_u64() % 1021) as usize
    }
}

/// Padding-length oracle for one session.
///
/// The size lists are derived once from the pre-shared key (per epoch
/// for variant `f`) and are immutable between epochs; the oracle itself
/// carries no per-frame state. Determinism contract: given the same
/// `(variant, key, overhead, epoch)` and the same call sequence on the
/// same generator, both endpoints produce identical lengths.
#[derive(Debug, Clone)]
pub struct PaddingOracle {
    variant: Variant,
    overhead: u16,
    /// Variant `b` primary list (4..=11 entries).
    primary: Vec<u16>,
    /// Variant `b` secondary list (8..=23 entries).
    secondary: Vec<u16>,
    /// Variants `c`..`f` single list (12..=35 entries, `d`..`f` patched).
    sizes: Vec<u16>,
    /// Epoch the lists were derived for (variant `f` only).
    epoch: Option<u64>,
}

impl PaddingOracle {
    /// Build the oracle for `variant`, deriving size lists from `key`.
    ///
    /// `epoch` is `⌊now / key_change_interval⌋` and is only consulted by
    /// variant `f`.
    pub fn new(variant: Variant, key: &[u8], overhead: u16, epoch: u64) -> Self {
        let mut oracle = Self {
            variant,
            overhead,
            primary: Vec::new(),
            secondary: Vec::new(),
            sizes: Vec::new(),
            epoch: None,
        };
        oracle.derive_lists(key, epoch);
        oracle
    }

    /// Re-derive the size lists when the epoch has moved (variant `f`).
    ///
    /// Idempotent within an epoch; a no-op for every other variant.
    /// Returns whether the lists were rebuilt.
    pub fn refresh_epoch(&mut self, key: &[u8], epoch: u64) -> bool {
        if self.variant != Variant::F || self.epoch == Some(epoch) {
            return false;
        }
        self.derive_lists(key, epoch);
        true
    }

    fn derive_lists(&mut self, key: &[u8], epoch: u64) {
        match self.variant {
            Variant::A => {}
            Variant::B => {
                let mut rng = XorShift128Plus::new();
                rng.seed(key);
                let len = (rng.next_u64() % 8 + 4) as usize;
                self.primary = (0..len).map(|_| sample(&mut rng)).collect();
                self.primary.sort_unstable();
                let len = (rng.next_u64() % 16 + 8) as usize;
                self.secondary = (0..len).map(|_| sample(&mut rng)).collect();
                self.secondary.sort_unstable();
            }
            Variant::C => {
                let mut rng = XorShift128Plus::new();
                rng.seed(key);
                self.sizes = base_list(&mut rng);
            }
            Variant::D | Variant::E => {
                let mut rng = XorShift128Plus::new();
                rng.seed(key);
                self.sizes = base_list(&mut rng);
                patch_list(&mut self.sizes, &mut rng);
            }
            Variant::F => {
                let mut epoch_key = key.to_vec();
                for (dst, src) in epoch_key.iter_mut().zip(epoch.to_be_bytes()) {
                    *dst ^= src;
                }
                let mut rng = XorShift128Plus::new();
                rng.seed(&epoch_key);
                self.sizes = base_list(&mut rng);
                patch_list(&mut self.sizes, &mut rng);
                self.epoch = Some(epoch);
            }
        }
    }

    /// Padding length for a frame with `buf_size` body bytes.
    ///
    /// Reseeds `rng` from `(last_hash, buf_size)`; the caller must use
    /// the same generator for the subsequent start-position draw.
    pub fn data_len(
        &self,
        buf_size: usize,
        last_hash: &[u8; 16],
        rng: &mut XorShift128Plus,
    ) -> usize {
        match self.variant {
            Variant::A => {
                if buf_size > 1440 {
                    return 0;
                }
                rng.seed_with_len(last_hash, buf_size as u16);
                ladder(buf_size, rng)
            }
            Variant::B => {
                if buf_size >= 1440 {
                    return 0;
                }
                rng.seed_with_len(last_hash, buf_size as u16);
                let need = buf_size + self.overhead as usize;

                let pos = lower_bound(&self.primary, need);
                let pick = pos + (rng.next_u64() % self.primary.len() as u64) as usize;
                if pick < self.primary.len() {
                    return self.primary[pick] as usize - need;
                }

                // Primary overflowed; the secondary list has finer steps.
                let pos = lower_bound(&self.secondary, need);
                let pick = pos + (rng.next_u64() % self.secondary.len() as u64) as usize;
                if pick < self.secondary.len() {
                    return self.secondary[pick] as usize - need;
                }
                if pick < pos + self.secondary.len() - 1 {
                    return 0;
                }
                // Reached with probability 1/len(secondary).
                ladder(buf_size, rng)
            }
            Variant::C => {
                let need = buf_size + self.overhead as usize;
                // Seed before any draw so both endpoints stay in step.
                rng.seed_with_len(last_hash, buf_size as u16);
                if need >= largest(&self.sizes) {
                    if need >= 1440 {
                        return 0;
                    }
                    return ladder(need, rng);
                }
                let pos = lower_bound(&self.sizes, need);
                let span = (self.sizes.len() - pos) as u64;
                let pick = pos + (rng.next_u64() % span) as usize;
                self.sizes[pick] as usize - need
            }
            Variant::D => {
                let need = buf_size + self.overhead as usize;
                if need >= largest(&self.sizes) {
                    return 0;
                }
                rng.seed_with_len(last_hash, buf_size as u16);
                let pos = lower_bound(&self.sizes, need);
                let span = (self.sizes.len() - pos) as u64;
                let pick = pos + (rng.next_u64() % span) as usize;
                self.sizes[pick] as usize - need
            }
            Variant::E | Variant::F => {
                rng.seed_with_len(last_hash, buf_size as u16);
                let need = buf_size + self.overhead as usize;
                if need >= largest(&self.sizes) {
                    return 0;
                }
                let pos = lower_bound(&self.sizes, need);
                self.sizes[pos] as usize - need
            }
        }
    }

    /// Offset of the body within the padding for a frame with `rand_len`
    /// padding bytes.
    pub fn start_pos(rand_len: usize, rng: &mut XorShift128Plus) -> usize {
        if rand_len == 0 {
            return 0;
        }
        ((rng.next_u64() % 8_589_934_609) % rand_len as u64) as usize
    }

    /// Padding length for a datagram, keyed on its per-packet hash.
    ///
    /// All variants share this oracle.
    pub fn udp_len(hash: &[u8; 16], rng: &mut XorShift128Plus) -> usize {
        rng.seed(hash);
        (rng.next_u64() % 127) as usize
    }

    /// The session's per-frame overhead target.
    pub fn overhead(&self) -> u16 {
        self.overhead
    }

    /// Variant this oracle was built for.
    pub fn variant(&self) -> Variant {
        self.variant
    }

    #[cfg(test)]
    pub(crate) fn sizes(&self) -> &[u16] {
        &self.sizes
    }

    #[cfg(test)]
    pub(crate) fn primary(&self) -> &[u16] {
        &self.primary
    }

    #[cfg(test)]
    pub(crate) fn secondary(&self) -> &[u16] {
        &self.secondary
    }
}

/// Variants `c`..`f` start from 12..=35 samples.
fn base_list(rng: &mut XorShift128Plus) -> Vec<u16> {
    let len = (rng.next_u64() % (8 + 16) + (4 + 8)) as usize;
    let mut list: Vec<u16> = (0..len).map(|_| sample(rng)).collect();
    list.sort_unstable();
    list
}

/// Variants `d`..`f` grow the list until the last appended sample
/// reaches 1300, bounded at 64 entries, then re-sort.
///
/// The loop condition inspects the unsorted tail on purpose: each
/// iteration looks at the sample it just appended, not the maximum.
fn patch_list(list: &mut Vec<u16>, rng: &mut XorShift128Plus) {
    let old_len = list.len();
    while list.last().is_some_and(|&v| v < 1300) && list.len() < 64 {
        list.push(sample(rng));
    }
    if list.len() != old_len {
        list.sort_unstable();
    }
}

fn largest(list: &[u16]) -> usize {
    list.last().copied().unwrap_or(0) as usize
}
