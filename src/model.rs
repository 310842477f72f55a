//! C1 — the immutable value types shared by every layer: [`ChainInfo`] and
//! [`Beacon`]. Naming follows the `drand-client-rs` reference client
//! (`Beacon` rather than the spec's bare "Result", which would shadow
//! `std::result::Result`).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A drand round number. `0` is reserved as the "latest available round"
/// sentinel when passed to [`crate::client::Client::get`]; it never
/// appears as the `round` of a real [`Beacon`].
pub type Round = u64;

/// Immutable parameters identifying one beacon chain. Content-addressed by
/// [`ChainInfo::hash`]; two chain infos are equal iff their hashes match,
/// per spec §3 — so `PartialEq` is implemented by hand rather than derived.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChainInfo {
    pub public_key: Vec<u8>,
    pub period_secs: u64,
    pub genesis_time: u64,
    pub hash: Vec<u8>,
    pub scheme_id: String,
    pub group_hash: Option<Vec<u8>>,
}

impl ChainInfo {
    /// Builds a `ChainInfo`, deriving `hash` from the other fields via
    /// [`ChainInfo::compute_hash`]. Use this constructor (rather than
    /// building the struct literal directly) whenever the hash is not
    /// already known from an external source.
    pub fn new(
        public_key: Vec<u8>,
        period_secs: u64,
        genesis_time: u64,
        scheme_id: String,
        group_hash: Option<Vec<u8>>,
    ) -> Self {
        let hash = Self::compute_hash(period_secs, genesis_time, &public_key, &group_hash);
        Self {
            public_key,
            period_secs,
            genesis_time,
            hash,
            scheme_id,
            group_hash,
        }
    }

    /// Canonical little-endian encoding of
    /// `(period_seconds: u32, genesis_time: u64, public_key, group_hash)`
    /// passed through SHA-256, per spec §6. `group_hash` contributes an
    /// empty slice when absent so presence/absence doesn't change the
    /// encoding's framing.
    pub fn compute_hash(
        period_secs: u64,
        genesis_time: u64,
        public_key: &[u8],
        group_hash: &Option<Vec<u8>>,
    ) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update((period_secs as u32).to_le_bytes());
        hasher.update(genesis_time.to_le_bytes());
        hasher.update(public_key);
        hasher.update(group_hash.as_deref().unwrap_or(&[]));
        hasher.finalize().to_vec()
    }

    pub fn round_at(&self, time: u64) -> Round {
        crate::time::round_at(self.genesis_time, self.period_secs, time)
    }

    pub fn time_of_round(&self, round: Round) -> u64 {
        crate::time::time_of_round(self.genesis_time, self.period_secs, round)
    }

    pub fn next_round_boundary(&self, time: u64) -> u64 {
        crate::time::next_round_boundary(self.genesis_time, self.period_secs, time)
    }

    pub fn period(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.period_secs)
    }
}

impl PartialEq for ChainInfo {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}
impl Eq for ChainInfo {}

impl std::fmt::Display for ChainInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "chain {}", hex::encode(&self.hash))
    }
}

/// One round of the beacon chain: the published randomness plus the
/// threshold signature that authenticates it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beacon {
    pub round: Round,
    pub randomness: Vec<u8>,
    pub signature: Vec<u8>,
    pub previous_signature: Vec<u8>,
}

impl Beacon {
    /// `randomness == H(signature)`, the invariant spec §3 requires of
    /// every `Beacon`. Construction doesn't enforce it (beacons normally
    /// arrive pre-built from an endpoint's wire decoding); callers that
    /// build one by hand should check it explicitly.
    pub fn derive_randomness(signature: &[u8]) -> Vec<u8> {
        Sha256::digest(signature).to_vec()
    }

    pub fn has_consistent_randomness(&self) -> bool {
        self.randomness == Self::derive_randomness(&self.signature)
    }
}

impl std::fmt::Debug for Beacon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Beacon")
            .field("round", &self.round)
            .field("randomness", &hex::encode(&self.randomness))
            .field("signature", &hex::encode(&self.signature))
            .field("previous_signature", &hex::encode(&self.previous_signature))
            .finish()
    }
}
