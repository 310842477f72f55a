//! C3 — the cryptographic verifier.
//!
//! Grounded directly on `forest_beacon::DrandBeacon::verify_entry`
//! (hash the previous signature and big-endian round into a SHA-256
//! digest, then check a BLS threshold signature over that digest with
//! `bls_signatures::verify_messages`) and on the `drand-client-rs`
//! reference's `unchained_message`/`chained_message` helpers, which this
//! module's `preimage` follows almost verbatim.

use bls_signatures::{PublicKey, Serialize as BlsSerialize, Signature};
use byteorder::{BigEndian, WriteBytesExt};
use sha2::{Digest, Sha256};

use crate::error::ClientError;
use crate::model::{Beacon, ChainInfo};

/// Whether a chain uses chained mode (each round's preimage includes the
/// previous signature) or unchained mode (preimage is the round alone),
/// per spec §6. Determined by inspecting [`ChainInfo::scheme_id`].
fn is_unchained(scheme_id: &str) -> bool {
    scheme_id.contains("unchained")
}

fn preimage(scheme_id: &str, round: crate::model::Round, previous_signature: &[u8]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(previous_signature.len() + 8);
    if !is_unchained(scheme_id) {
        msg.extend_from_slice(previous_signature);
    }
    // infallible: writing to a Vec<u8> never fails.
    msg.write_u64::<BigEndian>(round).expect("write to Vec cannot fail");
    Sha256::digest(&msg).to_vec()
}

/// Verifies one transition: that `curr` is a validly signed successor of
/// `prev` (or, for the first-ever result of a chain, that `curr` alone is
/// well-formed). Checks, per spec §4.8:
///
/// 1. `randomness(curr) == H(signature(curr))`.
/// 2. The threshold signature is valid under `chain_info.public_key`.
/// 3. `curr.previous_signature == prev.signature`, for chained-mode
///    chains (skipped for unchained chains and for the genesis round).
pub fn verify_transition(
    chain_info: &ChainInfo,
    prev: Option<&Beacon>,
    curr: &Beacon,
) -> Result<(), ClientError> {
    if !curr.has_consistent_randomness() {
        return Err(ClientError::VerificationFailed {
            round: curr.round,
            reason: "randomness does not match H(signature)".into(),
        });
    }

    let unchained = is_unchained(&chain_info.scheme_id);
    if !unchained {
        if let Some(prev) = prev {
            if curr.previous_signature != prev.signature {
                return Err(ClientError::VerificationFailed {
                    round: curr.round,
                    reason: "previous_signature does not match last verified signature".into(),
                });
            }
        }
    }

    let digest = preimage(&chain_info.scheme_id, curr.round, &curr.previous_signature);

    let pk = PublicKey::from_bytes(&chain_info.public_key).map_err(|e| {
        ClientError::VerificationFailed {
            round: curr.round,
            reason: format!("invalid public key: {e}"),
        }
    })?;
    let sig = Signature::from_bytes(&curr.signature).map_err(|e| ClientError::VerificationFailed {
        round: curr.round,
        reason: format!("invalid signature encoding: {e}"),
    })?;

    if !bls_signatures::verify_messages(&sig, &[&digest], &[pk]) {
        return Err(ClientError::VerificationFailed {
            round: curr.round,
            reason: "BLS signature does not verify under chain public key".into(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bls_signatures::{PrivateKey, Serialize as BlsSerialize2};

    fn sign(sk: &PrivateKey, digest: &[u8]) -> Vec<u8> {
        sk.sign(digest).as_bytes()
    }

    fn chain_info(sk: &PrivateKey, scheme_id: &str) -> ChainInfo {
        ChainInfo::new(sk.public_key().as_bytes(), 3, 0, scheme_id.into(), None)
    }

    #[test]
    fn chained_transition_verifies() {
        let sk = PrivateKey::generate(&mut rand_core_shim());
        let info = chain_info(&sk, "pedersen-bls-chained");

        let genesis_sig = sign(&sk, &preimage(&info.scheme_id, 1, &[]));
        let genesis = Beacon {
            round: 1,
            randomness: Beacon::derive_randomness(&genesis_sig),
            signature: genesis_sig.clone(),
            previous_signature: vec![],
        };
        assert!(verify_transition(&info, None, &genesis).is_ok());

        let next_sig = sign(&sk, &preimage(&info.scheme_id, 2, &genesis_sig));
        let next = Beacon {
            round: 2,
            randomness: Beacon::derive_randomness(&next_sig),
            signature: next_sig,
            previous_signature: genesis_sig,
        };
        assert!(verify_transition(&info, Some(&genesis), &next).is_ok());
    }

    #[test]
    fn tampered_previous_signature_fails() {
        let sk = PrivateKey::generate(&mut rand_core_shim());
        let info = chain_info(&sk, "pedersen-bls-chained");

        let genesis_sig = sign(&sk, &preimage(&info.scheme_id, 1, &[]));
        let genesis = Beacon {
            round: 1,
            randomness: Beacon::derive_randomness(&genesis_sig),
            signature: genesis_sig.clone(),
            previous_signature: vec![],
        };

        let next_sig = sign(&sk, &preimage(&info.scheme_id, 2, &genesis_sig));
        let mut corrupted = Beacon {
            round: 2,
            randomness: Beacon::derive_randomness(&next_sig),
            signature: next_sig,
            previous_signature: genesis_sig,
        };
        corrupted.previous_signature = vec![0xFF; 48];

        let err = verify_transition(&info, Some(&genesis), &corrupted).unwrap_err();
        assert!(matches!(err, ClientError::VerificationFailed { round: 2, .. }));
    }

    #[test]
    fn unchained_transition_ignores_previous_signature() {
        let sk = PrivateKey::generate(&mut rand_core_shim());
        let info = chain_info(&sk, "bls-unchained-g2");

        let sig = sign(&sk, &preimage(&info.scheme_id, 7, &[]));
        let beacon = Beacon {
            round: 7,
            randomness: Beacon::derive_randomness(&sig),
            signature: sig,
            previous_signature: vec![1, 2, 3], // garbage, ignored in unchained mode
        };
        assert!(verify_transition(&info, None, &beacon).is_ok());
    }

    #[test]
    fn corrupted_randomness_fails_before_crypto_check() {
        let sk = PrivateKey::generate(&mut rand_core_shim());
        let info = chain_info(&sk, "pedersen-bls-chained");
        let sig = sign(&sk, &preimage(&info.scheme_id, 1, &[]));
        let beacon = Beacon {
            round: 1,
            randomness: vec![0u8; 32],
            signature: sig,
            previous_signature: vec![],
        };
        let err = verify_transition(&info, None, &beacon).unwrap_err();
        assert!(matches!(err, ClientError::VerificationFailed { .. }));
    }

    // bls_signatures' `PrivateKey::generate` takes any `rand_core::RngCore +
    // rand_core::CryptoRng`; a small local shim keeps this test module from
    // needing a direct `rand` dependency for a single call site.
    fn rand_core_shim() -> impl rand_core::RngCore + rand_core::CryptoRng {
        struct CountingRng(u64);
        impl rand_core::RngCore for CountingRng {
            fn next_u32(&mut self) -> u32 {
                self.next_u64() as u32
            }
            fn next_u64(&mut self) -> u64 {
                self.0 = self.0.wrapping_add(0x9E3779B97F4A7C15);
                self.0
            }
            fn fill_bytes(&mut self, dest: &mut [u8]) {
                for chunk in dest.chunks_mut(8) {
                    let bytes = self.next_u64().to_le_bytes();
                    chunk.copy_from_slice(&bytes[..chunk.len()]);
                }
            }
            fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
                self.fill_bytes(dest);
                Ok(())
            }
        }
        impl rand_core::CryptoRng for CountingRng {}
        CountingRng(0x1234_5678_9abc_def0)
    }
}
