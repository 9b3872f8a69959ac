// Long-lived cryptographic identity and its proof-of-work binding.
//
// The teacher's `networking/security/identity.rs` is a SPIFFE/JWT service-mesh
// identity (no keypair, no PoW) and does not apply here; keypair generation
// and PoW mining are new code built directly from spec.md §4.1, following the
// teacher's general `Result`/error-kind conventions used throughout
// `networking/*`. Private-key zeroization follows the `Zeroize`/
// `ZeroizeOnDrop` derive pattern used on key material in
// `botho-project-botho`'s `crypto/pq/src/sig.rs` — the teacher's own
// `security/memory_hardening.rs` zeroizes sensitive memory by hand (volatile
// writes) without naming the `zeroize` crate.

use std::net::SocketAddr;
use std::path::Path;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{NodeError, Result};

const MAX_DIFFICULTY: u8 = 32;
const POW_TIMEOUT: Duration = Duration::from_secs(60);

/// Proof-of-work record binding a public key to a nonce satisfying a
/// leading-zero-bit target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofOfWork {
    pub nonce: u64,
    pub hash: [u8; 32],
    pub difficulty: u8,
    pub timestamp: u64,
}

/// A self-generated long-lived keypair plus its proof-of-work.
///
/// The signing key is held in a zeroizing wrapper; every byte is overwritten
/// on drop.
pub struct Identity {
    signing_key: ZeroizingKey,
    public_key: VerifyingKey,
    pub pow: ProofOfWork,
}

#[derive(Zeroize, ZeroizeOnDrop)]
struct ZeroizingKey([u8; 32]);

impl Identity {
    /// Generate a fresh keypair and proof-of-work at the given difficulty.
    pub fn generate(difficulty: u8) -> Result<Self> {
        if difficulty == 0 || difficulty > MAX_DIFFICULTY {
            return Err(NodeError::Identity(format!(
                "invalid difficulty {difficulty}, must be in 1..=32"
            )));
        }

        let signing_key = SigningKey::generate(&mut OsRng);
        let public_key = signing_key.verifying_key();
        let pow = mine(&public_key, difficulty)?;

        Ok(Self {
            signing_key: ZeroizingKey(signing_key.to_bytes()),
            public_key,
            pow,
        })
    }

    /// Reconstruct an identity from previously persisted key bytes and a
    /// proof-of-work record, revalidating the binding.
    pub fn from_parts(secret_bytes: [u8; 32], pow: ProofOfWork) -> Result<Self> {
        let signing_key = SigningKey::from_bytes(&secret_bytes);
        let public_key = signing_key.verifying_key();
        if !validate(public_key.as_bytes(), &pow) {
            return Err(NodeError::Identity(
                "proof-of-work does not match supplied key".into(),
            ));
        }
        Ok(Self {
            signing_key: ZeroizingKey(secret_bytes),
            public_key,
            pow,
        })
    }

    pub fn public_key(&self) -> &VerifyingKey {
        &self.public_key
    }

    pub fn secret_bytes(&self) -> &[u8; 32] {
        &self.signing_key.0
    }

    pub fn peer_id(&self) -> PeerId {
        PeerId::from_public_key(&self.public_key)
    }

    /// `did:xelvra:<lower-hex of SHA256(public_key)[0..16]>`.
    pub fn did(&self) -> String {
        did_for(&self.public_key)
    }

    /// Load the identity persisted at `path`, or generate a fresh one and
    /// persist it there. Avoids re-mining the proof-of-work on every
    /// restart, which at higher difficulties would make startup impractical.
    pub fn load_or_generate(path: &Path, difficulty: u8) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let stored: StoredIdentity = serde_json::from_str(&contents)?;
                let secret_bytes: [u8; 32] = hex::decode(&stored.secret_hex)
                    .map_err(|e| NodeError::Identity(format!("corrupt identity file: {e}")))?
                    .try_into()
                    .map_err(|_| NodeError::Identity("corrupt identity file: wrong key length".into()))?;
                Self::from_parts(
                    secret_bytes,
                    ProofOfWork {
                        nonce: stored.nonce,
                        hash: stored.hash,
                        difficulty: stored.difficulty,
                        timestamp: stored.timestamp,
                    },
                )
            }
            Err(_) => {
                let identity = Self::generate(difficulty)?;
                identity.save(path)?;
                Ok(identity)
            }
        }
    }

    /// Persist the secret key and proof-of-work to `path` so a future
    /// restart can skip re-mining.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let stored = StoredIdentity {
            secret_hex: hex::encode(self.signing_key.0),
            nonce: self.pow.nonce,
            hash: self.pow.hash,
            difficulty: self.pow.difficulty,
            timestamp: self.pow.timestamp,
        };
        std::fs::write(path, serde_json::to_vec_pretty(&stored)?)?;
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct StoredIdentity {
    secret_hex: String,
    nonce: u64,
    hash: [u8; 32],
    difficulty: u8,
    timestamp: u64,
}

fn did_for(public_key: &VerifyingKey) -> String {
    let digest = Sha256::digest(public_key.as_bytes());
    format!("did:xelvra:{}", hex::encode(&digest[0..16]))
}

fn mine(public_key: &VerifyingKey, difficulty: u8) -> Result<ProofOfWork> {
    let start = Instant::now();
    let mut nonce: u64 = 0;
    loop {
        let hash = digest_for(public_key.as_bytes(), nonce);
        if leading_zero_bits(&hash) >= difficulty {
            let timestamp = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs();
            return Ok(ProofOfWork {
                nonce,
                hash,
                difficulty,
                timestamp,
            });
        }
        if start.elapsed() > POW_TIMEOUT {
            return Err(NodeError::Identity(format!(
                "proof-of-work timed out after {POW_TIMEOUT:?} at difficulty {difficulty}"
            )));
        }
        nonce = nonce.wrapping_add(1);
    }
}

fn digest_for(public_key_bytes: &[u8; 32], nonce: u64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(public_key_bytes);
    hasher.update(nonce.to_be_bytes());
    hasher.finalize().into()
}

fn leading_zero_bits(hash: &[u8; 32]) -> u8 {
    let mut count = 0u8;
    for byte in hash {
        if *byte == 0 {
            count += 8;
            continue;
        }
        count += byte.leading_zeros() as u8;
        break;
    }
    count
}

/// Recompute the digest from the supplied public key and nonce; true iff it
/// matches the stored hash and leads with `difficulty` zero bits.
pub fn validate(public_key_bytes: &[u8], pow: &ProofOfWork) -> bool {
    let Ok(key_arr): std::result::Result<[u8; 32], _> = public_key_bytes.try_into() else {
        return false;
    };
    let digest = digest_for(&key_arr, pow.nonce);
    digest == pow.hash && leading_zero_bits(&digest) >= pow.difficulty
}

/// Opaque network identifier of a remote (or local) party: the 32 raw
/// Ed25519 public-key bytes, with a `did:xelvra:<hex>` textual form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId([u8; 32]);

impl PeerId {
    pub fn from_public_key(key: &VerifyingKey) -> Self {
        Self(*key.as_bytes())
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lower-hex encoding of the raw 32 public-key bytes — the wire form
    /// used in the UDP broadcast datagram and overlay records, distinct
    /// from the lossy `did:xelvra:<hash>` form used for human display.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(text: &str) -> Option<Self> {
        let bytes = hex::decode(text).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    /// Placeholder identifier for an inbound connection whose remote side
    /// has not yet completed an application-level handshake: SHA-256 of the
    /// remote socket address's textual form. Transport-level peer binding is
    /// out of scope (spec's "cryptographic transcript of individual chat
    /// sessions beyond what the transport terminates" non-goal); a stream's
    /// payload-level sender, if any, supersedes this once handshakes are
    /// specified above the transport.
    pub fn from_addr_hash(addr: &SocketAddr) -> Self {
        Self(Sha256::digest(addr.to_string().as_bytes()).into())
    }

    /// XOR distance to another PeerId, used by the structured overlay's
    /// KBucket indexing.
    pub fn distance(&self, other: &PeerId) -> [u8; 32] {
        let mut out = [0u8; 32];
        for i in 0..32 {
            out[i] = self.0[i] ^ other.0[i];
        }
        out
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "did:xelvra:{}", hex::encode(&Sha256::digest(self.0)[0..16]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pow_round_trip_for_low_difficulties() {
        for difficulty in 1u8..=8 {
            let identity = Identity::generate(difficulty).expect("generate");
            assert!(validate(identity.public_key().as_bytes(), &identity.pow));

            let mut flipped = identity.pow.clone();
            flipped.nonce ^= 1;
            assert!(!validate(identity.public_key().as_bytes(), &flipped));
        }
    }

    #[test]
    fn invalid_difficulty_rejected() {
        assert!(Identity::generate(0).is_err());
        assert!(Identity::generate(33).is_err());
    }

    #[test]
    fn did_is_stable_for_same_key() {
        let identity = Identity::generate(4).unwrap();
        let did_a = identity.did();
        let did_b = did_for(identity.public_key());
        assert_eq!(did_a, did_b);
        assert!(did_a.starts_with("did:xelvra:"));
    }

    #[test]
    fn peer_id_distance_is_zero_for_self() {
        let identity = Identity::generate(4).unwrap();
        let id = identity.peer_id();
        assert_eq!(id.distance(&id), [0u8; 32]);
    }

    #[test]
    fn addr_hash_is_stable_and_distinct() {
        let a: std::net::SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let b: std::net::SocketAddr = "127.0.0.1:9001".parse().unwrap();
        assert_eq!(PeerId::from_addr_hash(&a), PeerId::from_addr_hash(&a));
        assert_ne!(PeerId::from_addr_hash(&a), PeerId::from_addr_hash(&b));
    }

    #[test]
    fn load_or_generate_persists_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.key");

        let first = Identity::load_or_generate(&path, 4).unwrap();
        let second = Identity::load_or_generate(&path, 4).unwrap();
        assert_eq!(first.peer_id(), second.peer_id());
    }
}
