//! Proof-of-Authority gate: Ed25519 verification against an
//! authorized-key set loaded once at startup.
//!
//! Grounded in `original_source/aggregator/poa_gate.py` (PyNaCl
//! `VerifyKey`/hex encoding); reimplemented on `ed25519-dalek`, the crate
//! the pack itself reaches for (`AcalaNetwork-polkadot-sdk`'s workspace
//! dependency table carries `ed25519-dalek = "2.1"`).
//!
//! `verify` never panics and never returns `Err` to the caller: malformed
//! hex, wrong-length keys, an unknown key, and an invalid signature all
//! collapse to `false`.

#![forbid(unsafe_code)]

use std::fs;
use std::path::Path;

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoaLoadError {
    #[error("reading authorized keys file {path}: {source}")]
    Io { path: String, #[source] source: std::io::Error },
    #[error("no authorized keys loaded from {path} (zero-key PoA gate is a hard failure)")]
    Empty { path: String },
}

/// An immutable set of Ed25519 verification keys, read once at startup from
/// a newline-separated hex file (blank lines ignored).
#[derive(Debug, Clone)]
pub struct PoaGate {
    keys: Vec<(String, VerifyingKey)>,
}

impl PoaGate {
    /// Load the authorized-key set from `path`.
    ///
    /// A zero-key set is treated as process-fatal here: the reference
    /// implementation this is derived from only warns and continues, but an
    /// aggregator that can never authenticate a commit is useless, so this
    /// rewrite hard-fails at load time instead.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PoaLoadError> {
        let path_ref = path.as_ref();
        let text = fs::read_to_string(path_ref)
            .map_err(|e| PoaLoadError::Io { path: path_ref.display().to_string(), source: e })?;

        let mut keys = Vec::new();
        for line in text.lines() {
            let hex_key = line.trim();
            if hex_key.is_empty() {
                continue;
            }
            match decode_verifying_key(hex_key) {
                Some(vk) => keys.push((hex_key.to_lowercase(), vk)),
                None => {
                    tracing::warn!(key = hex_key, "skipping malformed authorized key");
                }
            }
        }

        if keys.is_empty() {
            return Err(PoaLoadError::Empty { path: path_ref.display().to_string() });
        }

        Ok(Self { keys })
    }

    /// Construct a gate directly from already-parsed keys (used by tests
    /// and by collaborators that generate keys in-process).
    pub fn from_keys(keys: Vec<VerifyingKey>) -> Self {
        Self { keys: keys.into_iter().map(|k| (hex::encode(k.to_bytes()), k)).collect() }
    }

    /// Verify `signature` over `message` as claimed by `claimed_public_key_hex`.
    ///
    /// Returns `false` for every failure mode (unknown key, malformed hex,
    /// malformed signature, invalid signature) rather than throwing.
    pub fn verify(&self, message: &[u8], signature: &[u8], claimed_public_key_hex: &str) -> bool {
        let needle = claimed_public_key_hex.trim().to_lowercase();
        let Some((_, vk)) = self.keys.iter().find(|(hex, _)| hex == &needle) else {
            return false;
        };
        let Some(sig) = decode_signature(signature) else {
            return false;
        };
        vk.verify(message, &sig).is_ok()
    }
}

fn decode_verifying_key(hex_key: &str) -> Option<VerifyingKey> {
    let bytes = hex::decode(hex_key).ok()?;
    let arr: [u8; 32] = bytes.try_into().ok()?;
    VerifyingKey::from_bytes(&arr).ok()
}

fn decode_signature(bytes: &[u8]) -> Option<Signature> {
    let arr: [u8; 64] = bytes.try_into().ok()?;
    Some(Signature::from_bytes(&arr))
}

/// Canonical message bytes signed/verified for a COMMIT over a cycle `seq`:
/// the ASCII decimal encoding of `seq`.
pub fn commit_message(seq: u64) -> Vec<u8> {
    seq.to_string().into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;

    #[test]
    fn verify_accepts_valid_signature_from_authorized_key() {
        let sk = SigningKey::generate(&mut OsRng);
        let vk = sk.verifying_key();
        let gate = PoaGate::from_keys(vec![vk]);

        let msg = commit_message(7);
        let sig = sk.sign(&msg);

        assert!(gate.verify(&msg, &sig.to_bytes(), &hex::encode(vk.to_bytes())));
    }

    #[test]
    fn verify_rejects_unknown_key() {
        let sk = SigningKey::generate(&mut OsRng);
        let other = SigningKey::generate(&mut OsRng);
        let gate = PoaGate::from_keys(vec![other.verifying_key()]);

        let msg = commit_message(7);
        let sig = sk.sign(&msg);
        assert!(!gate.verify(&msg, &sig.to_bytes(), &hex::encode(sk.verifying_key().to_bytes())));
    }

    #[test]
    fn verify_rejects_signature_over_wrong_seq() {
        let sk = SigningKey::generate(&mut OsRng);
        let gate = PoaGate::from_keys(vec![sk.verifying_key()]);

        let sig = sk.sign(&commit_message(7));
        let wrong_msg = commit_message(8);
        assert!(!gate.verify(&wrong_msg, &sig.to_bytes(), &hex::encode(sk.verifying_key().to_bytes())));
    }

    #[test]
    fn verify_rejects_malformed_signature_bytes() {
        let sk = SigningKey::generate(&mut OsRng);
        let gate = PoaGate::from_keys(vec![sk.verifying_key()]);
        assert!(!gate.verify(b"7", &[0u8; 10], &hex::encode(sk.verifying_key().to_bytes())));
    }

    #[test]
    fn load_rejects_empty_key_file() {
        let dir = std::env::temp_dir().join(format!("poa-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("authorized_keys.txt");
        std::fs::write(&path, "\n\n").unwrap();
        let err = PoaGate::load(&path).unwrap_err();
        assert!(matches!(err, PoaLoadError::Empty { .. }));
    }
}
