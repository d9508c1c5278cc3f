//! Post-quantum prekey: Kyber768 KEM hybridized onto the Olm session (§3a, §9a).
//!
//! vodozemac has no PQXDH hook, so the hybrid wrap resolves §1's open
//! non-goal this way: each prekey bundle also publishes a Kyber768 public
//! key. The initiator encapsulates against it, derives a 32-byte tag via
//! HKDF-SHA256, and carries that tag as associated data alongside the first
//! Olm `PreKey` message (`PqKemTag` below, stored next to the `OlmEnvelope`).
//! A session is only considered established once both the Olm ratchet and
//! this tag check out, so compromising Curve25519 alone does not break
//! confidentiality.

use anyhow::{Context, Result};
use hkdf::Hkdf;
use pqcrypto_kyber::kyber768;
use pqcrypto_traits::kem::{Ciphertext as _, PublicKey as _, SecretKey as _, SharedSecret as _};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

/// Info string binding the HKDF output to this protocol and version.
const HKDF_INFO: &[u8] = b"radix-relay/pq-hybrid/v1";

/// A Kyber768 keypair for the post-quantum prekey slot.
pub struct PqKeypair {
    public: kyber768::PublicKey,
    secret: kyber768::SecretKey,
}

impl std::fmt::Debug for PqKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PqKeypair").finish_non_exhaustive()
    }
}

impl PqKeypair {
    /// Generate a fresh Kyber768 keypair.
    #[must_use]
    pub fn generate() -> Self {
        let (public, secret) = kyber768::keypair();
        Self { public, secret }
    }

    /// Public key, base64-encoded for inclusion in a prekey bundle.
    #[must_use]
    pub fn public_base64(&self) -> String {
        base64::Engine::encode(&base64::engine::general_purpose::STANDARD, self.public.as_bytes())
    }

    /// Restore from a base64-encoded secret key (pickled alongside the Olm account).
    pub fn from_base64(public_b64: &str, secret_b64: &str) -> Result<Self> {
        let public_bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, public_b64)
            .context("invalid base64 Kyber public key")?;
        let secret_bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, secret_b64)
            .context("invalid base64 Kyber secret key")?;
        let public = kyber768::PublicKey::from_bytes(&public_bytes).context("malformed Kyber public key")?;
        let secret = kyber768::SecretKey::from_bytes(&secret_bytes).context("malformed Kyber secret key")?;
        Ok(Self { public, secret })
    }

    /// Secret key, base64-encoded for encrypted-at-rest storage.
    #[must_use]
    pub fn secret_base64(&self) -> String {
        base64::Engine::encode(&base64::engine::general_purpose::STANDARD, self.secret.as_bytes())
    }

    /// Decapsulate a ciphertext received from an initiator, producing the
    /// same 32-byte tag they derived with [`encapsulate`].
    pub fn decapsulate(&self, ciphertext_b64: &str) -> Result<[u8; 32]> {
        let ciphertext_bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, ciphertext_b64)
            .context("invalid base64 Kyber ciphertext")?;
        let ciphertext = kyber768::Ciphertext::from_bytes(&ciphertext_bytes).context("malformed Kyber ciphertext")?;
        let shared_secret = kyber768::decapsulate(&ciphertext, &self.secret);
        Ok(derive_tag(shared_secret.as_bytes()))
    }
}

/// Encapsulation result: a tag to carry as associated data, and the
/// ciphertext the responder needs to reproduce it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PqKemTag {
    /// Base64-encoded Kyber768 ciphertext, carried alongside the `PreKey` message.
    pub ciphertext: String,
    /// HKDF-derived 32-byte tag, hex-encoded, checked against the responder's value.
    pub tag: String,
}

/// Encapsulate against a peer's published Kyber768 public key, producing the
/// ciphertext to send and the tag to compare.
pub fn encapsulate(peer_public_b64: &str) -> Result<PqKemTag> {
    let public_bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, peer_public_b64)
        .context("invalid base64 Kyber public key")?;
    let public = kyber768::PublicKey::from_bytes(&public_bytes).context("malformed Kyber public key")?;
    let (shared_secret, ciphertext) = kyber768::encapsulate(&public);
    let tag = derive_tag(shared_secret.as_bytes());
    Ok(PqKemTag {
        ciphertext: base64::Engine::encode(&base64::engine::general_purpose::STANDARD, ciphertext.as_bytes()),
        tag: data_encoding::HEXLOWER.encode(&tag),
    })
}

/// Check a responder-derived tag against the one the initiator sent.
#[must_use]
pub fn tag_matches(derived: [u8; 32], claimed_hex: &str) -> bool {
    data_encoding::HEXLOWER.encode(&derived) == claimed_hex.to_lowercase()
}

fn derive_tag(shared_secret: &[u8]) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(None, shared_secret);
    let mut tag = [0u8; 32];
    hk.expand(HKDF_INFO, &mut tag).expect("32 bytes is a valid HKDF-SHA256 output length");
    tag
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_roundtrip_through_base64() {
        let keypair = PqKeypair::generate();
        let restored = PqKeypair::from_base64(&keypair.public_base64(), &keypair.secret_base64()).unwrap();
        assert_eq!(keypair.public_base64(), restored.public_base64());
    }

    #[test]
    fn test_encapsulate_decapsulate_tags_match() {
        let responder = PqKeypair::generate();
        let kem_tag = encapsulate(&responder.public_base64()).unwrap();
        let derived = responder.decapsulate(&kem_tag.ciphertext).unwrap();
        assert!(tag_matches(derived, &kem_tag.tag));
    }

    #[test]
    fn test_wrong_keypair_fails_tag_check() {
        let responder = PqKeypair::generate();
        let impostor = PqKeypair::generate();
        let kem_tag = encapsulate(&responder.public_base64()).unwrap();
        let derived = impostor.decapsulate(&kem_tag.ciphertext).unwrap();
        assert!(!tag_matches(derived, &kem_tag.tag));
    }
}
