//! Bus event object: the signed envelope every relay frame carries (§3, §6).

use anyhow::{Context, Result};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// A signed object on the relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventData {
    /// Hex-encoded SHA-256 hash of the canonical form of the other fields.
    pub id: String,
    /// Hex-encoded Ed25519 public key of the author.
    pub pubkey: String,
    /// Unix seconds.
    pub created_at: u64,
    /// Event kind (§6 / `wire::kinds`).
    pub kind: u16,
    /// Ordered list of ordered string arrays.
    pub tags: Vec<Vec<String>>,
    /// Kind-specific string content.
    pub content: String,
    /// Hex-encoded Ed25519 signature over `id`.
    pub sig: String,
}

impl EventData {
    /// Compute the canonical-form hash this event's `id` must equal.
    ///
    /// Canonical form is `[0, pubkey, created_at, kind, tags, content]`
    /// serialized with serde_json's default (compact, field-order-stable)
    /// encoding, hashed with SHA-256.
    #[must_use]
    pub fn canonical_id(pubkey: &str, created_at: u64, kind: u16, tags: &[Vec<String>], content: &str) -> String {
        let canonical: Value = serde_json::json!([0, pubkey, created_at, kind, tags, content]);
        let bytes = serde_json::to_vec(&canonical).expect("canonical form always serializes");
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        data_encoding::HEXLOWER.encode(&hasher.finalize())
    }

    /// True if `id` matches the canonical hash of the other fields.
    #[must_use]
    pub fn id_is_valid(&self) -> bool {
        self.id == Self::canonical_id(&self.pubkey, self.created_at, self.kind, &self.tags, &self.content)
    }

    /// Verify `sig` against `pubkey` over `id`.
    pub fn signature_is_valid(&self) -> Result<bool> {
        let pubkey_bytes = data_encoding::HEXLOWER
            .decode(self.pubkey.as_bytes())
            .context("pubkey is not valid hex")?;
        let pubkey_array: [u8; 32] = pubkey_bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("pubkey must be 32 bytes"))?;
        let verifying_key =
            VerifyingKey::from_bytes(&pubkey_array).context("invalid Ed25519 public key")?;

        let sig_bytes = data_encoding::HEXLOWER
            .decode(self.sig.as_bytes())
            .context("sig is not valid hex")?;
        let sig_array: [u8; 64] = sig_bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("sig must be 64 bytes"))?;
        let signature = Signature::from_bytes(&sig_array);

        Ok(verifying_key
            .verify(self.id.as_bytes(), &signature)
            .is_ok())
    }

    /// Get the first value of the first tag matching `name` (e.g. "p", "d").
    #[must_use]
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.first().map(String::as_str) == Some(name))
            .and_then(|tag| tag.get(1))
            .map(String::as_str)
    }
}

/// Fill `id` and `sig` deterministically for an event whose other fields are
/// already populated. Mirrors `signal_bridge::sign_bus_event` (§4.2).
#[must_use]
pub fn sign_event(signing_key: &SigningKey, mut event: EventData) -> EventData {
    let pubkey_hex = data_encoding::HEXLOWER.encode(signing_key.verifying_key().as_bytes());
    event.pubkey = pubkey_hex;
    event.id = EventData::canonical_id(&event.pubkey, event.created_at, event.kind, &event.tags, &event.content);
    let signature: Signature = signing_key.sign(event.id.as_bytes());
    event.sig = data_encoding::HEXLOWER.encode(signature.to_bytes());
    event
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn test_key() -> SigningKey {
        SigningKey::generate(&mut OsRng)
    }

    #[test]
    fn test_sign_then_validate_id_and_signature() {
        let key = test_key();
        let unsigned = EventData {
            id: String::new(),
            pubkey: String::new(),
            created_at: 1_700_000_000,
            kind: 40001,
            tags: vec![vec!["p".to_string(), "deadbeef".to_string()]],
            content: "hello".to_string(),
            sig: String::new(),
        };
        let signed = sign_event(&key, unsigned);
        assert!(signed.id_is_valid());
        assert!(signed.signature_is_valid().unwrap());
    }

    #[test]
    fn test_tampered_content_invalidates_id() {
        let key = test_key();
        let unsigned = EventData {
            id: String::new(),
            pubkey: String::new(),
            created_at: 1,
            kind: 1,
            tags: vec![],
            content: "original".to_string(),
            sig: String::new(),
        };
        let mut signed = sign_event(&key, unsigned);
        signed.content = "tampered".to_string();
        assert!(!signed.id_is_valid());
    }

    #[test]
    fn test_wrong_signer_fails_verification() {
        let key = test_key();
        let other = test_key();
        let unsigned = EventData {
            id: String::new(),
            pubkey: String::new(),
            created_at: 1,
            kind: 1,
            tags: vec![],
            content: "x".to_string(),
            sig: String::new(),
        };
        let mut signed = sign_event(&key, unsigned);
        signed.pubkey = data_encoding::HEXLOWER.encode(other.verifying_key().as_bytes());
        assert!(!signed.signature_is_valid().unwrap());
    }

    #[test]
    fn test_tag_value_lookup() {
        let event = EventData {
            id: "x".to_string(),
            pubkey: "y".to_string(),
            created_at: 0,
            kind: 30078,
            tags: vec![
                vec!["d".to_string(), "radix_prekey_bundle_v1".to_string()],
                vec!["radix_version".to_string(), "0.4.0".to_string()],
            ],
            content: String::new(),
            sig: String::new(),
        };
        assert_eq!(event.tag_value("d"), Some("radix_prekey_bundle_v1"));
        assert_eq!(event.tag_value("radix_version"), Some("0.4.0"));
        assert_eq!(event.tag_value("missing"), None);
    }
}
