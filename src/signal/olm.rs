//! Olm account and session wrapper over vodozemac (§3a, §4.2).
//!
//! vodozemac implements the Signal double ratchet (Olm variant) with the
//! same NCC-audited core used by Matrix. This module wraps its `Account`
//! and `Session` types with the envelope shape the bus carries.
//!
//! # Protocol flow
//!
//! ```text
//! Initiator                                   Responder
//! ──────────────────────────────────────────────────────────
//! 1. Fetch responder's prekey bundle from the bus
//! 2. create_outbound_session(identity, signed_prekey, one_time_key)
//! 3. Encrypt first message ──► PreKey message
//!
//!                                      4. Receive PreKey message
//!                                      5. create_inbound_session
//!                                      6. Both sides now share a session
//!
//!    ◄── Normal messages, ratcheting forward each turn ──►
//! ```

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use vodozemac::olm::{
    Account as VodozemacAccount, InboundCreationResult, OlmMessage, Session as VodozemacSession, SessionConfig,
};
use vodozemac::{Curve25519PublicKey, Ed25519PublicKey};

/// Keys needed for session establishment, published in a prekey bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEstablishmentKeys {
    /// Ed25519 signing key (base64).
    pub ed25519: String,
    /// Curve25519 identity key (base64).
    pub curve25519: String,
    /// One-time key offered for this session (base64).
    pub one_time_key: String,
}

/// Encrypted Olm message envelope, carried as hex inside an event's content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OlmEnvelope {
    /// Envelope format version.
    pub version: u8,
    /// Message type: 0 = `PreKey`, 1 = Normal.
    pub message_type: u8,
    /// Base64-encoded ciphertext.
    pub ciphertext: String,
    /// Sender's Curve25519 identity key (base64).
    pub sender_key: String,
}

impl OlmEnvelope {
    /// Current envelope format version.
    pub const VERSION: u8 = 3;
}

/// Long-lived Olm identity: identity keys plus the one-time key pool.
pub struct OlmAccount {
    inner: VodozemacAccount,
}

impl std::fmt::Debug for OlmAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys = self.inner.identity_keys();
        f.debug_struct("OlmAccount")
            .field("ed25519", &keys.ed25519.to_base64())
            .field("curve25519", &keys.curve25519.to_base64())
            .finish_non_exhaustive()
    }
}

impl OlmAccount {
    /// Create a new account with fresh identity keys.
    #[must_use]
    pub fn new() -> Self {
        Self { inner: VodozemacAccount::new() }
    }

    /// Restore an account from a pickle string.
    pub fn from_pickle(pickle: &str) -> Result<Self> {
        let account_pickle = serde_json::from_str(pickle).context("invalid account pickle")?;
        Ok(Self { inner: VodozemacAccount::from_pickle(account_pickle) })
    }

    /// Serialize the account for encrypted-at-rest storage.
    #[must_use]
    pub fn pickle(&self) -> String {
        serde_json::to_string(&self.inner.pickle()).expect("account pickle always serializes")
    }

    /// Ed25519 signing key (base64).
    #[must_use]
    pub fn ed25519_key(&self) -> String {
        self.inner.identity_keys().ed25519.to_base64()
    }

    /// Curve25519 identity key (base64).
    #[must_use]
    pub fn curve25519_key(&self) -> String {
        self.inner.identity_keys().curve25519.to_base64()
    }

    /// Generate `count` additional one-time keys.
    pub fn generate_one_time_keys(&mut self, count: usize) {
        self.inner.generate_one_time_keys(count);
    }

    /// Current unpublished one-time keys as (key_id, key) pairs.
    #[must_use]
    pub fn one_time_keys(&self) -> Vec<(String, String)> {
        self.inner
            .one_time_keys()
            .into_iter()
            .map(|(id, key)| (id.to_base64(), key.to_base64()))
            .collect()
    }

    /// The count of unpublished one-time keys, for the prekey inventory's
    /// low-water-mark check (§3, §4.2).
    #[must_use]
    pub fn one_time_key_count(&self) -> usize {
        self.inner.one_time_keys().len()
    }

    /// A single one-time key, if any remain.
    #[must_use]
    pub fn get_one_time_key(&self) -> Option<String> {
        self.inner.one_time_keys().into_iter().next().map(|(_, key)| key.to_base64())
    }

    /// Mark all current one-time keys as published (no longer offered).
    pub fn mark_keys_as_published(&mut self) {
        self.inner.mark_keys_as_published();
    }

    /// Keys to publish in a prekey bundle announcement, generating a fresh
    /// one-time key first if the pool is empty.
    pub fn session_establishment_keys(&mut self) -> SessionEstablishmentKeys {
        if self.inner.one_time_keys().is_empty() {
            self.inner.generate_one_time_keys(1);
        }
        let one_time_key = self.get_one_time_key().expect("generated at least one key above");
        SessionEstablishmentKeys {
            ed25519: self.ed25519_key(),
            curve25519: self.curve25519_key(),
            one_time_key,
        }
    }

    /// Create an inbound session from the first (`PreKey`) message a peer
    /// sends. Returns the session, the decrypted plaintext, and the base64
    /// one-time key the message actually embedded, so the caller can
    /// correlate it against its own prekey inventory (§3 invariant iii)
    /// instead of guessing which offered id was consumed.
    pub fn create_inbound_session(
        &mut self,
        sender_curve25519: &str,
        prekey_message: &OlmEnvelope,
    ) -> Result<(OlmSession, Vec<u8>, String)> {
        anyhow::ensure!(
            prekey_message.message_type == 0,
            "expected PreKey message (type 0), got type {}",
            prekey_message.message_type
        );

        let sender_key = Curve25519PublicKey::from_base64(sender_curve25519).context("invalid sender Curve25519 key")?;
        let ciphertext = BASE64.decode(&prekey_message.ciphertext).context("invalid base64 ciphertext")?;
        let olm_message =
            vodozemac::olm::PreKeyMessage::try_from(ciphertext.as_slice()).context("invalid PreKey message format")?;
        let consumed_one_time_key = olm_message.session_keys().one_time_key.to_base64();

        let InboundCreationResult { session, plaintext } = self
            .inner
            .create_inbound_session(sender_key, &olm_message)
            .context("failed to create inbound session")?;

        self.mark_keys_as_published();

        Ok((OlmSession { inner: session, peer_curve25519: sender_curve25519.to_string() }, plaintext, consumed_one_time_key))
    }

    /// Sign `message` with the account's Ed25519 key.
    #[must_use]
    pub fn sign(&self, message: &str) -> String {
        self.inner.sign(message).to_base64()
    }

    /// Create an outbound session to a peer from their published prekeys (X3DH initiator,
    /// §4.2 `add_contact_and_establish_session_from_bundle`).
    pub fn create_outbound_session(&self, peer_identity_key: &str, peer_one_time_key: &str) -> Result<OlmSession> {
        let identity_key = Curve25519PublicKey::from_base64(peer_identity_key).context("invalid peer identity key")?;
        let one_time_key = Curve25519PublicKey::from_base64(peer_one_time_key).context("invalid peer one-time key")?;
        let session = self.inner.create_outbound_session(SessionConfig::version_2(), identity_key, one_time_key);
        Ok(OlmSession { inner: session, peer_curve25519: peer_identity_key.to_string() })
    }
}

impl Default for OlmAccount {
    fn default() -> Self {
        Self::new()
    }
}

/// An established ratchet session with one peer.
pub struct OlmSession {
    inner: VodozemacSession,
    peer_curve25519: String,
}

impl std::fmt::Debug for OlmSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OlmSession")
            .field("session_id", &self.inner.session_id())
            .field("peer_curve25519", &self.peer_curve25519)
            .finish_non_exhaustive()
    }
}

impl OlmSession {
    /// Restore a session from a pickle string.
    pub fn from_pickle(pickle: &str, peer_curve25519: String) -> Result<Self> {
        let session_pickle = serde_json::from_str(pickle).context("invalid session pickle")?;
        Ok(Self { inner: VodozemacSession::from_pickle(session_pickle), peer_curve25519 })
    }

    /// Serialize the session for encrypted-at-rest storage.
    #[must_use]
    pub fn pickle(&self) -> String {
        serde_json::to_string(&self.inner.pickle()).expect("session pickle always serializes")
    }

    /// The session's stable identifier.
    #[must_use]
    pub fn session_id(&self) -> String {
        self.inner.session_id()
    }

    /// Peer's Curve25519 identity key.
    #[must_use]
    pub fn peer_curve25519(&self) -> &str {
        &self.peer_curve25519
    }

    /// Encrypt a plaintext message, advancing the ratchet.
    #[must_use]
    pub fn encrypt(&mut self, plaintext: &[u8], our_curve25519: &str) -> OlmEnvelope {
        let message = self.inner.encrypt(plaintext);
        let (message_type, ciphertext) = match message {
            OlmMessage::PreKey(m) => (0, BASE64.encode(m.to_bytes())),
            OlmMessage::Normal(m) => (1, BASE64.encode(m.to_bytes())),
        };
        OlmEnvelope { version: OlmEnvelope::VERSION, message_type, ciphertext, sender_key: our_curve25519.to_string() }
    }

    /// Decrypt a message, advancing the ratchet.
    pub fn decrypt(&mut self, envelope: &OlmEnvelope) -> Result<Vec<u8>> {
        let ciphertext = BASE64.decode(&envelope.ciphertext).context("invalid base64 ciphertext")?;
        let olm_message = match envelope.message_type {
            0 => OlmMessage::PreKey(
                vodozemac::olm::PreKeyMessage::try_from(ciphertext.as_slice()).context("invalid PreKey message")?,
            ),
            1 => OlmMessage::Normal(
                vodozemac::olm::Message::try_from(ciphertext.as_slice()).context("invalid Normal message")?,
            ),
            other => anyhow::bail!("unknown message type: {other}"),
        };
        self.inner.decrypt(&olm_message).context("decryption failed")
    }
}

/// Verify an Ed25519 signature (used to authenticate prekey bundles, §4.2).
pub fn verify_signature(public_key: &str, message: &str, signature: &str) -> Result<bool> {
    let key = Ed25519PublicKey::from_base64(public_key).context("invalid Ed25519 public key")?;
    let sig = vodozemac::Ed25519Signature::from_base64(signature).context("invalid signature format")?;
    Ok(key.verify(message.as_bytes(), &sig).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_creation() {
        let account = OlmAccount::new();
        assert!(!account.ed25519_key().is_empty());
        assert!(!account.curve25519_key().is_empty());
    }

    #[test]
    fn test_account_pickle() {
        let account = OlmAccount::new();
        let ed25519 = account.ed25519_key();
        let restored = OlmAccount::from_pickle(&account.pickle()).expect("restore");
        assert_eq!(ed25519, restored.ed25519_key());
    }

    #[test]
    fn test_session_establishment_keys() {
        let mut account = OlmAccount::new();
        let keys = account.session_establishment_keys();
        assert!(!keys.ed25519.is_empty());
        assert!(!keys.curve25519.is_empty());
        assert!(!keys.one_time_key.is_empty());
    }

    #[test]
    fn test_sign_and_verify() {
        let account = OlmAccount::new();
        let message = "test message";
        let signature = account.sign(message);
        assert!(verify_signature(&account.ed25519_key(), message, &signature).unwrap());
        assert!(!verify_signature(&account.ed25519_key(), "wrong message", &signature).unwrap());
    }

    #[test]
    fn test_full_session_flow() {
        let mut responder_account = OlmAccount::new();
        responder_account.generate_one_time_keys(1);
        let responder_identity = responder_account.curve25519_key();
        let responder_otk = responder_account.get_one_time_key().unwrap();

        let initiator_account = OlmAccount::new();
        let initiator_identity = initiator_account.curve25519_key();

        let mut initiator_session = initiator_account
            .create_outbound_session(&responder_identity, &responder_otk)
            .unwrap();

        let plaintext = b"hello responder";
        let envelope = initiator_session.encrypt(plaintext, &initiator_identity);
        assert_eq!(envelope.message_type, 0);

        let (mut responder_session, decrypted, consumed_otk) =
            responder_account.create_inbound_session(&initiator_identity, &envelope).expect("inbound session");
        assert_eq!(decrypted, plaintext);
        assert_eq!(consumed_otk, responder_otk);

        let reply = b"hello initiator";
        let reply_envelope = responder_session.encrypt(reply, &responder_identity);
        assert_eq!(reply_envelope.message_type, 1);

        let reply_decrypted = initiator_session.decrypt(&reply_envelope).unwrap();
        assert_eq!(reply_decrypted, reply);
    }

    #[test]
    fn test_session_pickle() {
        let mut account = OlmAccount::new();
        account.generate_one_time_keys(1);
        let identity = account.curve25519_key();
        let otk = account.get_one_time_key().unwrap();

        let other_account = OlmAccount::new();
        let wrapped = other_account.create_outbound_session(&identity, &otk).unwrap();

        let session_id = wrapped.session_id();
        let restored = OlmSession::from_pickle(&wrapped.pickle(), identity).expect("restore");
        assert_eq!(session_id, restored.session_id());
    }
}
