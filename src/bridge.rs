//! signal_bridge facade: the single owner of identity, sessions, prekeys,
//! contacts, and history (§3, §4.2).
//!
//! The orchestrator never touches `signal::*` or `wire::event` directly; it
//! only calls through `Bridge`. Encrypt/decrypt for different contacts may
//! run concurrently; the same contact is serialized by holding the bridge's
//! lock for the duration of the call (callers wrap a `Bridge` in a mutex).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::constants::{BUNDLE_ANNOUNCEMENT_D_TAG, FINGERPRINT_PREFIX};
use crate::keyring::Credentials;
use crate::signal::contacts::ContactStore;
use crate::signal::history::MessageHistory;
use crate::signal::olm::{verify_signature, OlmAccount, OlmEnvelope, OlmSession};
use crate::signal::pq::{self, PqKeypair};
use crate::signal::prekeys::PrekeyInventory;
use crate::signal::store::{self, BridgeState};
use crate::signal::types::{
    BridgeError, BundleAnnouncement, Contact, DecryptResult, Direction, KeyMaintenanceReport,
    PrekeyBundle, PrekeyEntry, StoredMessage,
};
use crate::wire::event::{sign_event, EventData};
use crate::wire::kinds;

/// A hybrid Olm + Kyber768 ciphertext envelope, hex-encoded as event content.
///
/// `pq` is only present on the first (`PreKey`) message of a session; once a
/// session is steady-state there is nothing left to encapsulate against.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BridgeEnvelope {
    olm: OlmEnvelope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pq: Option<pq::PqKemTag>,
}

/// The signal bridge: owns the node's cryptographic identity and every
/// peer-relationship built on top of it.
pub struct Bridge {
    identity_path: PathBuf,
    signing_key: SigningKey,
    fingerprint: String,
    account: OlmAccount,
    pq_keypair: PqKeypair,
    sessions: HashMap<String, OlmSession>,
    prekeys: PrekeyInventory,
    /// Maps a `PrekeyInventory` synthetic one-time id to the real vodozemac
    /// one-time key it was issued alongside (vodozemac ids are opaque and
    /// not numbered the way §3 invariant i requires).
    one_time_material: HashMap<u64, String>,
    published_one_time_ids: std::collections::HashSet<u64>,
    contacts: ContactStore,
    history: MessageHistory,
    last_message_timestamp: u64,
}

impl Bridge {
    /// Load the bridge's state from `identity_path`, creating a fresh
    /// identity (and OS keyring entry) if none exists yet.
    pub fn open(identity_path: &Path) -> Result<Self> {
        let mut creds = Credentials::load().unwrap_or_default();

        let state = store::load(identity_path)?;

        let (account, pq_keypair, sessions, prekeys, one_time_material, published_one_time_ids, contacts, history, last_message_timestamp) =
            match state {
                Some(state) => {
                    let account = OlmAccount::from_pickle(&state.pickled_account)?;
                    let pq_keypair = PqKeypair::from_base64(&state.pq_public, &state.pq_secret)?;
                    let mut sessions = HashMap::new();
                    for (rdx, pickle) in &state.pickled_sessions {
                        let peer_curve25519 = contacts_peer_key(&state.contacts, rdx).unwrap_or_default();
                        sessions.insert(rdx.clone(), OlmSession::from_pickle(pickle, peer_curve25519)?);
                    }
                    let prekeys: PrekeyInventory = serde_json::from_value(state.prekey_inventory)
                        .context("malformed prekey inventory in identity database")?;
                    let one_time_material = HashMap::new();
                    let contacts: ContactStore = serde_json::from_value(state.contacts)
                        .context("malformed contact store in identity database")?;
                    let history: MessageHistory = serde_json::from_value(state.history)
                        .context("malformed message history in identity database")?;
                    (
                        account,
                        pq_keypair,
                        sessions,
                        prekeys,
                        one_time_material,
                        state.published_one_time_ids,
                        contacts,
                        history,
                        state.last_message_timestamp,
                    )
                }
                None => (
                    OlmAccount::new(),
                    PqKeypair::generate(),
                    HashMap::new(),
                    PrekeyInventory::new(),
                    HashMap::new(),
                    std::collections::HashSet::new(),
                    ContactStore::new(),
                    MessageHistory::new(),
                    0,
                ),
            };

        let signing_key = match creds.signing_key() {
            Some(key_b64) => {
                let bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, key_b64)
                    .context("invalid signing key encoding in credentials")?;
                let array: [u8; 32] =
                    bytes.try_into().map_err(|_| anyhow::anyhow!("signing key must be 32 bytes"))?;
                SigningKey::from_bytes(&array)
            }
            None => {
                let key = SigningKey::generate(&mut rand::rngs::OsRng);
                let fingerprint = fingerprint_of(&key);
                creds.set_signing_key(
                    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, key.to_bytes()),
                    fingerprint,
                );
                creds.save().context("failed to persist new node signing key")?;
                key
            }
        };
        let fingerprint = fingerprint_of(&signing_key);

        Ok(Self {
            identity_path: identity_path.to_path_buf(),
            signing_key,
            fingerprint,
            account,
            pq_keypair,
            sessions,
            prekeys,
            one_time_material,
            published_one_time_ids,
            contacts,
            history,
            last_message_timestamp,
        })
    }

    /// `"RDX:" + hex(sha256(pubkey))`. Pure, idempotent (§4.2).
    #[must_use]
    pub fn get_node_fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Snapshot of all known contacts. The bridge never inserts a "self"
    /// entry into the contact store, so there is nothing for a caller to
    /// filter (§4.2 deviation documented in DESIGN.md).
    #[must_use]
    pub fn list_contacts(&self) -> Vec<Contact> {
        self.contacts.list()
    }

    /// Look up a contact by RDX fingerprint, bus pubkey, or alias.
    pub fn lookup_contact(&self, key: &str) -> Result<Contact, BridgeError> {
        self.contacts.lookup(key).cloned().ok_or_else(|| BridgeError::NotFound(key.to_string()))
    }

    /// Verify a bundle's signature and extract the RDX fingerprint it
    /// belongs to, without storing any state.
    pub fn extract_rdx_from_bundle(&self, bundle_blob: &str) -> Result<String, BridgeError> {
        let (event, _bundle) = self.parse_and_verify_bundle(bundle_blob)?;
        Ok(fingerprint_of_hex_pubkey(&event.pubkey))
    }

    /// Parse, verify, and store a contact from a published bundle, driving
    /// X3DH to establish an outbound session (§4.2).
    pub fn add_contact_and_establish_session_from_bundle(
        &mut self,
        bundle_blob: &str,
        alias: Option<&str>,
    ) -> Result<String, BridgeError> {
        let (event, bundle) = self.parse_and_verify_bundle(bundle_blob)?;
        let rdx = fingerprint_of_hex_pubkey(&event.pubkey);

        if rdx == self.fingerprint {
            return Err(BridgeError::SelfBundle);
        }

        let one_time_key = bundle
            .one_time_prekeys
            .first()
            .map(|entry| entry.key.clone())
            .unwrap_or_else(|| bundle.signed_prekey.key.clone());

        let session = self
            .account
            .create_outbound_session(&bundle.identity_key, &one_time_key)
            .map_err(|e| BridgeError::CryptoError(e.to_string()))?;

        self.contacts.get_or_create(&rdx, &event.pubkey);
        self.contacts.set_olm_identity_key(&rdx, &bundle.identity_key);
        self.contacts.set_kyber_identity_key(&rdx, &bundle.kyber_prekey.key);
        if let Some(alias) = alias {
            self.contacts.assign_alias(&rdx, alias);
        }
        self.sessions.insert(rdx.clone(), session);
        self.contacts.mark_session_established(&rdx);

        Ok(rdx)
    }

    /// Parse the bundle's wrapping event, verify its id and signature, and
    /// decode + verify its prekey sub-signatures.
    fn parse_and_verify_bundle(&self, bundle_blob: &str) -> Result<(EventData, PrekeyBundle), BridgeError> {
        let event: EventData = serde_json::from_str(bundle_blob)
            .map_err(|e| BridgeError::InvalidBundle(format!("not a signed event: {e}")))?;

        if !event.id_is_valid() {
            return Err(BridgeError::InvalidBundle("event id does not match its content".to_string()));
        }
        if !event.signature_is_valid().unwrap_or(false) {
            return Err(BridgeError::SignatureInvalid);
        }

        let bundle: PrekeyBundle = serde_json::from_str(&event.content)
            .map_err(|e| BridgeError::InvalidBundle(format!("malformed bundle content: {e}")))?;

        let signed_ok = verify_signature(
            &bundle.identity_key,
            &bundle.signed_prekey.key,
            &bundle.signed_prekey_signature,
        )
        .unwrap_or(false);
        let kyber_ok = verify_signature(
            &bundle.identity_key,
            &bundle.kyber_prekey.key,
            &bundle.kyber_prekey_signature,
        )
        .unwrap_or(false);
        if !signed_ok || !kyber_ok {
            return Err(BridgeError::SignatureInvalid);
        }

        Ok((event, bundle))
    }

    /// Build and sign a fresh prekey bundle announcement, picking one
    /// currently-unused one-time prekey (§4.2).
    pub fn generate_prekey_bundle_announcement(&mut self, version: &str) -> Result<BundleAnnouncement> {
        let pre_key_id = self.prekeys.pick_one_time_for_bundle().unwrap_or_else(|| {
            self.prekeys.perform_maintenance();
            self.prekeys.pick_one_time_for_bundle().expect("maintenance replenished the pool")
        });
        let one_time_key = self.one_time_key_material(pre_key_id)?;

        let signed_pre_key_id = self.prekeys.signed_prekey_id();
        let kyber_pre_key_id = self.prekeys.kyber_prekey_id();

        let bundle = PrekeyBundle {
            version: version.to_string(),
            identity_key: self.account.curve25519_key(),
            signed_prekey: PrekeyEntry { id: signed_pre_key_id, key: self.account.curve25519_key() },
            signed_prekey_signature: self.account.sign(&self.account.curve25519_key()),
            kyber_prekey: PrekeyEntry { id: kyber_pre_key_id, key: self.pq_keypair.public_base64() },
            kyber_prekey_signature: self.account.sign(&self.pq_keypair.public_base64()),
            one_time_prekeys: vec![PrekeyEntry { id: pre_key_id, key: one_time_key }],
        };

        let content = serde_json::to_string(&bundle).context("bundle always serializes")?;
        let tags = vec![
            vec!["d".to_string(), BUNDLE_ANNOUNCEMENT_D_TAG.to_string()],
            vec!["radix_version".to_string(), version.to_string()],
        ];
        let announcement_json = self.sign_new_event(kinds::BUNDLE_ANNOUNCEMENT, tags, content)?;

        Ok(BundleAnnouncement { announcement_json, pre_key_id, signed_pre_key_id, kyber_pre_key_id })
    }

    /// Return the real base64 one-time key material behind a synthetic id,
    /// generating a fresh vodozemac one-time key on first use of that id.
    fn one_time_key_material(&mut self, id: u64) -> Result<String> {
        if let Some(key) = self.one_time_material.get(&id) {
            return Ok(key.clone());
        }
        if self.account.one_time_key_count() == 0 {
            self.account.generate_one_time_keys(1);
        }
        let key = self
            .account
            .get_one_time_key()
            .context("no one-time key available after generation")?;
        self.one_time_material.insert(id, key.clone());
        Ok(key)
    }

    /// Build and sign an "unpublish" envelope: a bundle announcement with
    /// empty content (§6).
    pub fn generate_empty_bundle_announcement(&mut self, version: &str) -> Result<String> {
        let tags = vec![
            vec!["d".to_string(), BUNDLE_ANNOUNCEMENT_D_TAG.to_string()],
            vec!["radix_version".to_string(), version.to_string()],
        ];
        self.sign_new_event(kinds::BUNDLE_ANNOUNCEMENT, tags, String::new())
    }

    /// Mark the named prekeys as "in flight to the relay", i.e. published.
    pub fn record_published_bundle(&mut self, pre_key_id: u64, _signed_pre_key_id: u64, _kyber_pre_key_id: u64) {
        self.prekeys.consume_one_time(pre_key_id);
        self.published_one_time_ids.insert(pre_key_id);
        self.account.mark_keys_as_published();
    }

    /// Given the base64 one-time key a remote peer's `PreKey` message
    /// actually embedded, find the synthetic id it was issued under and
    /// mark that specific id consumed (§3 invariant iii). Returns `true` if
    /// a matching id was found and consumed, `false` if the key predates
    /// this process's `one_time_material` cache (e.g. after a restart).
    fn consume_published_one_time_key(&mut self, otk_base64: &str) -> bool {
        let Some(id) = self.one_time_material.iter().find_map(|(id, key)| (key == otk_base64).then_some(*id)) else {
            return false;
        };
        self.one_time_material.remove(&id);
        if self.published_one_time_ids.remove(&id) {
            return true;
        }
        self.prekeys.consume_one_time(id)
    }

    /// Encrypt `plaintext` for `peer_key`, establishing a session first if
    /// none exists. Advances the sending ratchet (§4.2 invariant I1).
    pub fn encrypt_message(&mut self, peer_key: &str, plaintext: &[u8]) -> Result<Vec<u8>, BridgeError> {
        let contact = self
            .contacts
            .lookup(peer_key)
            .cloned()
            .ok_or_else(|| BridgeError::UnknownContact(peer_key.to_string()))?;

        if !self.sessions.contains_key(&contact.rdx) {
            return Err(BridgeError::NoSession(contact.rdx));
        }

        let our_curve25519 = self.account.curve25519_key();
        let session = self.sessions.get_mut(&contact.rdx).expect("checked above");
        let olm = session.encrypt(plaintext, &our_curve25519);

        let pq_tag = if olm.message_type == 0 {
            match contact.kyber_identity_key.as_deref() {
                Some(peer_kyber_key) => {
                    Some(pq::encapsulate(peer_kyber_key).map_err(|e| BridgeError::CryptoError(e.to_string()))?)
                }
                None => None,
            }
        } else {
            None
        };

        let envelope = BridgeEnvelope { olm, pq: pq_tag };
        let bytes = serde_json::to_vec(&envelope).map_err(|e| BridgeError::CryptoError(e.to_string()))?;
        Ok(bytes)
    }

    /// Decrypt a received envelope, creating a session from its embedded
    /// prekey identity if this is the first message from `peer_hint`
    /// (§4.2 invariant I2, I3).
    pub fn decrypt_message(&mut self, peer_hint: &str, ciphertext_bytes: &[u8]) -> Result<DecryptResult, BridgeError> {
        let envelope: BridgeEnvelope = serde_json::from_slice(ciphertext_bytes)
            .map_err(|e| BridgeError::MalformedCiphertext(e.to_string()))?;

        let rdx = self.contacts.lookup(peer_hint).map(|c| c.rdx.clone());

        if envelope.olm.message_type == 0 {
            if let Some(pq_tag) = &envelope.pq {
                let derived = self
                    .pq_keypair
                    .decapsulate(&pq_tag.ciphertext)
                    .map_err(|e| BridgeError::CryptoError(e.to_string()))?;
                if !pq::tag_matches(derived, &pq_tag.tag) {
                    return Err(BridgeError::CryptoError("post-quantum hybrid tag mismatch".to_string()));
                }
            }

            let sender_curve25519 = envelope.olm.sender_key.clone();
            let (session, plaintext, consumed_otk) = self
                .account
                .create_inbound_session(&sender_curve25519, &envelope.olm)
                .map_err(|e| BridgeError::CryptoError(e.to_string()))?;

            let rdx = rdx.unwrap_or_else(|| fingerprint_of_curve25519(&sender_curve25519));
            self.contacts.get_or_create(&rdx, peer_hint);
            self.contacts.set_olm_identity_key(&rdx, &sender_curve25519);
            self.contacts.mark_session_established(&rdx);

            let should_republish_bundle = self.consume_published_one_time_key(&consumed_otk);

            self.sessions.insert(rdx, session);
            return Ok(DecryptResult { plaintext, should_republish_bundle });
        }

        let rdx = rdx.ok_or_else(|| BridgeError::UnknownPeer(peer_hint.to_string()))?;
        let session = self.sessions.get_mut(&rdx).ok_or_else(|| BridgeError::UnknownPeer(rdx.clone()))?;
        let plaintext = session.decrypt(&envelope.olm).map_err(|e| BridgeError::CryptoError(e.to_string()))?;

        Ok(DecryptResult { plaintext, should_republish_bundle: false })
    }

    /// Assign or clear a contact's alias. Idempotent, last-writer-wins.
    pub fn assign_contact_alias(&mut self, rdx: &str, alias: &str) {
        self.contacts.assign_alias(rdx, alias);
    }

    /// Wrap hex-encoded ciphertext in a signed `ENCRYPTED_MESSAGE` event.
    pub fn create_and_sign_encrypted_message(
        &self,
        peer_key: &str,
        hex_ciphertext: &str,
        timestamp: u64,
        version: &str,
    ) -> Result<String, BridgeError> {
        let contact = self
            .contacts
            .lookup(peer_key)
            .cloned()
            .ok_or_else(|| BridgeError::UnknownContact(peer_key.to_string()))?;

        let tags = vec![
            vec!["p".to_string(), contact.bus_pubkey],
            vec!["radix_version".to_string(), version.to_string()],
        ];
        let unsigned = EventData {
            id: String::new(),
            pubkey: String::new(),
            created_at: timestamp,
            kind: kinds::ENCRYPTED_MESSAGE,
            tags,
            content: hex_ciphertext.to_string(),
            sig: String::new(),
        };
        let signed = sign_event(&self.signing_key, unsigned);
        serde_json::to_string(&signed).map_err(|e| BridgeError::CryptoError(e.to_string()))
    }

    /// General-purpose signer: fills id and sig deterministically.
    pub fn sign_bus_event(&self, unsigned_event_json: &str) -> Result<String> {
        let event: EventData = serde_json::from_str(unsigned_event_json).context("malformed unsigned event")?;
        let signed = sign_event(&self.signing_key, event);
        serde_json::to_string(&signed).context("signed event always serializes")
    }

    fn sign_new_event(&self, kind: u16, tags: Vec<Vec<String>>, content: String) -> Result<String> {
        let unsigned = EventData {
            id: String::new(),
            pubkey: String::new(),
            created_at: now_secs(),
            kind,
            tags,
            content,
            sig: String::new(),
        };
        let signed = sign_event(&self.signing_key, unsigned);
        serde_json::to_string(&signed).context("signed event always serializes")
    }

    /// Build a REQ filter requesting messages addressed to this node since
    /// a timestamp, defaulting to the persisted watermark.
    #[must_use]
    pub fn create_subscription_for_self(&self, subscription_id: &str, since_timestamp: Option<u64>) -> String {
        let since = since_timestamp.unwrap_or(self.last_message_timestamp);
        let bus_pubkey_hex = data_encoding::HEXLOWER.encode(self.signing_key.verifying_key().as_bytes());
        let filter = serde_json::json!({ "#p": [bus_pubkey_hex], "since": since });
        crate::wire::codec::serialize_req(subscription_id, &filter)
    }

    /// Monotonic update of the "last seen" watermark (§4.2 invariant I3).
    pub fn update_last_message_timestamp(&mut self, ts: u64) {
        if ts > self.last_message_timestamp {
            self.last_message_timestamp = ts;
        }
    }

    /// Rotate the signed/post-quantum prekeys if stale, replenish one-time
    /// prekeys if low.
    pub fn perform_key_maintenance(&mut self) -> KeyMaintenanceReport {
        let report = self.prekeys.perform_maintenance();
        if report.kyber_rotated {
            self.pq_keypair = PqKeypair::generate();
        }
        report
    }

    /// RDX fingerprints with stored messages, most-recently-active first.
    #[must_use]
    pub fn get_conversations(&self) -> Vec<String> {
        self.history.get_conversations()
    }

    /// All messages for a contact, oldest first.
    #[must_use]
    pub fn get_conversation_messages(&self, contact_rdx: &str) -> Vec<&StoredMessage> {
        self.history.get_conversation_messages(contact_rdx)
    }

    /// Mark messages up to `up_to_id` as read.
    pub fn mark_conversation_read_up_to(&mut self, contact_rdx: &str, up_to_id: u64) {
        self.history.mark_conversation_read_up_to(contact_rdx, up_to_id);
    }

    /// Record a decrypted/sent message into the local log.
    pub fn record_message(&mut self, contact_rdx: &str, direction: Direction, content: &str, timestamp: u64) -> u64 {
        self.history.append(contact_rdx, direction, content, timestamp)
    }

    /// Delete a single message by id.
    pub fn delete_message(&mut self, id: u64) -> bool {
        self.history.delete_message(id)
    }

    /// Delete every message for a contact.
    pub fn delete_conversation(&mut self, contact_rdx: &str) {
        self.history.delete_conversation(contact_rdx);
    }

    /// Count of unread incoming messages for a contact.
    #[must_use]
    pub fn get_unread_count(&self, contact_rdx: &str) -> usize {
        self.history.get_unread_count(contact_rdx)
    }

    /// Flush the bridge's full in-memory state to the encrypted store
    /// (§3a, §4.2).
    pub fn persist(&self) -> Result<()> {
        let pickled_sessions =
            self.sessions.iter().map(|(rdx, session)| (rdx.clone(), session.pickle())).collect();

        let state = BridgeState {
            pickled_account: self.account.pickle(),
            pq_public: self.pq_keypair.public_base64(),
            pq_secret: self.pq_keypair.secret_base64(),
            pickled_sessions,
            prekey_inventory: serde_json::to_value(&self.prekeys).context("prekey inventory always serializes")?,
            contacts: serde_json::to_value(&self.contacts).context("contact store always serializes")?,
            history: serde_json::to_value(&self.history).context("message history always serializes")?,
            published_one_time_ids: self.published_one_time_ids.clone(),
            last_message_timestamp: self.last_message_timestamp,
        };
        store::save(&self.identity_path, &state)
    }
}

fn fingerprint_of(signing_key: &SigningKey) -> String {
    let pubkey = signing_key.verifying_key().to_bytes();
    let hash = Sha256::digest(pubkey);
    format!("{FINGERPRINT_PREFIX}{}", data_encoding::HEXLOWER.encode(&hash))
}

fn fingerprint_of_hex_pubkey(pubkey_hex: &str) -> String {
    let bytes = data_encoding::HEXLOWER.decode(pubkey_hex.as_bytes()).unwrap_or_default();
    let hash = Sha256::digest(&bytes);
    format!("{FINGERPRINT_PREFIX}{}", data_encoding::HEXLOWER.encode(&hash))
}

fn fingerprint_of_curve25519(curve25519_b64: &str) -> String {
    let hash = Sha256::digest(curve25519_b64.as_bytes());
    format!("{FINGERPRINT_PREFIX}{}", data_encoding::HEXLOWER.encode(&hash))
}

fn contacts_peer_key(contacts: &serde_json::Value, rdx: &str) -> Option<String> {
    let store: ContactStore = serde_json::from_value(contacts.clone()).ok()?;
    store.lookup(rdx).and_then(|c| c.olm_identity_key.clone())
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock is after 1970")
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_fresh() -> (tempfile::TempDir, Bridge) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.db");
        let bridge = Bridge::open(&path).unwrap();
        (dir, bridge)
    }

    #[test]
    fn test_fingerprint_is_stable_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.db");
        let bridge = Bridge::open(&path).unwrap();
        let fingerprint = bridge.get_node_fingerprint().to_string();
        bridge.persist().unwrap();
        drop(bridge);

        let reopened = Bridge::open(&path).unwrap();
        assert_eq!(reopened.get_node_fingerprint(), fingerprint);
    }

    #[test]
    fn test_fingerprint_has_rdx_prefix() {
        let (_dir, bridge) = open_fresh();
        assert!(bridge.get_node_fingerprint().starts_with("RDX:"));
    }

    #[test]
    fn test_full_session_establishment_and_message_roundtrip() {
        let (_dir_a, mut alice) = open_fresh();
        let (_dir_b, mut bob) = open_fresh();

        let bob_bundle = bob.generate_prekey_bundle_announcement("0.4.0").unwrap();
        let alice_rdx = alice
            .add_contact_and_establish_session_from_bundle(&bob_bundle.announcement_json, Some("bob"))
            .unwrap();
        assert_eq!(alice_rdx, bob.get_node_fingerprint());

        let ciphertext = alice.encrypt_message("bob", b"hello bob").unwrap();

        let alice_pubkey_hex = data_encoding::HEXLOWER.encode(alice.signing_key.verifying_key().as_bytes());

        let result = bob.decrypt_message(&alice_pubkey_hex, &ciphertext).unwrap();
        assert_eq!(result.plaintext, b"hello bob");
        assert!(result.should_republish_bundle);
    }

    #[test]
    fn test_decrypt_after_record_published_bundle_consumes_the_embedded_id_not_a_guess() {
        let (_dir_a, mut alice) = open_fresh();
        let (_dir_b, mut bob) = open_fresh();

        let bob_bundle = bob.generate_prekey_bundle_announcement("0.4.0").unwrap();
        bob.record_published_bundle(bob_bundle.pre_key_id, bob_bundle.signed_pre_key_id, bob_bundle.kyber_pre_key_id);

        // A second bundle, offering a different one-time id, is generated and
        // left unpublished before Alice's message arrives.
        let other_bundle = bob.generate_prekey_bundle_announcement("0.4.0").unwrap();
        assert_ne!(bob_bundle.pre_key_id, other_bundle.pre_key_id);

        alice
            .add_contact_and_establish_session_from_bundle(&bob_bundle.announcement_json, Some("bob"))
            .unwrap();
        let ciphertext = alice.encrypt_message("bob", b"hello bob").unwrap();
        let alice_pubkey_hex = data_encoding::HEXLOWER.encode(alice.signing_key.verifying_key().as_bytes());

        bob.decrypt_message(&alice_pubkey_hex, &ciphertext).unwrap();

        assert!(!bob.published_one_time_ids.contains(&bob_bundle.pre_key_id));
        assert!(bob.prekeys.available_one_time_ids().contains(&other_bundle.pre_key_id));
    }

    #[test]
    fn test_self_bundle_rejected() {
        let (_dir, mut bridge) = open_fresh();
        let own_bundle = bridge.generate_prekey_bundle_announcement("0.4.0").unwrap();
        let err = bridge
            .add_contact_and_establish_session_from_bundle(&own_bundle.announcement_json, None)
            .unwrap_err();
        assert!(matches!(err, BridgeError::SelfBundle));
    }

    #[test]
    fn test_encrypt_without_session_fails() {
        let (_dir, mut bridge) = open_fresh();
        bridge.contacts.get_or_create("RDX:nobody", "pubkeyhex");
        let err = bridge.encrypt_message("RDX:nobody", b"hi").unwrap_err();
        assert!(matches!(err, BridgeError::NoSession(_)));
    }

    #[test]
    fn test_lookup_unknown_contact_fails() {
        let (_dir, bridge) = open_fresh();
        let err = bridge.lookup_contact("RDX:nope").unwrap_err();
        assert!(matches!(err, BridgeError::NotFound(_)));
    }

    #[test]
    fn test_generate_prekey_bundle_announcement_is_signed() {
        let (_dir, mut bridge) = open_fresh();
        let announcement = bridge.generate_prekey_bundle_announcement("0.4.0").unwrap();
        let event: EventData = serde_json::from_str(&announcement.announcement_json).unwrap();
        assert!(event.id_is_valid());
        assert!(event.signature_is_valid().unwrap());
        assert_eq!(event.kind, kinds::BUNDLE_ANNOUNCEMENT);
    }

    #[test]
    fn test_empty_bundle_announcement_has_empty_content() {
        let (_dir, mut bridge) = open_fresh();
        let json = bridge.generate_empty_bundle_announcement("0.4.0").unwrap();
        let event: EventData = serde_json::from_str(&json).unwrap();
        assert!(event.content.is_empty());
    }

    #[test]
    fn test_record_published_bundle_consumes_one_time_id() {
        let (_dir, mut bridge) = open_fresh();
        let announcement = bridge.generate_prekey_bundle_announcement("0.4.0").unwrap();
        assert!(bridge.prekeys.available_one_time_ids().contains(&announcement.pre_key_id));
        bridge.record_published_bundle(
            announcement.pre_key_id,
            announcement.signed_pre_key_id,
            announcement.kyber_pre_key_id,
        );
        assert!(!bridge.prekeys.available_one_time_ids().contains(&announcement.pre_key_id));
    }

    #[test]
    fn test_assign_alias_then_lookup_by_alias() {
        let (_dir, mut bridge) = open_fresh();
        bridge.contacts.get_or_create("RDX:abc", "pubkeyhex");
        bridge.assign_contact_alias("RDX:abc", "friend");
        assert_eq!(bridge.lookup_contact("friend").unwrap().rdx, "RDX:abc");
    }

    #[test]
    fn test_last_message_timestamp_is_monotonic() {
        let (_dir, mut bridge) = open_fresh();
        bridge.update_last_message_timestamp(100);
        bridge.update_last_message_timestamp(50);
        assert_eq!(bridge.last_message_timestamp, 100);
        bridge.update_last_message_timestamp(200);
        assert_eq!(bridge.last_message_timestamp, 200);
    }

    #[test]
    fn test_persist_then_reopen_preserves_contacts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.db");
        let mut bridge = Bridge::open(&path).unwrap();
        bridge.contacts.get_or_create("RDX:abc", "pubkeyhex");
        bridge.assign_contact_alias("RDX:abc", "friend");
        bridge.persist().unwrap();
        drop(bridge);

        let reopened = Bridge::open(&path).unwrap();
        assert_eq!(reopened.lookup_contact("friend").unwrap().rdx, "RDX:abc");
    }

    #[test]
    fn test_create_and_sign_encrypted_message_has_recipient_tag() {
        let (_dir, mut bridge) = open_fresh();
        bridge.contacts.get_or_create("RDX:abc", "pubkeyhex");
        let json = bridge
            .create_and_sign_encrypted_message("RDX:abc", "deadbeef", 12345, "0.4.0")
            .unwrap();
        let event: EventData = serde_json::from_str(&json).unwrap();
        assert_eq!(event.tag_value("p"), Some("pubkeyhex"));
        assert_eq!(event.kind, kinds::ENCRYPTED_MESSAGE);
    }

    #[test]
    fn test_perform_key_maintenance_no_op_when_fresh() {
        let (_dir, mut bridge) = open_fresh();
        let report = bridge.perform_key_maintenance();
        assert!(!report.signed_rotated);
        assert!(!report.kyber_rotated);
        assert!(!report.one_time_replenished);
    }
}
