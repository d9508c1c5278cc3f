//! Shared data model for the signal bridge (§3, §4.2).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures the bridge's operations surface to the orchestrator.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// `lookup_contact` found no match for the given key.
    #[error("no contact matches {0:?}")]
    NotFound(String),
    /// A prekey bundle failed to parse.
    #[error("invalid prekey bundle: {0}")]
    InvalidBundle(String),
    /// A prekey bundle's signature did not verify against its embedded identity key.
    #[error("prekey bundle signature is invalid")]
    SignatureInvalid,
    /// A bundle carried this node's own identity key.
    #[error("refusing to add a contact from our own bundle")]
    SelfBundle,
    /// `encrypt_message` was called for a contact with no session and no bundle on file.
    #[error("no session with {0} and no bundle to establish one from")]
    NoSession(String),
    /// The peer key did not resolve to a known contact.
    #[error("unknown contact: {0}")]
    UnknownContact(String),
    /// The underlying Olm/Kyber layer rejected the operation.
    #[error("crypto error: {0}")]
    CryptoError(String),
    /// Ciphertext bytes were not a well-formed envelope.
    #[error("malformed ciphertext: {0}")]
    MalformedCiphertext(String),
    /// A decrypted envelope's sender does not match any known or derivable contact.
    #[error("unknown peer: {0}")]
    UnknownPeer(String),
}

/// A known conversation partner (§3 "Contact").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    /// RDX fingerprint, primary key.
    pub rdx: String,
    /// Bus (Ed25519) public key, hex-encoded.
    pub bus_pubkey: String,
    /// User-assigned display name, if any.
    pub alias: Option<String>,
    /// Whether a Signal session currently exists with this contact.
    pub has_active_session: bool,
    /// The peer's Olm (Curve25519) identity key, base64, once known from a
    /// bundle or an inbound PreKey envelope's `sender_key`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub olm_identity_key: Option<String>,
    /// The peer's published Kyber768 public key, base64, once known from a
    /// bundle. Used to hybrid-wrap the first message of a new session.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub kyber_identity_key: Option<String>,
}

/// Direction of a stored message (§3 "Stored Message").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Received from the contact.
    Incoming,
    /// Sent to the contact.
    Outgoing,
}

/// A single logged message (§3 "Stored Message").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Sequential id, unique within this node's history.
    pub id: u64,
    /// Contact RDX this message belongs to.
    pub contact_rdx: String,
    /// Incoming or outgoing.
    pub direction: Direction,
    /// Decrypted plaintext content.
    pub content: String,
    /// Unix seconds.
    pub timestamp: u64,
    /// Read flag; transitions only unread -> read.
    pub read: bool,
}

/// Result of a successful `decrypt_message` call (§4.2).
#[derive(Debug, Clone)]
pub struct DecryptResult {
    /// The decrypted plaintext bytes.
    pub plaintext: Vec<u8>,
    /// True if the one-time prekey consumed to establish this session was
    /// the last of its kind, so the caller should republish a fresh bundle.
    pub should_republish_bundle: bool,
}

/// A single published or received one-time/signed/post-quantum prekey (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrekeyEntry {
    /// Numeric id, unique within its kind, never reissued after consumption.
    pub id: u64,
    /// Base64-encoded public key material.
    pub key: String,
}

/// The wire form of a prekey bundle, carried as the content of a
/// `BUNDLE_ANNOUNCEMENT` event (§3 "Prekey Bundle (wire object)").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrekeyBundle {
    /// Protocol version this bundle was generated under.
    pub version: String,
    /// The owning node's identity public key (Curve25519, base64).
    pub identity_key: String,
    /// Current signed prekey.
    pub signed_prekey: PrekeyEntry,
    /// Signature over the signed prekey's key bytes, by `identity_key`.
    pub signed_prekey_signature: String,
    /// Current post-quantum (Kyber768) prekey.
    pub kyber_prekey: PrekeyEntry,
    /// Signature over the Kyber prekey's key bytes, by `identity_key`.
    pub kyber_prekey_signature: String,
    /// Offered one-time prekeys.
    pub one_time_prekeys: Vec<PrekeyEntry>,
}

/// Outcome of `perform_key_maintenance` (§4.2).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyMaintenanceReport {
    /// The signed prekey was rotated this call.
    pub signed_rotated: bool,
    /// The post-quantum prekey was rotated this call.
    pub kyber_rotated: bool,
    /// One-time prekeys were replenished this call.
    pub one_time_replenished: bool,
}

/// Result of `generate_prekey_bundle_announcement` (§4.2): the signed event
/// plus the prekey ids the caller must mark published once the relay accepts it.
#[derive(Debug, Clone)]
pub struct BundleAnnouncement {
    /// Signed `BUNDLE_ANNOUNCEMENT` event, ready to publish.
    pub announcement_json: String,
    /// The one-time prekey id embedded in this bundle.
    pub pre_key_id: u64,
    /// The signed prekey id embedded in this bundle.
    pub signed_pre_key_id: u64,
    /// The post-quantum prekey id embedded in this bundle.
    pub kyber_pre_key_id: u64,
}
