//! Contact store: lookup by RDX fingerprint, bus pubkey, or alias (§3 "Contact").

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::signal::types::Contact;

/// All known contacts, indexed for lookup by any of their three keys.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ContactStore {
    by_rdx: HashMap<String, Contact>,
}

impl ContactStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all contacts, in no particular order.
    #[must_use]
    pub fn list(&self) -> Vec<Contact> {
        self.by_rdx.values().cloned().collect()
    }

    /// Find a contact by RDX fingerprint, bus pubkey, or alias, in that
    /// priority order (an alias that happens to equal another contact's
    /// pubkey never shadows the exact-key match).
    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<&Contact> {
        if let Some(contact) = self.by_rdx.get(key) {
            return Some(contact);
        }
        self.by_rdx
            .values()
            .find(|c| c.bus_pubkey == key)
            .or_else(|| self.by_rdx.values().find(|c| c.alias.as_deref() == Some(key)))
    }

    /// Insert a new contact, or return the existing one unchanged if its
    /// RDX is already known.
    pub fn get_or_create(&mut self, rdx: &str, bus_pubkey: &str) -> &Contact {
        self.by_rdx.entry(rdx.to_string()).or_insert_with(|| Contact {
            rdx: rdx.to_string(),
            bus_pubkey: bus_pubkey.to_string(),
            alias: None,
            has_active_session: false,
            olm_identity_key: None,
            kyber_identity_key: None,
        })
    }

    /// Record a contact's Olm (Curve25519) identity key, once learned from a
    /// bundle or an inbound envelope. No-op if the RDX is unknown.
    pub fn set_olm_identity_key(&mut self, rdx: &str, key: &str) {
        if let Some(contact) = self.by_rdx.get_mut(rdx) {
            contact.olm_identity_key = Some(key.to_string());
        }
    }

    /// Record a contact's Kyber768 public key, once learned from a bundle.
    /// No-op if the RDX is unknown.
    pub fn set_kyber_identity_key(&mut self, rdx: &str, key: &str) {
        if let Some(contact) = self.by_rdx.get_mut(rdx) {
            contact.kyber_identity_key = Some(key.to_string());
        }
    }

    /// Assign (or clear, with an empty string) a contact's alias. Idempotent,
    /// last-writer-wins; no-op if the RDX is unknown.
    pub fn assign_alias(&mut self, rdx: &str, alias: &str) {
        if let Some(contact) = self.by_rdx.get_mut(rdx) {
            contact.alias = if alias.is_empty() { None } else { Some(alias.to_string()) };
        }
    }

    /// Mark a contact as having an established session.
    pub fn mark_session_established(&mut self, rdx: &str) {
        if let Some(contact) = self.by_rdx.get_mut(rdx) {
            contact.has_active_session = true;
        }
    }

    /// Mark a contact's session as reset (e.g. after a ratchet restart).
    pub fn mark_session_reset(&mut self, rdx: &str) {
        if let Some(contact) = self.by_rdx.get_mut(rdx) {
            contact.has_active_session = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_rdx_pubkey_or_alias() {
        let mut store = ContactStore::new();
        store.get_or_create("RDX:abc", "pubkeyhex");
        store.assign_alias("RDX:abc", "friend");

        assert_eq!(store.lookup("RDX:abc").unwrap().rdx, "RDX:abc");
        assert_eq!(store.lookup("pubkeyhex").unwrap().rdx, "RDX:abc");
        assert_eq!(store.lookup("friend").unwrap().rdx, "RDX:abc");
        assert!(store.lookup("nope").is_none());
    }

    #[test]
    fn test_alias_assignment_is_idempotent_last_writer_wins() {
        let mut store = ContactStore::new();
        store.get_or_create("RDX:abc", "pubkeyhex");
        store.assign_alias("RDX:abc", "first");
        store.assign_alias("RDX:abc", "second");
        assert_eq!(store.lookup("RDX:abc").unwrap().alias.as_deref(), Some("second"));
    }

    #[test]
    fn test_empty_alias_clears_it() {
        let mut store = ContactStore::new();
        store.get_or_create("RDX:abc", "pubkeyhex");
        store.assign_alias("RDX:abc", "first");
        store.assign_alias("RDX:abc", "");
        assert!(store.lookup("RDX:abc").unwrap().alias.is_none());
    }

    #[test]
    fn test_get_or_create_does_not_overwrite_existing() {
        let mut store = ContactStore::new();
        store.get_or_create("RDX:abc", "pubkeyhex");
        store.assign_alias("RDX:abc", "friend");
        store.get_or_create("RDX:abc", "different-pubkey");
        assert_eq!(store.lookup("RDX:abc").unwrap().alias.as_deref(), Some("friend"));
    }
}
