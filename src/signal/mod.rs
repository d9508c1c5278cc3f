//! Signal-protocol data model and storage (§3, §3a, §4.2).
//!
//! The double-ratchet session math lives in `olm`; the post-quantum hybrid
//! wrap lives in `pq`; everything else here is the bridge's bookkeeping —
//! contacts, history, prekey inventory, and encrypted-at-rest persistence.
//! `bridge::Bridge` is the only caller of this module from outside it.

pub mod contacts;
pub mod history;
pub mod olm;
pub mod pq;
pub mod prekeys;
pub mod store;
pub mod types;

pub use types::{
    BridgeError, BundleAnnouncement, Contact, DecryptResult, Direction, KeyMaintenanceReport, PrekeyBundle,
    PrekeyEntry, StoredMessage,
};
