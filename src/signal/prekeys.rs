//! Prekey inventory: one-time prekey pool plus rotating signed/PQ prekeys (§3, §4.2).

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::constants::{
    KYBER_PREKEY_ROTATION_INTERVAL, ONE_TIME_PREKEY_HIGH_WATER_MARK, ONE_TIME_PREKEY_LOW_WATER_MARK,
    SIGNED_PREKEY_ROTATION_INTERVAL,
};
use crate::signal::types::KeyMaintenanceReport;

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock is after 1970").as_secs()
}

/// A rotating prekey (signed or post-quantum) with its creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RotatingPrekey {
    id: u64,
    created_at: u64,
}

/// Tracks one-time prekey ids consumed so far and the two rotating slots.
///
/// IDs are monotonically assigned and never reused (§3 invariant i), even
/// across a rotation: `next_id` only increases.
#[derive(Debug, Serialize, Deserialize)]
pub struct PrekeyInventory {
    next_id: u64,
    /// Ids currently unused and available to be embedded in a bundle.
    available_one_time: Vec<u64>,
    signed: RotatingPrekey,
    kyber: RotatingPrekey,
}

impl PrekeyInventory {
    /// Start a fresh inventory: one signed prekey, one Kyber prekey, and a
    /// full pool of one-time prekeys up to the high-water mark.
    #[must_use]
    pub fn new() -> Self {
        let mut inventory = Self {
            next_id: 0,
            available_one_time: Vec::new(),
            signed: RotatingPrekey { id: 0, created_at: now_secs() },
            kyber: RotatingPrekey { id: 0, created_at: now_secs() },
        };
        inventory.signed.id = inventory.take_id();
        inventory.kyber.id = inventory.take_id();
        inventory.replenish_one_time(ONE_TIME_PREKEY_HIGH_WATER_MARK);
        inventory
    }

    fn take_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Current signed prekey id.
    #[must_use]
    pub fn signed_prekey_id(&self) -> u64 {
        self.signed.id
    }

    /// Current post-quantum prekey id.
    #[must_use]
    pub fn kyber_prekey_id(&self) -> u64 {
        self.kyber.id
    }

    /// Ids of all currently unconsumed one-time prekeys.
    #[must_use]
    pub fn available_one_time_ids(&self) -> &[u64] {
        &self.available_one_time
    }

    /// Pick one unconsumed one-time prekey id to embed in a new bundle,
    /// without consuming it — consumption happens when a peer actually
    /// uses it (tracked by the caller via `consume_one_time`).
    #[must_use]
    pub fn pick_one_time_for_bundle(&self) -> Option<u64> {
        self.available_one_time.first().copied()
    }

    /// Mark a one-time prekey id as consumed. No-op (and returns `false`) if
    /// the id was already consumed or never issued, preserving the
    /// re-delivery invariant (§3 invariant I2 on `signal_bridge`).
    pub fn consume_one_time(&mut self, id: u64) -> bool {
        if let Some(pos) = self.available_one_time.iter().position(|&x| x == id) {
            self.available_one_time.remove(pos);
            true
        } else {
            false
        }
    }

    /// True once unused one-time prekeys drop to the low-water mark.
    #[must_use]
    pub fn below_low_water_mark(&self) -> bool {
        self.available_one_time.len() <= ONE_TIME_PREKEY_LOW_WATER_MARK
    }

    fn replenish_one_time(&mut self, target: usize) {
        while self.available_one_time.len() < target {
            let id = self.take_id();
            self.available_one_time.push(id);
        }
    }

    /// Rotate the signed/Kyber prekeys if stale and replenish one-time
    /// prekeys if low, returning what changed.
    pub fn perform_maintenance(&mut self) -> KeyMaintenanceReport {
        let now = now_secs();
        let mut report = KeyMaintenanceReport::default();

        if now.saturating_sub(self.signed.created_at) >= SIGNED_PREKEY_ROTATION_INTERVAL.as_secs() {
            self.signed = RotatingPrekey { id: self.take_id(), created_at: now };
            report.signed_rotated = true;
        }

        if now.saturating_sub(self.kyber.created_at) >= KYBER_PREKEY_ROTATION_INTERVAL.as_secs() {
            self.kyber = RotatingPrekey { id: self.take_id(), created_at: now };
            report.kyber_rotated = true;
        }

        if self.below_low_water_mark() {
            self.replenish_one_time(ONE_TIME_PREKEY_HIGH_WATER_MARK);
            report.one_time_replenished = true;
        }

        report
    }
}

impl Default for PrekeyInventory {
    fn default() -> Self {
        Self::new()
    }
}
