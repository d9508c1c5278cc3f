//! Application-wide constants for radix-relay.
//!
//! Centralizes magic numbers so the orchestrator, transport, and bridge
//! agree on timeouts and protocol limits without reaching into each
//! other's modules.

use std::time::Duration;

// ============================================================================
// Identity
// ============================================================================

/// Minimum `radix_version` a bundle announcement must carry to be accepted.
pub const BUNDLE_ANNOUNCEMENT_MINIMUM_VERSION: &str = "0.4.0";

/// Parameterized-replaceable `d` tag used for bundle announcements.
pub const BUNDLE_ANNOUNCEMENT_D_TAG: &str = "radix_prekey_bundle_v1";

/// Fixed prefix on every node fingerprint.
pub const FINGERPRINT_PREFIX: &str = "RDX:";

/// `radix_version` tag value this node stamps on events it publishes.
/// Independent of the crate's own `CARGO_PKG_VERSION`.
pub const RADIX_PROTOCOL_VERSION: &str = "0.4.0";

// ============================================================================
// Timeouts
// ============================================================================

/// Default correlation timeout for OK and EOSE responses (§5 of the spec).
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Timeout for the initial WebSocket connect + TLS handshake.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Prekey inventory
// ============================================================================

/// Replenish one-time prekeys up to this count when below the low-water mark.
pub const ONE_TIME_PREKEY_HIGH_WATER_MARK: usize = 100;

/// Trigger replenishment once unused one-time prekeys drop to this count.
pub const ONE_TIME_PREKEY_LOW_WATER_MARK: usize = 20;

/// Age after which the signed prekey is rotated.
pub const SIGNED_PREKEY_ROTATION_INTERVAL: Duration = Duration::from_secs(7 * 24 * 3600);

/// Age after which the post-quantum prekey is rotated.
pub const KYBER_PREKEY_ROTATION_INTERVAL: Duration = Duration::from_secs(7 * 24 * 3600);

// ============================================================================
// Wire protocol
// ============================================================================

/// Maximum length of a subscription id (§6).
pub const MAX_SUBSCRIPTION_ID_LENGTH: usize = 64;

/// Bounded queue capacity shared by the processors in §5.
pub const QUEUE_CAPACITY: usize = 256;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_are_reasonable() {
        assert!(REQUEST_TIMEOUT >= Duration::from_secs(5));
        assert!(REQUEST_TIMEOUT <= Duration::from_secs(60));
    }

    #[test]
    fn test_prekey_water_marks_ordered() {
        assert!(ONE_TIME_PREKEY_LOW_WATER_MARK < ONE_TIME_PREKEY_HIGH_WATER_MARK);
    }

    #[test]
    fn test_fingerprint_prefix() {
        assert_eq!(FINGERPRINT_PREFIX, "RDX:");
    }
}
