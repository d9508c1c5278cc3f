//! Tracks last-known transport status per transport kind (§4.9).

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::transport::TransportEvent;

/// Which physical transport a status entry describes. The baseline only
/// ever drives `Internet`; `Bluetooth` exists for the mesh/hybrid modes
/// named in §6 but carried display-only in this baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// The relay WebSocket connection.
    Internet,
    /// A local mesh transport (not wired up in the baseline).
    Bluetooth,
}

/// A transport's last-known state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection attempt is in flight and none is established.
    Disconnected,
    /// Connected, to this URL.
    Connected { url: String },
    /// The last connection attempt failed.
    Failed { url: String, error: String },
}

/// One transport kind's status snapshot.
#[derive(Debug, Clone)]
pub struct StatusEntry {
    /// Current state.
    pub state: ConnectionState,
    /// Unix seconds this entry was last updated.
    pub updated_at: u64,
}

/// Keyed status map, one entry per [`TransportKind`]. Also remembers the
/// most recently attempted URL per kind, since `TransportEvent::Connected`
/// itself carries none (§4.5's `Connected` event is URL-less; the URL was
/// already known from the `Connect` command that triggered it).
#[derive(Debug, Default)]
pub struct ConnectionMonitor {
    statuses: HashMap<TransportKind, StatusEntry>,
    attempted_urls: HashMap<TransportKind, String>,
}

impl ConnectionMonitor {
    /// An empty monitor; every kind reports disconnected until told otherwise.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a connection attempt to `url` is starting, for `kind`.
    /// Call this when issuing the `Connect` command so a later `Connected`
    /// event has a URL to report.
    pub fn note_connect_attempt(&mut self, kind: TransportKind, url: &str) {
        self.attempted_urls.insert(kind, url.to_string());
    }

    /// Feed a transport event for `kind` into the monitor, updating its
    /// status entry.
    pub fn record(&mut self, kind: TransportKind, event: &TransportEvent) {
        let state = match event {
            TransportEvent::Connected => {
                ConnectionState::Connected { url: self.attempted_urls.get(&kind).cloned().unwrap_or_default() }
            }
            TransportEvent::ConnectFailed { url, error } => {
                ConnectionState::Failed { url: url.clone(), error: error.clone() }
            }
            TransportEvent::Disconnected => ConnectionState::Disconnected,
            TransportEvent::Sent { .. } | TransportEvent::SendFailed { .. } | TransportEvent::BytesReceived { .. } => {
                return;
            }
        };
        self.statuses.insert(kind, StatusEntry { state, updated_at: now_secs() });
    }

    /// Look up a kind's current status entry.
    #[must_use]
    pub fn status(&self, kind: TransportKind) -> Option<&StatusEntry> {
        self.statuses.get(&kind)
    }

    /// Render every known transport's status as a human-readable block for
    /// `/status` and the `status` one-shot subcommand.
    #[must_use]
    pub fn format_status(&self) -> String {
        let mut lines = Vec::new();
        for kind in [TransportKind::Internet, TransportKind::Bluetooth] {
            let label = match kind {
                TransportKind::Internet => "internet",
                TransportKind::Bluetooth => "bluetooth",
            };
            let line = match self.statuses.get(&kind) {
                None => format!("{label}: disconnected"),
                Some(entry) => match &entry.state {
                    ConnectionState::Disconnected => format!("{label}: disconnected"),
                    ConnectionState::Connected { url } => format!("{label}: connected to {url}"),
                    ConnectionState::Failed { url, error } => format!("{label}: failed to connect to {url} ({error})"),
                },
            };
            lines.push(line);
        }
        lines.join("\n")
    }
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock is after 1970").as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_monitor_reports_disconnected() {
        let monitor = ConnectionMonitor::new();
        assert_eq!(monitor.format_status(), "internet: disconnected\nbluetooth: disconnected");
    }

    #[test]
    fn test_connect_failed_recorded_with_error() {
        let mut monitor = ConnectionMonitor::new();
        monitor.record(
            TransportKind::Internet,
            &TransportEvent::ConnectFailed { url: "wss://relay".to_string(), error: "timeout".to_string() },
        );
        let entry = monitor.status(TransportKind::Internet).unwrap();
        assert_eq!(entry.state, ConnectionState::Failed { url: "wss://relay".to_string(), error: "timeout".to_string() });
    }

    #[test]
    fn test_connected_reports_the_attempted_url() {
        let mut monitor = ConnectionMonitor::new();
        monitor.note_connect_attempt(TransportKind::Internet, "wss://relay");
        monitor.record(TransportKind::Internet, &TransportEvent::Connected);
        assert_eq!(
            monitor.status(TransportKind::Internet).unwrap().state,
            ConnectionState::Connected { url: "wss://relay".to_string() }
        );
    }

    #[test]
    fn test_connected_then_disconnect_transitions() {
        let mut monitor = ConnectionMonitor::new();
        monitor.note_connect_attempt(TransportKind::Internet, "wss://relay");
        monitor.record(TransportKind::Internet, &TransportEvent::Connected);
        monitor.record(TransportKind::Internet, &TransportEvent::Disconnected);
        assert_eq!(monitor.status(TransportKind::Internet).unwrap().state, ConnectionState::Disconnected);
    }

    #[test]
    fn test_sent_and_send_failed_do_not_change_state() {
        let mut monitor = ConnectionMonitor::new();
        monitor.note_connect_attempt(TransportKind::Internet, "wss://relay");
        monitor.record(TransportKind::Internet, &TransportEvent::Connected);
        monitor.record(TransportKind::Internet, &TransportEvent::Sent { msg_id: "1".to_string() });
        assert!(matches!(monitor.status(TransportKind::Internet).unwrap().state, ConnectionState::Connected { .. }));
    }
}
