//! The reducer: dispatches commands and transport events through the bridge (§4.6).
//!
//! Owns no mutable crypto state itself (§3 "Ownership summary") — it reads
//! and mutates `signal_bridge` through a shared mutex and coordinates pushes
//! across a small, fixed set of output queues. Each handler here is
//! non-blocking; anything that must wait for a relay reply (an OK or an
//! EOSE) is modeled as a short-lived spawned task correlated through
//! `request_tracker`.

use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::bridge::Bridge;
use crate::connection_monitor::{ConnectionMonitor, TransportKind};
use crate::constants::{BUNDLE_ANNOUNCEMENT_MINIMUM_VERSION, RADIX_PROTOCOL_VERSION, REQUEST_TIMEOUT};
use crate::presentation::PresentationEvent;
use crate::queue::{QueueReceiver, QueueSender};
use crate::request_tracker::{RequestTracker, TrackerError, TrackerResponse};
use crate::signal::types::Direction;
use crate::transport::{TransportCommand, TransportEvent};
use crate::wire::codec::Frame;
use crate::wire::{self, kinds};

/// A user-originated action, produced by the command handler (§4.7).
#[derive(Debug, Clone)]
pub enum Command {
    /// Encrypt and send `message` to `peer`.
    Send { peer: String, message: String },
    /// Publish a fresh prekey bundle announcement.
    PublishIdentity,
    /// Publish an empty ("unpublish") bundle announcement.
    UnpublishIdentity,
    /// Purely local: assign or clear a contact's alias.
    Trust { peer: String, alias: Option<String> },
    /// Publish a caller-built REQ filter verbatim.
    Subscribe { req_json: String },
    /// Subscribe to bundle announcements.
    SubscribeIdentities,
    /// Subscribe to messages addressed to this node.
    SubscribeMessages,
    /// Open the transport connection to `url`.
    Connect { url: String },
}

/// The orchestrator's single inbox value: the union of user commands and
/// transport events (§4.6).
#[derive(Debug, Clone)]
pub enum OrchestratorInput {
    /// A parsed user command.
    Command(Command),
    /// An event surfaced by the transport.
    Transport(TransportEvent),
}

/// The reducer itself. Cheaply `Clone`: every field is an `Arc` or a
/// cloneable queue handle, so spawned correlation tasks can hold their own
/// copy.
#[derive(Clone)]
pub struct Orchestrator {
    bridge: Arc<Mutex<Bridge>>,
    transport_tx: QueueSender<TransportCommand>,
    presentation_tx: QueueSender<PresentationEvent>,
    self_tx: QueueSender<OrchestratorInput>,
    request_tracker: Arc<RequestTracker>,
    connection_monitor: Arc<Mutex<ConnectionMonitor>>,
}

impl Orchestrator {
    /// Build a reducer wired to its output queues. `self_tx` must be the
    /// sending half of the same queue `run` will be given the receiver for,
    /// so handlers can loop a follow-up command (e.g. a forced republish)
    /// back through dispatch.
    #[must_use]
    pub fn new(
        bridge: Arc<Mutex<Bridge>>,
        transport_tx: QueueSender<TransportCommand>,
        presentation_tx: QueueSender<PresentationEvent>,
        self_tx: QueueSender<OrchestratorInput>,
        request_tracker: Arc<RequestTracker>,
        connection_monitor: Arc<Mutex<ConnectionMonitor>>,
    ) -> Self {
        Self { bridge, transport_tx, presentation_tx, self_tx, request_tracker, connection_monitor }
    }

    /// Run until `inbox` closes or is cancelled. A handler failure for one
    /// input is logged and never terminates the loop (§4.6 error isolation).
    pub async fn run(self, mut inbox: QueueReceiver<OrchestratorInput>) {
        loop {
            match inbox.pop().await {
                Ok(input) => self.dispatch(input).await,
                Err(_) => return,
            }
        }
    }

    async fn dispatch(&self, input: OrchestratorInput) {
        match input {
            OrchestratorInput::Command(command) => self.handle_command(command).await,
            OrchestratorInput::Transport(event) => self.handle_transport_event(event).await,
        }
    }

    async fn handle_command(&self, command: Command) {
        match command {
            Command::Send { peer, message } => self.handle_send(peer, message).await,
            Command::PublishIdentity => self.handle_publish_identity().await,
            Command::UnpublishIdentity => self.handle_unpublish_identity().await,
            Command::Trust { peer, alias } => self.handle_trust(&peer, alias.as_deref()).await,
            Command::Subscribe { req_json } => {
                self.transport_tx.push(TransportCommand::Send { msg_id: Uuid::new_v4().to_string(), bytes: req_json }).await;
            }
            Command::SubscribeIdentities => self.handle_subscribe_identities().await,
            Command::SubscribeMessages => self.handle_subscribe_messages().await,
            Command::Connect { url } => {
                self.connection_monitor.lock().await.note_connect_attempt(TransportKind::Internet, &url);
                self.transport_tx.push(TransportCommand::Connect { url }).await;
            }
        }
    }

    async fn handle_send(&self, peer: String, message: String) {
        let signed_event = {
            let mut bridge = self.bridge.lock().await;
            let ciphertext = match bridge.encrypt_message(&peer, message.as_bytes()) {
                Ok(bytes) => bytes,
                Err(e) => {
                    log::warn!("encrypt failed for {peer}: {e}");
                    self.presentation_tx.push(PresentationEvent::MessageSent { peer, event_id: String::new(), accepted: false }).await;
                    return;
                }
            };
            let hex_ciphertext = data_encoding::HEXLOWER.encode(&ciphertext);
            let timestamp = now_secs();
            match bridge.create_and_sign_encrypted_message(&peer, &hex_ciphertext, timestamp, RADIX_PROTOCOL_VERSION) {
                Ok(json) => {
                    bridge.record_message(&peer, Direction::Outgoing, &message, timestamp);
                    json
                }
                Err(e) => {
                    log::warn!("failed to sign outbound message to {peer}: {e}");
                    self.presentation_tx.push(PresentationEvent::MessageSent { peer, event_id: String::new(), accepted: false }).await;
                    return;
                }
            }
        };

        let Ok(event) = serde_json::from_str::<wire::EventData>(&signed_event) else {
            log::warn!("signed event for {peer} did not round-trip through serde, dropping send");
            return;
        };

        self.transport_tx
            .push(TransportCommand::Send { msg_id: event.id.clone(), bytes: wire::serialize_event(&event) })
            .await;

        let this = self.clone();
        let event_id = event.id.clone();
        tokio::spawn(async move {
            let accepted = match this.request_tracker.await_response(&event_id, REQUEST_TIMEOUT).await {
                Ok(TrackerResponse::Ok { accepted, .. }) => accepted,
                Ok(TrackerResponse::Eose) | Err(TrackerError::Cancelled) => false,
                Err(TrackerError::Timeout) => {
                    log::warn!("timed out waiting for OK on message to {peer}");
                    false
                }
            };
            this.presentation_tx.push(PresentationEvent::MessageSent { peer, event_id, accepted }).await;
        });
    }

    async fn handle_publish_identity(&self) {
        let announcement = {
            let mut bridge = self.bridge.lock().await;
            match bridge.generate_prekey_bundle_announcement(RADIX_PROTOCOL_VERSION) {
                Ok(a) => a,
                Err(e) => {
                    log::warn!("failed to generate bundle announcement: {e}");
                    return;
                }
            }
        };
        let Ok(event) = serde_json::from_str::<wire::EventData>(&announcement.announcement_json) else {
            log::warn!("bundle announcement did not round-trip through serde");
            return;
        };
        self.transport_tx
            .push(TransportCommand::Send { msg_id: event.id.clone(), bytes: wire::serialize_event(&event) })
            .await;

        let this = self.clone();
        let event_id = event.id.clone();
        tokio::spawn(async move {
            let accepted = matches!(
                this.request_tracker.await_response(&event_id, REQUEST_TIMEOUT).await,
                Ok(TrackerResponse::Ok { accepted: true, .. })
            );
            if accepted {
                let mut bridge = this.bridge.lock().await;
                bridge.record_published_bundle(announcement.pre_key_id, announcement.signed_pre_key_id, announcement.kyber_pre_key_id);
            }
            let reported_id = if accepted { event_id } else { String::new() };
            this.presentation_tx.push(PresentationEvent::BundlePublished { event_id: reported_id, accepted }).await;
        });
    }

    async fn handle_unpublish_identity(&self) {
        let unsigned = {
            let mut bridge = self.bridge.lock().await;
            match bridge.generate_empty_bundle_announcement(RADIX_PROTOCOL_VERSION) {
                Ok(json) => json,
                Err(e) => {
                    log::warn!("failed to generate unpublish announcement: {e}");
                    return;
                }
            }
        };
        let Ok(event) = serde_json::from_str::<wire::EventData>(&unsigned) else {
            log::warn!("unpublish announcement did not round-trip through serde");
            return;
        };
        self.transport_tx
            .push(TransportCommand::Send { msg_id: event.id.clone(), bytes: wire::serialize_event(&event) })
            .await;

        let this = self.clone();
        let event_id = event.id.clone();
        tokio::spawn(async move {
            let accepted = matches!(
                this.request_tracker.await_response(&event_id, REQUEST_TIMEOUT).await,
                Ok(TrackerResponse::Ok { accepted: true, .. })
            );
            let reported_id = if accepted { event_id } else { String::new() };
            this.presentation_tx.push(PresentationEvent::BundlePublished { event_id: reported_id, accepted }).await;
        });
    }

    async fn handle_trust(&self, peer: &str, alias: Option<&str>) {
        let mut bridge = self.bridge.lock().await;
        let rdx = match bridge.lookup_contact(peer) {
            Ok(contact) => contact.rdx,
            Err(_) => match bridge.extract_rdx_from_bundle(peer) {
                Ok(rdx) => rdx,
                Err(e) => {
                    log::warn!("trust failed for {peer}: {e}");
                    return;
                }
            },
        };
        if let Some(alias) = alias {
            bridge.assign_contact_alias(&rdx, alias);
        }
    }

    async fn handle_subscribe_identities(&self) {
        let subscription_id = Uuid::new_v4().to_string();
        let filter = serde_json::json!({ "kinds": [kinds::BUNDLE_ANNOUNCEMENT], "#d": ["radix_prekey_bundle_v1"] });
        let req_json = wire::codec::serialize_req(&subscription_id, &filter);
        self.subscribe(subscription_id, req_json).await;
    }

    async fn handle_subscribe_messages(&self) {
        let subscription_id = Uuid::new_v4().to_string();
        let req_json = {
            let bridge = self.bridge.lock().await;
            bridge.create_subscription_for_self(&subscription_id, None)
        };
        self.subscribe(subscription_id, req_json).await;
    }

    async fn subscribe(&self, subscription_id: String, req_json: String) {
        self.transport_tx.push(TransportCommand::Send { msg_id: Uuid::new_v4().to_string(), bytes: req_json }).await;

        let this = self.clone();
        tokio::spawn(async move {
            match this.request_tracker.await_response(&subscription_id, REQUEST_TIMEOUT).await {
                Ok(TrackerResponse::Eose) | Ok(TrackerResponse::Ok { .. }) => {
                    this.presentation_tx.push(PresentationEvent::SubscriptionEstablished { subscription_id }).await;
                }
                Err(e) => log::warn!("subscription {subscription_id} did not reach EOSE: {e}"),
            }
        });
    }

    async fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                self.connection_monitor.lock().await.record(TransportKind::Internet, &TransportEvent::Connected);
                self.self_tx.push(OrchestratorInput::Command(Command::SubscribeIdentities)).await;
                self.self_tx.push(OrchestratorInput::Command(Command::SubscribeMessages)).await;
            }
            TransportEvent::BytesReceived { bytes } => self.handle_bytes_received(&bytes).await,
            TransportEvent::Sent { .. } | TransportEvent::SendFailed { .. } | TransportEvent::ConnectFailed { .. } | TransportEvent::Disconnected => {
                self.connection_monitor.lock().await.record(TransportKind::Internet, &event);
            }
        }
    }

    async fn handle_bytes_received(&self, bytes: &[u8]) {
        match wire::codec::parse_frame(bytes) {
            Frame::Ok { event_id, accepted, message } => {
                self.request_tracker.resolve(&event_id, TrackerResponse::Ok { accepted, message });
            }
            Frame::Eose { subscription_id } => {
                self.request_tracker.resolve(&subscription_id, TrackerResponse::Eose);
            }
            Frame::Event { data, .. } => self.handle_event(data).await,
            Frame::Notice { message } => log::info!("relay notice: {message}"),
            Frame::Unknown(value) => log::debug!("unhandled frame: {value}"),
            Frame::Invalid => log::warn!("received malformed frame from relay"),
        }
    }

    async fn handle_event(&self, event: wire::EventData) {
        match event.kind {
            kinds::ENCRYPTED_MESSAGE => self.handle_encrypted_message(event).await,
            kinds::BUNDLE_ANNOUNCEMENT => self.handle_bundle_announcement(event).await,
            kinds::IDENTITY_ANNOUNCEMENT | kinds::SESSION_REQUEST | kinds::NODE_STATUS => {
                log::debug!("received kind {} from {}, logged only", event.kind, event.pubkey);
            }
            kind => log::debug!("received unhandled kind {kind}"),
        }
    }

    async fn handle_encrypted_message(&self, event: wire::EventData) {
        let Ok(ciphertext) = data_encoding::HEXLOWER.decode(event.content.as_bytes()) else {
            log::warn!("encrypted message content was not valid hex");
            return;
        };

        let mut bridge = self.bridge.lock().await;
        let result = match bridge.decrypt_message(&event.pubkey, &ciphertext) {
            Ok(result) => result,
            Err(e) => {
                log::warn!("decrypt failed for message from {}: {e}", event.pubkey);
                return;
            }
        };
        bridge.update_last_message_timestamp(event.created_at);

        let content = String::from_utf8_lossy(&result.plaintext).into_owned();
        let contact = bridge.lookup_contact(&event.pubkey).ok();
        let sender_rdx = contact.as_ref().map_or_else(|| event.pubkey.clone(), |c| c.rdx.clone());
        let sender_alias = contact.and_then(|c| c.alias);
        bridge.record_message(&sender_rdx, Direction::Incoming, &content, event.created_at);
        drop(bridge);

        self.presentation_tx
            .push(PresentationEvent::MessageReceived {
                sender_rdx,
                sender_alias,
                content,
                timestamp: event.created_at,
            })
            .await;

        if result.should_republish_bundle {
            self.self_tx.push(OrchestratorInput::Command(Command::PublishIdentity)).await;
        }
    }

    async fn handle_bundle_announcement(&self, event: wire::EventData) {
        let Some(version_tag) = event.tag_value("radix_version") else {
            log::debug!("bundle announcement from {} missing radix_version tag", event.pubkey);
            return;
        };
        let (Ok(version), Ok(minimum)) =
            (semver::Version::parse(version_tag), semver::Version::parse(BUNDLE_ANNOUNCEMENT_MINIMUM_VERSION))
        else {
            log::warn!("bundle announcement from {} has unparseable version {version_tag}", event.pubkey);
            return;
        };
        if version < minimum {
            log::debug!("dropping bundle announcement from {} below minimum version", event.pubkey);
            return;
        }

        let presentation = if event.content.is_empty() {
            PresentationEvent::BundleAnnouncementRemoved { pubkey: event.pubkey, event_id: event.id }
        } else {
            PresentationEvent::BundleAnnouncementReceived {
                pubkey: event.pubkey,
                bundle_content: event.content,
                event_id: event.id,
            }
        };
        self.presentation_tx.push(presentation).await;
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).expect("system clock is after 1970").as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue;

    fn test_orchestrator() -> (
        Orchestrator,
        tempfile::TempDir,
        QueueReceiver<TransportCommand>,
        QueueReceiver<PresentationEvent>,
        QueueReceiver<OrchestratorInput>,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let bridge = Bridge::open(&dir.path().join("identity.db")).unwrap();
        let (transport_tx, transport_rx) = queue::channel(16);
        let (presentation_tx, presentation_rx) = queue::channel(16);
        let (self_tx, self_rx) = queue::channel(16);
        let orchestrator = Orchestrator::new(
            Arc::new(Mutex::new(bridge)),
            transport_tx,
            presentation_tx,
            self_tx,
            Arc::new(RequestTracker::new()),
            Arc::new(Mutex::new(ConnectionMonitor::new())),
        );
        (orchestrator, dir, transport_rx, presentation_rx, self_rx)
    }

    #[tokio::test]
    async fn test_send_without_session_reports_failure_without_transport_traffic() {
        let (orchestrator, _dir, mut transport_rx, mut presentation_rx, _self_rx) = test_orchestrator();
        orchestrator.handle_command(Command::Send { peer: "RDX:nobody".to_string(), message: "hi".to_string() }).await;

        assert!(transport_rx.try_pop().is_none());
        match presentation_rx.pop().await.unwrap() {
            PresentationEvent::MessageSent { accepted, .. } => assert!(!accepted),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connect_command_pushes_transport_connect() {
        let (orchestrator, _dir, mut transport_rx, _presentation_rx, _self_rx) = test_orchestrator();
        orchestrator.handle_command(Command::Connect { url: "wss://relay.example".to_string() }).await;

        match transport_rx.pop().await.unwrap() {
            TransportCommand::Connect { url } => assert_eq!(url, "wss://relay.example"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_trust_assigns_alias_to_known_contact() {
        let (orchestrator, _dir, _transport_rx, _presentation_rx, _self_rx) = test_orchestrator();
        {
            let mut bridge = orchestrator.bridge.lock().await;
            bridge.assign_contact_alias("RDX:doesnotexistyet", "placeholder");
        }
        orchestrator.handle_command(Command::Trust { peer: "RDX:doesnotexistyet".to_string(), alias: Some("friend".to_string()) }).await;
        // Unknown contact and not a bundle: handler logs and returns without panicking.
    }

    #[tokio::test]
    async fn test_connected_event_queues_identity_and_message_subscriptions() {
        let (orchestrator, _dir, mut transport_rx, _presentation_rx, mut self_rx) = test_orchestrator();
        orchestrator.handle_transport_event(TransportEvent::Connected).await;

        // Connected only enqueues the follow-up commands onto the shared
        // inbox; running them through dispatch is what actually talks to
        // the transport, mirroring how `run`'s loop would pick them up.
        for _ in 0..2 {
            let OrchestratorInput::Command(command) = self_rx.pop().await.unwrap() else {
                panic!("expected a queued command");
            };
            orchestrator.handle_command(command).await;
        }

        assert!(matches!(transport_rx.pop().await.unwrap(), TransportCommand::Send { .. }));
        assert!(matches!(transport_rx.pop().await.unwrap(), TransportCommand::Send { .. }));
    }

    #[tokio::test]
    async fn test_malformed_bytes_received_does_not_panic() {
        let (orchestrator, _dir, _transport_rx, _presentation_rx, _self_rx) = test_orchestrator();
        orchestrator.handle_bytes_received(b"not a valid frame").await;
    }
}
