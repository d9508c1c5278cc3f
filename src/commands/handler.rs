//! Dispatches a [`ParsedCommand`] to the right queue, with local feedback (§4.7).
//!
//! The handler never waits on a relay round-trip itself: anything that
//! needs one is handed off as an [`OrchestratorInput::Command`] and the
//! orchestrator's own spawned correlation tasks report the outcome later,
//! onto the same presentation queue. What it does do locally is read
//! `signal_bridge` state that never touches the network — the contact
//! list, session flags, the node fingerprint — since those are just
//! in-memory lookups.

use std::str::FromStr;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex;

use crate::bridge::Bridge;
use crate::commands::parser::ParsedCommand;
use crate::config::Mode;
use crate::connection_monitor::ConnectionMonitor;
use crate::orchestrator::{Command, OrchestratorInput};
use crate::presentation::{self, PresentationEvent};
use crate::queue::QueueSender;
use crate::transport::TransportCommand;

const HELP_TEXT: &str = "\
Commands:
  /send <peer> <message>   encrypt and send a message
  /chat <contact>          enter chat mode with a contact
  /leave                   leave chat mode
  /peers                   list known contacts
  /sessions                list contacts with an active session
  /identities              list known identities
  /trust <peer> [alias]    add or alias a contact
  /verify <peer>           show a contact's fingerprint
  /connect <url>           connect to a relay
  /disconnect              close the relay connection
  /publish                 publish this node's prekey bundle
  /unpublish               withdraw this node's prekey bundle
  /broadcast <message>     send a message to every known contact
  /mode <internet|mesh|hybrid>  set the display-only transport mode
  /scan                    scan for nearby mesh peers
  /status                  show transport connection status
  /version                 show the running version
  /help                    show this text";

/// Wires a parsed command to the orchestrator, transport, connection
/// monitor, and presentation queues.
pub struct CommandHandler {
    bridge: Arc<Mutex<Bridge>>,
    connection_monitor: Arc<Mutex<ConnectionMonitor>>,
    orchestrator_tx: QueueSender<OrchestratorInput>,
    transport_tx: QueueSender<TransportCommand>,
    presentation_tx: QueueSender<PresentationEvent>,
    mode: StdMutex<Mode>,
}

impl CommandHandler {
    /// Build a handler wired to the process's shared queues and state.
    #[must_use]
    pub fn new(
        bridge: Arc<Mutex<Bridge>>,
        connection_monitor: Arc<Mutex<ConnectionMonitor>>,
        orchestrator_tx: QueueSender<OrchestratorInput>,
        transport_tx: QueueSender<TransportCommand>,
        presentation_tx: QueueSender<PresentationEvent>,
        initial_mode: Mode,
    ) -> Self {
        Self { bridge, connection_monitor, orchestrator_tx, transport_tx, presentation_tx, mode: StdMutex::new(initial_mode) }
    }

    /// Handle one parsed command.
    pub async fn handle(&self, command: ParsedCommand) {
        match command {
            ParsedCommand::Send { peer, message } => self.handle_send(peer, message).await,
            ParsedCommand::Chat { contact, resolved_rdx } => self.handle_chat(contact, resolved_rdx).await,
            ParsedCommand::Leave => self.feedback(presentation::exit_chat_mode_notice()).await,
            ParsedCommand::Help => self.feedback(HELP_TEXT.to_string()).await,
            ParsedCommand::Status => self.handle_status().await,
            ParsedCommand::Peers => self.handle_peers().await,
            ParsedCommand::Sessions => self.handle_sessions().await,
            ParsedCommand::Identities => self.handle_identities().await,
            ParsedCommand::Connect { url } => self.handle_connect(url).await,
            ParsedCommand::Disconnect => self.transport_tx.push(TransportCommand::Disconnect).await,
            ParsedCommand::Trust { peer, alias } => self.handle_trust(peer, alias).await,
            ParsedCommand::Verify { peer } => self.handle_verify(peer).await,
            ParsedCommand::Broadcast { message } => self.handle_broadcast(message).await,
            ParsedCommand::SetMode { mode } => self.handle_set_mode(mode).await,
            ParsedCommand::Scan => self.feedback("Mesh scanning is not available in this build.".to_string()).await,
            ParsedCommand::Version => self.feedback(format!("radix-relay {}", env!("CARGO_PKG_VERSION"))).await,
            ParsedCommand::PublishIdentity => self.handle_publish().await,
            ParsedCommand::UnpublishIdentity => self.handle_unpublish().await,
            ParsedCommand::Unknown { input } => self.feedback(format!("Unknown command: {input}")).await,
        }
    }

    async fn feedback(&self, text: String) {
        self.presentation_tx.push(PresentationEvent::CommandFeedback(text)).await;
    }

    async fn handle_send(&self, peer: String, message: String) {
        if peer.is_empty() || message.is_empty() {
            self.feedback("Usage: /send <peer> <message>".to_string()).await;
            return;
        }
        self.orchestrator_tx.push(OrchestratorInput::Command(Command::Send { peer, message })).await;
    }

    async fn handle_chat(&self, contact: String, resolved_rdx: Option<String>) {
        match resolved_rdx {
            Some(rdx) => self.feedback(presentation::enter_chat_mode_notice(&rdx)).await,
            None => self.feedback(format!("No such contact: {contact}")).await,
        }
    }

    async fn handle_status(&self) {
        let status = self.connection_monitor.lock().await.format_status();
        self.feedback(status).await;
    }

    async fn handle_peers(&self) {
        let contacts = self.bridge.lock().await.list_contacts();
        if contacts.is_empty() {
            self.feedback("No peers".to_string()).await;
            return;
        }
        let lines = contacts
            .iter()
            .map(|c| {
                let name = c.alias.as_deref().unwrap_or(&c.rdx);
                let session = if c.has_active_session { "session established" } else { "no session" };
                format!("{name} ({}) - {session}", c.rdx)
            })
            .collect::<Vec<_>>()
            .join("\n");
        self.feedback(lines).await;
    }

    async fn handle_sessions(&self) {
        let contacts = self.bridge.lock().await.list_contacts();
        let active = contacts.into_iter().filter(|c| c.has_active_session).collect::<Vec<_>>();
        if active.is_empty() {
            self.feedback("No active sessions".to_string()).await;
            return;
        }
        let lines = active
            .iter()
            .map(|c| c.alias.as_deref().map_or_else(|| c.rdx.clone(), |alias| format!("{alias} ({})", c.rdx)))
            .collect::<Vec<_>>()
            .join("\n");
        self.feedback(lines).await;
    }

    async fn handle_identities(&self) {
        let contacts = self.bridge.lock().await.list_contacts();
        self.presentation_tx.push(PresentationEvent::IdentitiesListed { contacts }).await;
    }

    async fn handle_connect(&self, url: String) {
        self.feedback(format!("Connecting to {url}...")).await;
        self.orchestrator_tx.push(OrchestratorInput::Command(Command::Connect { url })).await;
    }

    async fn handle_trust(&self, peer: String, alias: Option<String>) {
        let ack = alias.as_deref().map_or_else(|| format!("Trusting {peer}"), |alias| format!("Trusting {peer} as {alias}"));
        self.feedback(ack).await;
        self.orchestrator_tx.push(OrchestratorInput::Command(Command::Trust { peer, alias })).await;
    }

    async fn handle_verify(&self, peer: String) {
        let contact = self.bridge.lock().await.lookup_contact(&peer).ok();
        match contact {
            Some(c) => self.feedback(format!("Fingerprint for {peer}: {}", c.rdx)).await,
            None => self.feedback(format!("No such contact: {peer}")).await,
        }
    }

    async fn handle_broadcast(&self, message: String) {
        if message.is_empty() {
            self.feedback("Usage: /broadcast <message>".to_string()).await;
            return;
        }
        let contacts = self.bridge.lock().await.list_contacts();
        for contact in &contacts {
            self.orchestrator_tx
                .push(OrchestratorInput::Command(Command::Send { peer: contact.rdx.clone(), message: message.clone() }))
                .await;
        }
        self.feedback(format!("Broadcasting to {} contact(s)", contacts.len())).await;
    }

    async fn handle_set_mode(&self, mode: String) {
        match Mode::from_str(&mode) {
            Ok(parsed) => {
                *self.mode.lock().expect("mode mutex poisoned") = parsed;
                self.feedback(format!("Mode set to {parsed}")).await;
            }
            Err(e) => self.feedback(e.to_string()).await,
        }
    }

    async fn handle_publish(&self) {
        self.feedback("Publishing identity...".to_string()).await;
        self.orchestrator_tx.push(OrchestratorInput::Command(Command::PublishIdentity)).await;
    }

    async fn handle_unpublish(&self) {
        self.feedback("Unpublishing identity...".to_string()).await;
        self.orchestrator_tx.push(OrchestratorInput::Command(Command::UnpublishIdentity)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue;
    use crate::request_tracker::RequestTracker;

    async fn test_handler() -> (
        CommandHandler,
        tempfile::TempDir,
        queue::QueueReceiver<OrchestratorInput>,
        queue::QueueReceiver<TransportCommand>,
        queue::QueueReceiver<PresentationEvent>,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let bridge = Bridge::open(&dir.path().join("identity.db")).unwrap();
        let (orchestrator_tx, orchestrator_rx) = queue::channel(16);
        let (transport_tx, transport_rx) = queue::channel(16);
        let (presentation_tx, presentation_rx) = queue::channel(16);
        let handler = CommandHandler::new(
            Arc::new(Mutex::new(bridge)),
            Arc::new(Mutex::new(ConnectionMonitor::new())),
            orchestrator_tx,
            transport_tx,
            presentation_tx,
            Mode::Internet,
        );
        let _ = RequestTracker::new();
        (handler, dir, orchestrator_rx, transport_rx, presentation_rx)
    }

    #[tokio::test]
    async fn test_send_with_empty_peer_never_reaches_orchestrator() {
        let (handler, _dir, mut orchestrator_rx, _transport_rx, mut presentation_rx) = test_handler().await;
        handler.handle(ParsedCommand::Send { peer: String::new(), message: String::new() }).await;

        assert!(orchestrator_rx.try_pop().is_none());
        match presentation_rx.pop().await.unwrap() {
            PresentationEvent::CommandFeedback(text) => assert!(text.starts_with("Usage")),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_with_both_fields_pushes_orchestrator_command() {
        let (handler, _dir, mut orchestrator_rx, _transport_rx, _presentation_rx) = test_handler().await;
        handler.handle(ParsedCommand::Send { peer: "RDX:bob".to_string(), message: "hi".to_string() }).await;

        match orchestrator_rx.pop().await.unwrap() {
            OrchestratorInput::Command(Command::Send { peer, message }) => {
                assert_eq!(peer, "RDX:bob");
                assert_eq!(message, "hi");
            }
            other => panic!("unexpected input: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_disconnect_pushes_straight_to_transport() {
        let (handler, _dir, _orchestrator_rx, mut transport_rx, _presentation_rx) = test_handler().await;
        handler.handle(ParsedCommand::Disconnect).await;
        assert!(matches!(transport_rx.pop().await.unwrap(), TransportCommand::Disconnect));
    }

    #[tokio::test]
    async fn test_chat_with_unresolved_contact_gives_feedback_only() {
        let (handler, _dir, mut orchestrator_rx, _transport_rx, mut presentation_rx) = test_handler().await;
        handler.handle(ParsedCommand::Chat { contact: "ghost".to_string(), resolved_rdx: None }).await;

        assert!(orchestrator_rx.try_pop().is_none());
        match presentation_rx.pop().await.unwrap() {
            PresentationEvent::CommandFeedback(text) => assert!(text.contains("No such contact")),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_peers_with_no_contacts_reports_empty() {
        let (handler, _dir, _orchestrator_rx, _transport_rx, mut presentation_rx) = test_handler().await;
        handler.handle(ParsedCommand::Peers).await;
        match presentation_rx.pop().await.unwrap() {
            PresentationEvent::CommandFeedback(text) => assert_eq!(text, "No peers"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_command_reports_the_input() {
        let (handler, _dir, _orchestrator_rx, _transport_rx, mut presentation_rx) = test_handler().await;
        handler.handle(ParsedCommand::Unknown { input: "/bogus".to_string() }).await;
        match presentation_rx.pop().await.unwrap() {
            PresentationEvent::CommandFeedback(text) => assert_eq!(text, "Unknown command: /bogus"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_set_mode_rejects_invalid_mode() {
        let (handler, _dir, _orchestrator_rx, _transport_rx, mut presentation_rx) = test_handler().await;
        handler.handle(ParsedCommand::SetMode { mode: "quantum".to_string() }).await;
        match presentation_rx.pop().await.unwrap() {
            PresentationEvent::CommandFeedback(text) => assert!(text.contains("Invalid mode")),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_broadcast_with_empty_message_is_rejected() {
        let (handler, _dir, mut orchestrator_rx, _transport_rx, mut presentation_rx) = test_handler().await;
        handler.handle(ParsedCommand::Broadcast { message: String::new() }).await;
        assert!(orchestrator_rx.try_pop().is_none());
        match presentation_rx.pop().await.unwrap() {
            PresentationEvent::CommandFeedback(text) => assert!(text.starts_with("Usage")),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
