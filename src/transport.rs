//! WebSocket-over-TLS transport state machine (§4.5).
//!
//! Owns one websocket_stream at a time. Runs a `tokio::select!` loop that
//! reacts to commands from its inbox and to frames from the active socket,
//! emitting events onto its outbox for the orchestrator to consume.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::constants::CONNECT_TIMEOUT;
use crate::queue::{QueueError, QueueReceiver, QueueSender};
use crate::ws::{self, WsMessage, WsReader, WsWriter};

/// A command pushed onto the transport's inbox.
#[derive(Debug, Clone)]
pub enum TransportCommand {
    /// Open a connection to `url`. Only the secure `wss://` scheme is
    /// accepted (T2); any other scheme, including plain `ws://`, fails at
    /// parse time, before any I/O.
    Connect {
        /// Target relay URL.
        url: String,
    },
    /// Send `bytes` on the active connection, tagged with `msg_id` for
    /// correlating the resulting `Sent`/`SendFailed` event.
    Send {
        /// Correlation id for the resulting event.
        msg_id: String,
        /// UTF-8 payload to send as a text frame.
        bytes: String,
    },
    /// Close the active connection, if any.
    Disconnect,
}

/// An event emitted onto the transport's outbox.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The connection handshake completed.
    Connected,
    /// The connection attempt failed before a session was established.
    ConnectFailed {
        /// The URL that failed to connect.
        url: String,
        /// Human-readable failure reason.
        error: String,
    },
    /// `msg_id`'s bytes were written successfully.
    Sent {
        /// The id the send command was tagged with.
        msg_id: String,
    },
    /// `msg_id`'s bytes failed to write.
    SendFailed {
        /// The id the send command was tagged with.
        msg_id: String,
        /// Human-readable failure reason.
        error: String,
    },
    /// A frame arrived from the relay.
    BytesReceived {
        /// Raw frame bytes (UTF-8 text or binary, as received).
        bytes: Vec<u8>,
    },
    /// The connection closed, whether by command, read error, or relay close.
    Disconnected,
}

/// Connection state (§4.5). Not exposed; observable only through emitted
/// events and `connection_monitor`'s status map.
enum State {
    Disconnected,
    Connected { writer: WsWriter, reader: WsReader },
}

/// Runs the transport loop until its inbox closes or is cancelled.
///
/// T1: exactly one read is in flight at a time — the `tokio::select!` below
/// only re-polls `reader.recv()` after the previous poll resolved.
pub async fn run(mut inbox: QueueReceiver<TransportCommand>, outbox: QueueSender<TransportEvent>) {
    let mut state = State::Disconnected;

    loop {
        match &mut state {
            State::Disconnected => match inbox.pop().await {
                Ok(TransportCommand::Connect { url }) => {
                    state = handle_connect(&url, &outbox).await;
                }
                Ok(TransportCommand::Send { msg_id, .. }) => {
                    outbox.push(TransportEvent::SendFailed { msg_id, error: "Not connected".to_string() }).await;
                }
                Ok(TransportCommand::Disconnect) => {}
                Err(QueueError::Closed | QueueError::Cancelled) => return,
            },
            State::Connected { writer, reader } => {
                tokio::select! {
                    command = inbox.pop() => match command {
                        Ok(TransportCommand::Connect { url }) => {
                            state = handle_connect(&url, &outbox).await;
                        }
                        Ok(TransportCommand::Send { msg_id, bytes }) => {
                            match writer.send_text(&bytes).await {
                                Ok(()) => outbox.push(TransportEvent::Sent { msg_id }).await,
                                Err(e) => outbox.push(TransportEvent::SendFailed { msg_id, error: e.to_string() }).await,
                            }
                        }
                        Ok(TransportCommand::Disconnect) => {
                            let _ = writer.close().await;
                            state = State::Disconnected;
                            outbox.push(TransportEvent::Disconnected).await;
                        }
                        Err(QueueError::Closed | QueueError::Cancelled) => return,
                    },
                    frame = reader.recv() => match frame {
                        Some(Ok(WsMessage::Text(text))) => {
                            outbox.push(TransportEvent::BytesReceived { bytes: text.into_bytes() }).await;
                        }
                        Some(Ok(WsMessage::Binary(data))) => {
                            outbox.push(TransportEvent::BytesReceived { bytes: data }).await;
                        }
                        Some(Ok(WsMessage::Ping(data))) => {
                            let _ = writer.send_pong(data).await;
                        }
                        Some(Ok(WsMessage::Pong(_))) => {}
                        Some(Ok(WsMessage::Close { .. })) | None => {
                            state = State::Disconnected;
                            outbox.push(TransportEvent::Disconnected).await;
                        }
                        Some(Err(e)) => {
                            log::warn!("transport read error: {e}");
                            state = State::Disconnected;
                            outbox.push(TransportEvent::Disconnected).await;
                        }
                    },
                }
            }
        }
    }
}

async fn handle_connect(url: &str, outbox: &QueueSender<TransportEvent>) -> State {
    if !url.starts_with("wss://") {
        outbox
            .push(TransportEvent::ConnectFailed {
                url: url.to_string(),
                error: "only wss:// is supported".to_string(),
            })
            .await;
        return State::Disconnected;
    }

    match tokio::time::timeout(CONNECT_TIMEOUT, ws::connect(url, &[])).await {
        Ok(Ok((writer, reader))) => {
            outbox.push(TransportEvent::Connected).await;
            State::Connected { writer, reader }
        }
        Ok(Err(e)) => {
            outbox.push(TransportEvent::ConnectFailed { url: url.to_string(), error: e.to_string() }).await;
            State::Disconnected
        }
        Err(_) => {
            outbox
                .push(TransportEvent::ConnectFailed { url: url.to_string(), error: "connection timed out".to_string() })
                .await;
            State::Disconnected
        }
    }
}

/// Current Unix time, used by callers to stamp `Send` correlation ids.
#[must_use]
pub fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock is after 1970").as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue;

    #[tokio::test]
    async fn test_send_while_disconnected_yields_send_failed() {
        let (cmd_tx, cmd_rx) = queue::channel::<TransportCommand>(8);
        let (evt_tx, mut evt_rx) = queue::channel::<TransportEvent>(8);

        let handle = tokio::spawn(run(cmd_rx, evt_tx));
        cmd_tx.push(TransportCommand::Send { msg_id: "1".to_string(), bytes: "hi".to_string() }).await;
        cmd_tx.cancel();

        let event = evt_rx.pop().await.unwrap();
        assert!(matches!(event, TransportEvent::SendFailed { msg_id, error } if msg_id == "1" && error == "Not connected"));
        handle.abort();
    }

    #[tokio::test]
    async fn test_non_wss_scheme_fails_at_connect() {
        let (cmd_tx, cmd_rx) = queue::channel::<TransportCommand>(8);
        let (evt_tx, mut evt_rx) = queue::channel::<TransportEvent>(8);

        let handle = tokio::spawn(run(cmd_rx, evt_tx));
        cmd_tx.push(TransportCommand::Connect { url: "http://example.com".to_string() }).await;

        let event = evt_rx.pop().await.unwrap();
        assert!(matches!(event, TransportEvent::ConnectFailed { .. }));
        cmd_tx.cancel();
        handle.abort();
    }

    #[tokio::test]
    async fn test_insecure_ws_scheme_fails_at_connect() {
        let (cmd_tx, cmd_rx) = queue::channel::<TransportCommand>(8);
        let (evt_tx, mut evt_rx) = queue::channel::<TransportEvent>(8);

        let handle = tokio::spawn(run(cmd_rx, evt_tx));
        cmd_tx.push(TransportCommand::Connect { url: "ws://relay.example/ws".to_string() }).await;

        let event = evt_rx.pop().await.unwrap();
        assert!(matches!(event, TransportEvent::ConnectFailed { .. }));
        cmd_tx.cancel();
        handle.abort();
    }

    #[tokio::test]
    async fn test_unreachable_host_yields_connect_failed() {
        let (cmd_tx, cmd_rx) = queue::channel::<TransportCommand>(8);
        let (evt_tx, mut evt_rx) = queue::channel::<TransportEvent>(8);

        let handle = tokio::spawn(run(cmd_rx, evt_tx));
        cmd_tx.push(TransportCommand::Connect { url: "wss://127.0.0.1:1/invalid".to_string() }).await;

        let event = evt_rx.pop().await.unwrap();
        assert!(matches!(event, TransportEvent::ConnectFailed { .. }));
        cmd_tx.cancel();
        handle.abort();
    }
}
