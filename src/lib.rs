//! radix-relay: a peer-to-peer end-to-end encrypted messaging node.
//!
//! `signal_bridge` (here, [`bridge`]) owns every cryptographic and
//! persistent concern; [`orchestrator`] reduces commands and relay events
//! through it; [`transport`] speaks the relay's WebSocket wire protocol;
//! [`commands`] and [`presentation`] are the REPL's input/output halves.
//! See `SPEC_FULL.md` for the full module map.

pub mod bridge;
pub mod commands;
pub mod config;
pub mod connection_monitor;
pub mod constants;
pub mod crypto;
pub mod env;
pub mod keyring;
pub mod orchestrator;
pub mod presentation;
pub mod queue;
pub mod request_tracker;
pub mod signal;
pub mod transport;
pub mod wire;
pub mod ws;

pub use bridge::Bridge;
pub use commands::{CommandHandler, CommandParser, ParsedCommand};
pub use config::Config;
pub use connection_monitor::ConnectionMonitor;
pub use orchestrator::{Command, Orchestrator, OrchestratorInput};
pub use presentation::PresentationEvent;
pub use request_tracker::RequestTracker;
