//! radix-relay CLI entry point.
//!
//! Wires the queues and processor tasks described in §5 together, then
//! either runs one of the one-shot subcommands to completion or drops into
//! the interactive REPL over stdin/stdout.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;

use radix_relay::bridge::Bridge;
use radix_relay::commands::{CommandHandler, CommandParser, ParsedCommand};
use radix_relay::config::{Config, Mode};
use radix_relay::connection_monitor::ConnectionMonitor;
use radix_relay::constants::QUEUE_CAPACITY;
use radix_relay::orchestrator::{Command, Orchestrator, OrchestratorInput};
use radix_relay::presentation::{self, PresentationEvent};
use radix_relay::queue::{self, QueueSender};
use radix_relay::request_tracker::RequestTracker;
use radix_relay::transport::{self, TransportCommand};

/// Global allocator configured per this codebase's usual convention.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// radix-relay: a peer-to-peer end-to-end encrypted messaging node.
#[derive(Parser)]
#[command(name = "radix-relay", version, about = "Peer-to-peer end-to-end encrypted messaging over a Nostr-style relay")]
struct Cli {
    /// Identity database path.
    #[arg(short, long)]
    identity: Option<PathBuf>,

    /// Transport mode: internet, mesh, or hybrid.
    #[arg(short, long, value_parser = parse_mode)]
    mode: Option<Mode>,

    /// Raise the log level to Debug.
    #[arg(short, long)]
    verbose: bool,

    /// Relay WebSocket URL to connect to on startup.
    #[arg(long)]
    relay: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt and send a message to a peer, wait for the outcome, then exit.
    Send {
        /// Contact alias, RDX fingerprint, or bus pubkey.
        peer: String,
        /// Plaintext message.
        message: String,
    },
    /// List known contacts, then exit.
    Peers,
    /// Print connection status, then exit.
    Status,
}

fn parse_mode(s: &str) -> Result<Mode, String> {
    s.parse::<Mode>().map_err(|e| e.to_string())
}

fn resolve_config(cli: &Cli) -> Config {
    let mut config = Config::load().unwrap_or_default();
    if let Some(identity) = &cli.identity {
        let expanded = shellexpand::tilde(&identity.to_string_lossy()).into_owned();
        config.identity_path = PathBuf::from(expanded);
    }
    if let Some(mode) = cli.mode {
        config.mode = mode;
    }
    if let Some(relay) = &cli.relay {
        config.relay_url = relay.clone();
    }
    config.verbose |= cli.verbose;
    config
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();
}

/// The wired-up processor tasks and the queues/handler used to drive them.
struct Node {
    bridge: Arc<Mutex<Bridge>>,
    connection_monitor: Arc<Mutex<ConnectionMonitor>>,
    orchestrator_tx: QueueSender<OrchestratorInput>,
    transport_tx: QueueSender<TransportCommand>,
    handler: CommandHandler,
}

impl Node {
    fn open(config: &Config) -> anyhow::Result<(Self, queue::QueueReceiver<PresentationEvent>)> {
        let bridge = Arc::new(Mutex::new(Bridge::open(&config.identity_path)?));
        let connection_monitor = Arc::new(Mutex::new(ConnectionMonitor::new()));
        let request_tracker = Arc::new(RequestTracker::new());

        let (transport_tx, transport_rx) = queue::channel::<TransportCommand>(QUEUE_CAPACITY);
        let (transport_evt_tx, mut transport_evt_rx) = queue::channel(QUEUE_CAPACITY);
        let (presentation_tx, presentation_rx) = queue::channel::<PresentationEvent>(QUEUE_CAPACITY);
        let (orchestrator_tx, orchestrator_rx) = queue::channel::<OrchestratorInput>(QUEUE_CAPACITY);

        tokio::spawn(transport::run(transport_rx, transport_evt_tx));

        let forward_tx = orchestrator_tx.clone();
        tokio::spawn(async move {
            while let Ok(event) = transport_evt_rx.pop().await {
                forward_tx.push(OrchestratorInput::Transport(event)).await;
            }
        });

        let orchestrator = Orchestrator::new(
            Arc::clone(&bridge),
            transport_tx.clone(),
            presentation_tx.clone(),
            orchestrator_tx.clone(),
            Arc::clone(&request_tracker),
            Arc::clone(&connection_monitor),
        );
        tokio::spawn(orchestrator.run(orchestrator_rx));

        let handler = CommandHandler::new(
            Arc::clone(&bridge),
            Arc::clone(&connection_monitor),
            orchestrator_tx.clone(),
            transport_tx.clone(),
            presentation_tx,
            config.mode,
        );

        let node = Self { bridge, connection_monitor, orchestrator_tx, transport_tx, handler };
        Ok((node, presentation_rx))
    }

    async fn connect(&self, url: String) {
        self.orchestrator_tx.push(OrchestratorInput::Command(Command::Connect { url })).await;
    }

    async fn shutdown(&self) {
        self.transport_tx.push(TransportCommand::Disconnect).await;
        tokio::task::yield_now().await;
        self.orchestrator_tx.cancel();
        self.transport_tx.cancel();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            log::error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let config = resolve_config(&cli);
    init_logging(config.verbose);

    match cli.command {
        Some(Commands::Send { peer, message }) => one_shot_send(&config, peer, message).await,
        Some(Commands::Peers) => one_shot_peers(&config),
        Some(Commands::Status) => one_shot_status(&config).await,
        None => interactive(&config).await,
    }
}

async fn one_shot_peers(config: &Config) -> anyhow::Result<ExitCode> {
    let bridge = Bridge::open(&config.identity_path)?;
    let contacts = bridge.list_contacts();
    println!("{}", presentation::PresentationEvent::IdentitiesListed { contacts }.render().unwrap_or_default());
    Ok(ExitCode::SUCCESS)
}

async fn one_shot_status(config: &Config) -> anyhow::Result<ExitCode> {
    let (node, _presentation_rx) = Node::open(config)?;
    node.connect(config.relay_url.clone()).await;
    await_connection_settled(&node).await;
    let status = node.connection_monitor.lock().await.format_status();
    println!("{status}");
    node.shutdown().await;
    Ok(ExitCode::SUCCESS)
}

async fn one_shot_send(config: &Config, peer: String, message: String) -> anyhow::Result<ExitCode> {
    let (node, mut presentation_rx) = Node::open(config)?;
    node.connect(config.relay_url.clone()).await;
    await_connection_settled(&node).await;

    node.handler.handle(ParsedCommand::Send { peer: peer.clone(), message }).await;

    let mut accepted = false;
    let outcome = tokio::time::timeout(std::time::Duration::from_secs(20), async {
        loop {
            match presentation_rx.pop().await {
                Ok(PresentationEvent::MessageSent { peer: p, accepted: a, .. }) if p == peer => {
                    accepted = a;
                    break;
                }
                Ok(_) => continue,
                Err(_) => break,
            }
        }
    })
    .await;
    node.shutdown().await;

    if outcome.is_err() {
        eprintln!("Timed out waiting for delivery confirmation");
        return Ok(ExitCode::FAILURE);
    }
    if accepted {
        println!("Message sent to {peer}");
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!("Failed to send message to {peer}");
        Ok(ExitCode::FAILURE)
    }
}

async fn await_connection_settled(node: &Node) {
    let _ = tokio::time::timeout(std::time::Duration::from_secs(12), async {
        loop {
            let connecting = !matches!(
                node.connection_monitor.lock().await.status(radix_relay::connection_monitor::TransportKind::Internet),
                Some(entry) if !matches!(entry.state, radix_relay::connection_monitor::ConnectionState::Disconnected)
            );
            if !connecting {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
    })
    .await;
}

async fn interactive(config: &Config) -> anyhow::Result<ExitCode> {
    let (node, mut presentation_rx) = Node::open(config)?;
    print_banner(&node, config).await;
    node.connect(config.relay_url.clone()).await;

    let mut parser = CommandParser::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Goodbye!");
                break;
            }
            #[cfg(unix)]
            _ = sigterm.recv() => {
                break;
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(raw)) => {
                        let trimmed = raw.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        if matches!(trimmed, "quit" | "exit" | "q") {
                            println!("Goodbye!");
                            break;
                        }
                        let bridge = Arc::clone(&node.bridge);
                        let parsed = {
                            let bridge = bridge.lock().await;
                            parser.parse(trimmed, |key| bridge.lookup_contact(key).ok().map(|c| c.rdx))
                        };
                        node.handler.handle(parsed).await;
                    }
                    Ok(None) => break,
                    Err(e) => {
                        log::error!("stdin read error: {e}");
                        break;
                    }
                }
            }
            event = presentation_rx.pop() => {
                match event {
                    Ok(event) => {
                        if let Some(line) = presentation::filter(&event, parser.active_chat()) {
                            println!("{line}");
                        }
                    }
                    Err(_) => break,
                }
            }
        }
    }

    node.shutdown().await;
    Ok(ExitCode::SUCCESS)
}

async fn print_banner(node: &Node, config: &Config) {
    let fingerprint = node.bridge.lock().await.get_node_fingerprint().to_string();
    println!("radix-relay v{} - Interactive Mode", env!("CARGO_PKG_VERSION"));
    println!("Node: {fingerprint} ({})", config.identity_path.display());
    println!("Transport: {}", config.mode);
    println!();
}
