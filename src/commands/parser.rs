//! Turns a raw input line into a typed [`ParsedCommand`] (§4.7).
//!
//! Parsing is synchronous and side-effect-free except for one case: `/chat`
//! resolves its argument to a contact immediately, via a caller-supplied
//! lookup, and remembers the active chat context for subsequent plain-text
//! lines. That mirrors how contact resolution is local and non-blocking, not
//! a relay round-trip, so doing it inline during parsing never stalls.

/// A line of input, parsed into a typed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedCommand {
    /// `/send <peer> <message>`. Either field is empty when the line has no
    /// space-separated message part.
    Send { peer: String, message: String },
    /// `/chat <contact>`. `resolved_rdx` is `Some` only if the lookup
    /// succeeded during parsing.
    Chat { contact: String, resolved_rdx: Option<String> },
    /// `/leave`.
    Leave,
    /// `/help`.
    Help,
    /// `/status`.
    Status,
    /// `/peers`.
    Peers,
    /// `/sessions`.
    Sessions,
    /// `/identities`.
    Identities,
    /// `/connect <url>`.
    Connect { url: String },
    /// `/disconnect`.
    Disconnect,
    /// `/trust <peer> [alias]`. `alias` is `None` when no second argument
    /// was given; `peer` keeps the whole remainder in that case.
    Trust { peer: String, alias: Option<String> },
    /// `/verify <peer>`.
    Verify { peer: String },
    /// `/broadcast <message>`.
    Broadcast { message: String },
    /// `/mode <mode>`.
    SetMode { mode: String },
    /// `/scan`.
    Scan,
    /// `/version`.
    Version,
    /// `/publish`.
    PublishIdentity,
    /// `/unpublish`.
    UnpublishIdentity,
    /// A line beginning with `/` that matched no known command.
    Unknown { input: String },
}

/// Chat-mode-aware line parser. Holds the active chat context so plain text
/// typed while "in" a conversation is rewritten into `/send <rdx> <text>`
/// before the usual command matching runs.
#[derive(Debug, Default)]
pub struct CommandParser {
    active_chat_rdx: Option<String>,
}

impl CommandParser {
    /// A parser with no active chat context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The contact currently in chat mode, if any.
    #[must_use]
    pub fn active_chat(&self) -> Option<&str> {
        self.active_chat_rdx.as_deref()
    }

    /// Parse one line of input. `resolve_contact` looks up a contact by
    /// alias, RDX, or bus pubkey, returning its RDX on success; it is used
    /// only by `/chat`.
    pub fn parse(&mut self, input: &str, resolve_contact: impl Fn(&str) -> Option<String>) -> ParsedCommand {
        let effective = self.rewrite_for_chat_mode(input);
        self.parse_effective(&effective, resolve_contact)
    }

    fn rewrite_for_chat_mode(&self, input: &str) -> String {
        match &self.active_chat_rdx {
            Some(rdx) if !input.starts_with('/') => format!("/send {rdx} {input}"),
            _ => input.to_string(),
        }
    }

    fn parse_effective(&mut self, input: &str, resolve_contact: impl Fn(&str) -> Option<String>) -> ParsedCommand {
        if let Some(args) = input.strip_prefix("/send ") {
            return parse_send(args);
        }
        if let Some(args) = input.strip_prefix("/chat ") {
            return self.parse_chat(args, resolve_contact);
        }
        if input == "/leave" {
            self.active_chat_rdx = None;
            return ParsedCommand::Leave;
        }
        if input == "/help" {
            return ParsedCommand::Help;
        }
        if input == "/status" {
            return ParsedCommand::Status;
        }
        if input == "/peers" {
            return ParsedCommand::Peers;
        }
        if input == "/sessions" {
            return ParsedCommand::Sessions;
        }
        if let Some(url) = input.strip_prefix("/connect ") {
            return ParsedCommand::Connect { url: url.to_string() };
        }
        if input == "/disconnect" {
            return ParsedCommand::Disconnect;
        }
        if input == "/identities" {
            return ParsedCommand::Identities;
        }
        if let Some(args) = input.strip_prefix("/trust ") {
            return parse_trust(args);
        }
        if let Some(peer) = input.strip_prefix("/verify ") {
            return ParsedCommand::Verify { peer: peer.to_string() };
        }
        if let Some(message) = input.strip_prefix("/broadcast ") {
            return ParsedCommand::Broadcast { message: message.to_string() };
        }
        if let Some(mode) = input.strip_prefix("/mode ") {
            return ParsedCommand::SetMode { mode: mode.to_string() };
        }
        if input == "/scan" {
            return ParsedCommand::Scan;
        }
        if input == "/version" {
            return ParsedCommand::Version;
        }
        if input == "/publish" {
            return ParsedCommand::PublishIdentity;
        }
        if input == "/unpublish" {
            return ParsedCommand::UnpublishIdentity;
        }
        ParsedCommand::Unknown { input: input.to_string() }
    }

    fn parse_chat(&mut self, contact: &str, resolve_contact: impl Fn(&str) -> Option<String>) -> ParsedCommand {
        let contact = contact.to_string();
        let resolved_rdx = if contact.is_empty() { None } else { resolve_contact(&contact) };
        if let Some(rdx) = &resolved_rdx {
            self.active_chat_rdx = Some(rdx.clone());
        }
        ParsedCommand::Chat { contact, resolved_rdx }
    }
}

fn parse_send(args: &str) -> ParsedCommand {
    match args.split_once(' ') {
        Some((peer, message)) if !peer.is_empty() => {
            ParsedCommand::Send { peer: peer.to_string(), message: message.to_string() }
        }
        _ => ParsedCommand::Send { peer: String::new(), message: String::new() },
    }
}

fn parse_trust(args: &str) -> ParsedCommand {
    match args.split_once(' ') {
        Some((peer, alias)) => ParsedCommand::Trust { peer: peer.to_string(), alias: Some(alias.to_string()) },
        None => ParsedCommand::Trust { peer: args.to_string(), alias: None },
    }
}
