//! Command line parsing and dispatch (§4.7).

mod handler;
mod parser;

pub use handler::CommandHandler;
pub use parser::{CommandParser, ParsedCommand};
