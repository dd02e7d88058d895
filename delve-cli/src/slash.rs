//! Slash commands understood by the interactive loop.

use std::path::PathBuf;

/// A parsed `/command` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    /// Print the latest report, or save it when a path is given.
    Report(Option<PathBuf>),
    /// Print a JSON snapshot of the session.
    Status,
    /// Discard the session and start over.
    Reset,
    Help,
    Quit,
    Unknown(String),
}

/// Usage lines shown by `/help`.
pub const HELP: &[(&str, &str)] = &[
    ("/report [path]", "Print the latest report, or save it to a file"),
    ("/status", "Show the session state as JSON"),
    ("/reset", "Discard the session and start a new one"),
    ("/help", "Show this help"),
    ("/quit", "Exit (aliases: /exit, /q)"),
];

/// Parse a line starting with `/`. Returns `None` for ordinary input.
pub fn parse(line: &str) -> Option<SlashCommand> {
    let line = line.trim();
    let rest = line.strip_prefix('/')?;
    let mut parts = rest.splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or_default();
    let arg = parts.next().map(str::trim).filter(|a| !a.is_empty());

    Some(match name {
        "report" => SlashCommand::Report(arg.map(PathBuf::from)),
        "status" => SlashCommand::Status,
        "reset" => SlashCommand::Reset,
        "help" | "?" => SlashCommand::Help,
        "quit" | "exit" | "q" => SlashCommand::Quit,
        other => SlashCommand::Unknown(other.to_string()),
    })
}
