//! Parsing of the free-text command surface.

/// What a line of user input asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandRequest {
    /// Blank input.
    Usage,
    /// Start a pipeline for the given feature description.
    Start(String),
    /// Cancel the in-flight run; takes effect only when `confirmed`.
    Cancel { confirmed: bool },
}

/// Parse command arguments.
///
/// `cancel` and `cancel confirm` (or `cancel --confirm`) are reserved, case
/// insensitive. Any other text, including `cancel` followed by something else,
/// is a feature description.
pub fn parse_command(args: &str) -> CommandRequest {
    let trimmed = args.trim();
    if trimmed.is_empty() {
        return CommandRequest::Usage;
    }

    let lowered = trimmed.to_lowercase();
    let tokens: Vec<&str> = lowered.split_whitespace().collect();
    match tokens.as_slice() {
        ["cancel"] => CommandRequest::Cancel { confirmed: false },
        ["cancel", "confirm" | "--confirm"] => CommandRequest::Cancel { confirmed: true },
        _ => CommandRequest::Start(trimmed.to_string()),
    }
}
