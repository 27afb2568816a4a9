//! Slash command parsing for the chat application.
//!
//! This module handles parsing of special commands that start with `/`,
//! allowing users to control the chat session without sending messages
//! to the tutor.

/// A parsed chat command.
///
/// These commands control the chat session and are not sent to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    /// Display help information.
    Help,

    /// Exit the chat application.
    Quit,

    /// List the case study's checkpoints and their completion.
    Checkpoints,

    /// Show the case study's context materials.
    Context,

    /// Show the case study's learning objectives.
    Objectives,

    /// Switch the checkpoint new messages are tagged with.
    /// `None` clears it.
    Checkpoint(Option<String>),

    /// Explicitly mark a checkpoint complete.
    Complete(String),

    /// Reload the conversation from the server.
    Reload,

    /// Print the conversation so far.
    History,

    /// Show session status (id, message count, progress).
    Status,

    /// Report a parsing error back to the caller.
    Invalid(String),
}

/// Parses user input for slash commands.
///
/// Returns `Some(ChatCommand)` if the input is a valid command,
/// or `None` if it should be treated as a regular message.
///
/// # Examples
///
/// ```
/// # use casebreaker::chat::parse_command;
/// assert!(parse_command("/quit").is_some());
/// assert!(parse_command("/checkpoint cp2").is_some());
/// assert!(parse_command("What was the ruling?").is_none());
/// ```
pub fn parse_command(input: &str) -> Option<ChatCommand> {
    let input = input.trim();

    let rest = input.strip_prefix('/')?;
    let mut parts = rest.splitn(2, ' ');
    let command = parts.next()?.to_lowercase();
    let argument = parts.next().map(|s| s.trim()).filter(|s| !s.is_empty());

    let result = match command.as_str() {
        "help" | "?" => ChatCommand::Help,
        "quit" | "exit" | "q" => ChatCommand::Quit,
        "checkpoints" | "progress" => ChatCommand::Checkpoints,
        "context" => ChatCommand::Context,
        "objectives" => ChatCommand::Objectives,
        "checkpoint" => match argument {
            Some(arg) if arg.eq_ignore_ascii_case("clear") => ChatCommand::Checkpoint(None),
            Some(arg) => ChatCommand::Checkpoint(Some(arg.to_string())),
            None => ChatCommand::Invalid("/checkpoint requires a checkpoint id".to_string()),
        },
        "complete" => match argument {
            Some(arg) => ChatCommand::Complete(arg.to_string()),
            None => ChatCommand::Invalid("/complete requires a checkpoint id".to_string()),
        },
        "reload" => ChatCommand::Reload,
        "history" => ChatCommand::History,
        "status" | "stats" => ChatCommand::Status,
        _ => ChatCommand::Invalid(format!("Unknown command: /{}", command)),
    };

    Some(result)
}

/// Returns help text describing available commands.
pub fn help_text() -> &'static str {
    r#"Available commands:
  /checkpoints           List checkpoints and which are complete
  /checkpoint <id>       Tag new messages with a checkpoint (or 'clear')
  /complete <id>         Mark a checkpoint complete
  /context               Show background, key concepts and reading
  /objectives            Show the learning objectives
  /history               Print the conversation so far
  /reload                Reload the conversation from the server
  /status                Show session status
  /help                  Show this help message
  /quit                  Exit the chat"#
}
