//! Terminal front ends for both transports.

mod conversation;
mod session;

pub use conversation::conversation_command;
pub use session::session_command;

use parley_core::{Direction, Message, Rejection, SendOutcome};

/// One line of terminal input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineCommand {
    /// `/to ID` (ESM recipient)
    To(String),
    /// `/open ID` (PCS conversation)
    Open(String),
    /// `/list`
    List,
    /// `/time`
    Time,
    /// `/quit`
    Quit,
    /// `/help`
    Help,
    /// Anything that is not a command is a message draft.
    Draft(String),
    Unknown(String),
}

/// Parse a stdin line. Empty lines yield `None`.
pub fn parse_line(line: &str) -> Option<LineCommand> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return None;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Some(LineCommand::Draft(line.to_string()));
    };

    let (cmd, arg) = match rest.split_once(char::is_whitespace) {
        Some((cmd, arg)) => (cmd, arg.trim()),
        None => (rest, ""),
    };
    Some(match (cmd, arg) {
        ("to", id) if !id.is_empty() => LineCommand::To(id.to_string()),
        ("open", id) if !id.is_empty() => LineCommand::Open(id.to_string()),
        ("list", _) => LineCommand::List,
        ("time", _) => LineCommand::Time,
        ("quit" | "exit", _) => LineCommand::Quit,
        ("help", _) => LineCommand::Help,
        _ => LineCommand::Unknown(line.to_string()),
    })
}

/// Render one log entry: own messages under `self_label`, others as `De {from}`.
pub fn render_entry(message: &Message, self_label: &str) -> String {
    match message.direction {
        Direction::Sent => format!("{}: {}", self_label, message.text),
        Direction::Received => format!("De {}: {}", message.from, message.text),
    }
}

/// User-facing text for an undelivered send, if any.
pub fn describe_outcome(outcome: &SendOutcome) -> Option<String> {
    match outcome {
        SendOutcome::Dispatched { .. } => None,
        SendOutcome::Rejected { reason } => Some(
            match reason {
                Rejection::EmptyRecipient => "Defina o destinatário com /to ID",
                Rejection::EmptyText => "Mensagem vazia",
                Rejection::NotConnected => "Sem conexão com o servidor",
                Rejection::NoConversation => "Nenhuma conversa aberta; use /open ID",
            }
            .to_string(),
        ),
        SendOutcome::Failed { detail } => Some(format!("Mensagem não enviada: {detail}")),
    }
}
