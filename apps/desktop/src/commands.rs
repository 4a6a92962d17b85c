use client_core::UiAction;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Action(UiAction),
    Who,
    Help,
    Quit,
    Unknown(String),
}

pub const HELP: &str = "\
/host [channel]   join as host and publish camera + microphone
/watch [channel]  join as audience
/leave            leave the channel
/who              list remote participants
/quit             leave and exit
anything else is sent to the chat";

/// Parses one line of input. Blank lines yield `None`.
pub fn parse_line(line: &str, default_channel: &str, display_name: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Some(Command::Action(UiAction::SendMessage {
            content: line.to_string(),
        }));
    };

    let mut parts = rest.splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or_default();
    let channel = parts
        .next()
        .map(str::trim)
        .filter(|channel| !channel.is_empty())
        .unwrap_or(default_channel)
        .to_string();
    let display_name = display_name.to_string();

    Some(match name {
        "host" => Command::Action(UiAction::JoinAsHost {
            channel,
            display_name,
        }),
        "watch" => Command::Action(UiAction::JoinAsAudience {
            channel,
            display_name,
        }),
        "leave" => Command::Action(UiAction::Leave),
        "who" => Command::Who,
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => Command::Unknown(other.to_string()),
    })
}
