//! Terminal presentation: parse what the user types, format what arrives.

use chorus_core::EngineMode;
use chorus_proto::{EventKind, Payload};

use crate::fanout::ClientOutput;

/// Prompt shown while waiting for input.
pub const PROMPT: &str = "-> ";

/// One line of user input, interpreted for the replica mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Submit to every replica.
    Publish(Payload),
    /// Leave and exit.
    Quit,
    /// Not understood; the text explains what is expected.
    Invalid(String),
}

/// Interpret a line. Blank lines yield `None`.
///
/// Auction mode accepts `bid N`, a bare positive amount, `result`, or `0`
/// (which also asks for the result).
pub fn parse_input(line: &str, mode: EngineMode) -> Option<Input> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if line == "/quit" {
        return Some(Input::Quit);
    }

    let input = match mode {
        EngineMode::Chat => Input::Publish(Payload::Text(line.to_string())),
        EngineMode::Auction => parse_auction(line),
    };
    Some(input)
}

fn parse_auction(line: &str) -> Input {
    if line.eq_ignore_ascii_case("result") {
        return Input::Publish(Payload::Empty);
    }

    let amount = line
        .strip_prefix("bid ")
        .or_else(|| line.strip_prefix("BID "))
        .unwrap_or(line)
        .trim();
    match amount.parse::<u64>() {
        Ok(0) => Input::Publish(Payload::Empty),
        Ok(amount) => Input::Publish(Payload::Amount(amount)),
        Err(_) => Input::Invalid(format!("expected `bid <amount>` or `result`, got {line:?}")),
    }
}

/// Format one output item as a single line (no trailing newline).
pub fn render(output: &ClientOutput) -> String {
    match output {
        ClientOutput::Event { event, local_time, .. } => {
            let body = match (&event.kind, &event.payload) {
                (_, Payload::Text(text)) => text.clone(),
                (_, Payload::Notice(notice)) => notice.to_string(),
                (_, Payload::Amount(amount)) => format!("bid {amount}"),
                (EventKind::ResultQuery, Payload::Empty) => "asked for the result".to_string(),
                (_, Payload::Empty) => String::new(),
            };

            match event.logical_time {
                Some(_) => format!("Lamport: {} | {}: {}", local_time, event.sender_id, body),
                None => format!("{}: {}", event.sender_id, body),
            }
        },
        ClientOutput::ReplicaDown { replica, reason } => {
            format!("! lost replica {replica}: {reason}")
        },
    }
}
