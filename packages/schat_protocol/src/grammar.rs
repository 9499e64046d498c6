//! Command-line grammar for typed chat input.
//!
//! ```text
//! message := '/' command ws+ target* body | plain-text
//! command := "text" | "file" | "quit"
//! target  := ('@' | '!') username ws+
//! ```
//!
//! Targets are read only from the front of the argument list and must all
//! use the same marker: `@` names the single unicast recipient, `!` names
//! blockcast exclusions. No targets means broadcast. A line that does not
//! start with `/` is a text broadcast of the whole line.

use crate::error::ParseError;
use crate::message::{Message, MessageKind, Routing};
use crate::name::validate_display_name;

const UNICAST_MARKER: char = '@';
const BLOCKCAST_MARKER: char = '!';

/// Parse one line of user input. `from` is left empty for the caller to fill.
pub fn parse_line(line: &str) -> Result<Message, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ParseError::EmptyMessage);
    }
    if !line.starts_with('/') {
        return Ok(routed(MessageKind::TextBroadcast, Vec::new(), line.to_string()));
    }

    let mut tokens = line.split_whitespace();
    let command = tokens.next().unwrap_or_default();
    let kind_for: fn(Routing) -> MessageKind = match &command[1..] {
        "quit" => return Ok(Message::quit()),
        "text" => MessageKind::text,
        "file" => MessageKind::file,
        _ => return Err(ParseError::UnknownCommand(command.to_string())),
    };

    let args: Vec<&str> = tokens.collect();
    if args.is_empty() {
        return Err(ParseError::EmptyMessage);
    }

    let mut marker = None;
    let mut targets: Vec<String> = Vec::new();
    let mut consumed = 0;
    for token in &args {
        let Some(m) = token
            .chars()
            .next()
            .filter(|c| *c == UNICAST_MARKER || *c == BLOCKCAST_MARKER)
        else {
            break;
        };
        if marker.is_some_and(|seen| seen != m) {
            return Err(ParseError::MixedMarkers);
        }
        marker = Some(m);

        let name = &token[m.len_utf8()..];
        if name.is_empty() {
            return Err(ParseError::EmptyTarget(m));
        }
        if validate_display_name(name).is_err() {
            return Err(ParseError::InvalidTarget(name.to_string()));
        }
        if !targets.iter().any(|t| t == name) {
            targets.push(name.to_string());
        }
        consumed += 1;
    }

    let body = args[consumed..].join(" ");
    if body.is_empty() {
        return Err(ParseError::EmptyBody);
    }

    let routing = match marker {
        None => Routing::Broadcast,
        Some(UNICAST_MARKER) if targets.len() == 1 => Routing::Unicast,
        Some(UNICAST_MARKER) => return Err(ParseError::MultipleUnicastTargets(targets.len())),
        Some(_) => Routing::Blockcast,
    };

    Ok(routed(kind_for(routing), targets, body))
}

fn routed(kind: MessageKind, to: Vec<String>, body: String) -> Message {
    Message {
        kind,
        from: String::new(),
        to,
        body,
        payload_size: None,
    }
}
