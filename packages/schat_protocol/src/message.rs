//! The message model shared by server and client.

use serde::{Deserialize, Serialize};

use crate::error::FrameError;
use crate::name::validate_display_name;

/// IntroAck body when the requested name was claimed.
pub const ACK_ACCEPTED: &str = "accepted";
/// IntroAck body when the requested name is already taken or invalid.
pub const ACK_REJECTED: &str = "rejected";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// Client asks to claim the display name in `from`.
    Introduction,
    /// Server answers an Introduction; body is `accepted` or `rejected`.
    IntroAck,
    Quit,
    /// Session closed for inactivity.
    Timeout,
    /// Server-to-client informational text. Never routed.
    Notice,
    TextUnicast,
    TextBroadcast,
    TextBlockcast,
    FileUnicast,
    FileBroadcast,
    FileBlockcast,
}

/// How a routed message picks its recipients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Routing {
    /// Exactly the single name in `to`.
    Unicast,
    /// Everyone but the sender.
    Broadcast,
    /// Everyone but the sender and the names in `to`.
    Blockcast,
}

impl MessageKind {
    pub fn text(routing: Routing) -> Self {
        match routing {
            Routing::Unicast => Self::TextUnicast,
            Routing::Broadcast => Self::TextBroadcast,
            Routing::Blockcast => Self::TextBlockcast,
        }
    }

    pub fn file(routing: Routing) -> Self {
        match routing {
            Routing::Unicast => Self::FileUnicast,
            Routing::Broadcast => Self::FileBroadcast,
            Routing::Blockcast => Self::FileBlockcast,
        }
    }

    /// Routing class, or `None` for control kinds.
    pub fn routing(self) -> Option<Routing> {
        match self {
            Self::TextUnicast | Self::FileUnicast => Some(Routing::Unicast),
            Self::TextBroadcast | Self::FileBroadcast => Some(Routing::Broadcast),
            Self::TextBlockcast | Self::FileBlockcast => Some(Routing::Blockcast),
            _ => None,
        }
    }

    pub fn is_text(self) -> bool {
        matches!(
            self,
            Self::TextUnicast | Self::TextBroadcast | Self::TextBlockcast
        )
    }

    pub fn is_file(self) -> bool {
        matches!(
            self,
            Self::FileUnicast | Self::FileBroadcast | Self::FileBlockcast
        )
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// One control message. File kinds are followed on the wire by exactly
/// `payload_size` raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub kind: MessageKind,
    #[serde(default)]
    pub from: String,
    /// Unicast: the one recipient. Blockcast: names to exclude.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to: Vec<String>,
    /// Free text, or the file name for file kinds.
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_size: Option<u64>,
}

impl Message {
    fn control(kind: MessageKind, body: impl Into<String>) -> Self {
        Self {
            kind,
            from: String::new(),
            to: Vec::new(),
            body: body.into(),
            payload_size: None,
        }
    }

    pub fn introduction(name: impl Into<String>) -> Self {
        Self {
            from: name.into(),
            ..Self::control(MessageKind::Introduction, "")
        }
    }

    pub fn intro_ack(accepted: bool) -> Self {
        let body = if accepted { ACK_ACCEPTED } else { ACK_REJECTED };
        Self::control(MessageKind::IntroAck, body)
    }

    pub fn quit() -> Self {
        Self::control(MessageKind::Quit, "")
    }

    pub fn timeout(reason: impl Into<String>) -> Self {
        Self::control(MessageKind::Timeout, reason)
    }

    pub fn notice(text: impl Into<String>) -> Self {
        Self::control(MessageKind::Notice, text)
    }

    /// An IntroAck carrying `accepted`.
    pub fn is_accepted(&self) -> bool {
        self.kind == MessageKind::IntroAck && self.body == ACK_ACCEPTED
    }

    /// Payload bytes following this frame on the wire (zero for control kinds).
    pub fn payload_len(&self) -> u64 {
        self.payload_size.unwrap_or(0)
    }

    /// Copy as a recipient sees it: sender stamped, recipient list stripped.
    pub fn for_delivery(&self, from: &str) -> Self {
        Self {
            kind: self.kind,
            from: from.to_string(),
            to: Vec::new(),
            body: self.body.clone(),
            payload_size: self.payload_size,
        }
    }

    /// Check that `kind` and the shape of `to`/`body`/`payload_size` agree.
    ///
    /// The grammar only produces valid messages; frames read off the wire
    /// must be checked before they are acted on.
    pub fn validate(&self) -> Result<(), FrameError> {
        let malformed = |why: String| Err(FrameError::Malformed(why));

        if let Some(routing) = self.kind.routing() {
            if self.body.trim().is_empty() {
                return malformed(format!("{} without a body", self.kind));
            }
            match routing {
                Routing::Unicast if self.to.len() != 1 => {
                    return malformed(format!(
                        "{} needs exactly one recipient, got {}",
                        self.kind,
                        self.to.len()
                    ));
                }
                Routing::Broadcast if !self.to.is_empty() => {
                    return malformed(format!("{} cannot name recipients", self.kind));
                }
                _ => {}
            }
            if let Some(bad) = self.to.iter().find(|n| validate_display_name(n).is_err()) {
                return malformed(format!("invalid recipient name {bad:?}"));
            }
            return match (self.kind.is_file(), self.payload_size) {
                (true, None) => malformed(format!("{} without payload size", self.kind)),
                (false, Some(_)) => malformed(format!("{} cannot carry a payload", self.kind)),
                _ => Ok(()),
            };
        }

        if self.payload_size.is_some() {
            return malformed(format!("{} cannot carry a payload", self.kind));
        }
        match self.kind {
            MessageKind::Introduction => validate_display_name(&self.from)
                .or_else(|e| malformed(format!("introduction: {e}"))),
            MessageKind::IntroAck if self.body != ACK_ACCEPTED && self.body != ACK_REJECTED => {
                malformed(format!("unexpected IntroAck body {:?}", self.body))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn routed(kind: MessageKind, to: &[&str], body: &str, size: Option<u64>) -> Message {
        Message {
            kind,
            from: "alice".into(),
            to: to.iter().map(|s| s.to_string()).collect(),
            body: body.into(),
            payload_size: size,
        }
    }

    #[test]
    fn routing_classes() {
        assert_eq!(MessageKind::FileBlockcast.routing(), Some(Routing::Blockcast));
        assert_eq!(MessageKind::TextUnicast.routing(), Some(Routing::Unicast));
        assert_eq!(MessageKind::IntroAck.routing(), None);
        assert_eq!(MessageKind::text(Routing::Broadcast), MessageKind::TextBroadcast);
        assert_eq!(MessageKind::file(Routing::Unicast), MessageKind::FileUnicast);
    }

    #[test]
    fn well_formed_messages_validate() {
        assert!(routed(MessageKind::TextUnicast, &["bob"], "hi", None).validate().is_ok());
        assert!(routed(MessageKind::TextBroadcast, &[], "hi", None).validate().is_ok());
        assert!(routed(MessageKind::TextBlockcast, &[], "hi", None).validate().is_ok());
        assert!(
            routed(MessageKind::FileBlockcast, &["c", "d"], "a.txt", Some(0))
                .validate()
                .is_ok()
        );
        assert!(Message::introduction("alice").validate().is_ok());
        assert!(Message::intro_ack(false).validate().is_ok());
        assert!(Message::quit().validate().is_ok());
    }

    #[test]
    fn shape_mismatches_are_rejected() {
        let cases = [
            routed(MessageKind::TextUnicast, &[], "hi", None),
            routed(MessageKind::TextUnicast, &["a", "b"], "hi", None),
            routed(MessageKind::TextBroadcast, &["a"], "hi", None),
            routed(MessageKind::TextBroadcast, &[], "  ", None),
            routed(MessageKind::TextBroadcast, &[], "hi", Some(3)),
            routed(MessageKind::FileUnicast, &["bob"], "a.txt", None),
            routed(MessageKind::TextBlockcast, &["@bob"], "hi", None),
            Message::introduction("two words"),
            Message {
                payload_size: Some(1),
                ..Message::quit()
            },
            Message {
                body: "maybe".into(),
                ..Message::intro_ack(true)
            },
        ];
        for msg in cases {
            assert!(
                matches!(msg.validate(), Err(FrameError::Malformed(_))),
                "{msg:?} should be malformed"
            );
        }
    }

    #[test]
    fn delivery_copy_strips_recipients() {
        let msg = routed(MessageKind::FileBlockcast, &["c"], "a.txt", Some(9));
        let out = msg.for_delivery("server-side-alice");
        assert_eq!(out.from, "server-side-alice");
        assert!(out.to.is_empty());
        assert_eq!(out.payload_size, Some(9));
        assert_eq!(out.body, "a.txt");
    }

    #[test]
    fn intro_ack_bodies() {
        assert!(Message::intro_ack(true).is_accepted());
        assert!(!Message::intro_ack(false).is_accepted());
        assert_eq!(Message::intro_ack(false).body, ACK_REJECTED);
    }
}
