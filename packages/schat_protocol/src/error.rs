//! Error types for grammar parsing, display names, and wire framing.

/// Why a typed command line could not become a [`Message`](crate::Message).
///
/// Parse errors are local to the sending client: they are shown to the
/// user as a warning and never reach the wire.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty message")]
    EmptyMessage,

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("cannot mix '@' recipients and '!' exclusions in one message")]
    MixedMarkers,

    #[error("message has no body")]
    EmptyBody,

    #[error("'{0}' is missing a username")]
    EmptyTarget(char),

    #[error("invalid recipient name: {0}")]
    InvalidTarget(String),

    #[error("unicast takes exactly one '@' recipient, got {0}")]
    MultipleUnicastTargets(usize),
}

impl ParseError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::EmptyMessage => "empty_message",
            Self::UnknownCommand(_) => "unknown_command",
            Self::MixedMarkers => "mixed_markers",
            Self::EmptyBody => "empty_body",
            Self::EmptyTarget(_) => "empty_target",
            Self::InvalidTarget(_) => "invalid_target",
            Self::MultipleUnicastTargets(_) => "multiple_unicast_targets",
        }
    }
}

/// Why a display name cannot be claimed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    #[error("display name is empty")]
    Empty,

    #[error("display name is longer than {max} characters")]
    TooLong { max: usize },

    #[error("display name contains whitespace")]
    Whitespace,

    #[error("display name cannot start with '{0}'")]
    ReservedPrefix(char),
}

/// Errors reading or writing frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame too large: {len} bytes (max {max})")]
    TooLarge { len: usize, max: usize },

    #[error("undecodable frame: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("malformed message: {0}")]
    Malformed(String),
}

impl FrameError {
    /// Whether the stream is still frame-aligned after this error.
    ///
    /// A decode failure consumed exactly one length-prefixed frame, so the
    /// next read starts on a boundary. I/O failures and oversized prefixes
    /// leave the stream in an unknown position.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::Malformed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes() {
        assert_eq!(ParseError::EmptyMessage.error_code(), "empty_message");
        assert_eq!(ParseError::MixedMarkers.error_code(), "mixed_markers");
        assert_eq!(
            ParseError::UnknownCommand("/nope".into()).error_code(),
            "unknown_command"
        );
        assert_eq!(
            ParseError::MultipleUnicastTargets(2).error_code(),
            "multiple_unicast_targets"
        );
    }

    #[test]
    fn recoverable_frame_errors() {
        let decode = serde_json::from_str::<u32>("nope").unwrap_err();
        assert!(FrameError::Decode(decode).is_recoverable());
        assert!(FrameError::Malformed("x".into()).is_recoverable());
        assert!(!FrameError::TooLarge { len: 10, max: 1 }.is_recoverable());
        let io = std::io::Error::from(std::io::ErrorKind::UnexpectedEof);
        assert!(!FrameError::Io(io).is_recoverable());
    }
}
