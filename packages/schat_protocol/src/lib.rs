//! Message model, command grammar, and wire framing for the schat relay.
//!
//! Everything here is transport-agnostic: the framing helpers work over any
//! `AsyncRead`/`AsyncWrite`, so the same code drives TCP sockets in the
//! server and client and in-memory duplex pipes in tests.
//!
//! # Example
//!
//! ```
//! use schat_protocol::{MessageKind, parse_line};
//!
//! let msg = parse_line("/text @bob hi there").unwrap();
//! assert_eq!(msg.kind, MessageKind::TextUnicast);
//! assert_eq!(msg.to, vec!["bob".to_string()]);
//! assert_eq!(msg.body, "hi there");
//! ```

pub mod error;
pub mod framing;
pub mod grammar;
pub mod message;
pub mod name;

pub use error::{FrameError, ParseError};
pub use framing::{MAX_CHUNK_SIZE, MAX_FRAME_SIZE, decode, encode, read_frame, write_frame};
pub use grammar::parse_line;
pub use message::{ACK_ACCEPTED, ACK_REJECTED, Message, MessageKind, Routing};
pub use name::{MAX_NAME_LEN, validate_display_name};
