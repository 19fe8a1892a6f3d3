//! Protocol error types.

use thiserror::Error;

/// Errors that can occur while decoding a message.
///
/// Any of these is fatal for the connection that produced the bytes, never for
/// the server as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Invalid packet opcode: {0:#04x}")]
    InvalidOpcode(u8),

    #[error("Unexpected end of data")]
    UnexpectedEof,

    #[error("Unsupported protocol version: {0}")]
    UnsupportedProtocol(u8),

    #[error("Invalid {what} tag: {tag}")]
    InvalidTag { what: &'static str, tag: u8 },

    #[error("String is not valid UTF-8")]
    InvalidUtf8,

    #[error("{0} unexpected trailing bytes")]
    TrailingBytes(usize),

    #[error("Empty message")]
    Empty,
}
