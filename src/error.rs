//! AMQP 0-9-1 error handling.
//!
//! This module defines the error taxonomy surfaced by every public
//! operation in the crate, plus the internal codec error used at the
//! field/frame encoding boundary.
//!
//! # Examples
//!
//! ```rust
//! use dumq_amqp::error::{AmqpError, AmqpResult};
//!
//! fn handle(result: AmqpResult<()>) {
//!     match result {
//!         Ok(()) => {}
//!         Err(AmqpError::ChannelClosed { code, reply_text }) => {
//!             eprintln!("channel closed: {} {}", code, reply_text);
//!         }
//!         Err(e) => eprintln!("amqp error: {}", e),
//!     }
//! }
//! ```

use thiserror::Error;

/// Top-level error type returned by every public operation.
#[derive(Error, Debug)]
pub enum AmqpError {
    /// Transport failure: connection reset, TLS handshake failure, etc.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed frame, unexpected frame, bad end-octet.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Channel was closed, by either peer.
    #[error("channel closed: {code} {reply_text}")]
    ChannelClosed { code: u16, reply_text: String },

    /// Connection was closed, by either peer.
    #[error("connection closed: {code} {reply_text}")]
    ConnectionClosed { code: u16, reply_text: String },

    /// Only raised internally by the heartbeat watchdog and by
    /// connect-time timeouts.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Local precondition failure before any bytes were sent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Future cancelled by the caller.
    #[error("cancelled")]
    Cancelled,
}

/// Result type for AMQP operations.
pub type AmqpResult<T> = Result<T, AmqpError>;

impl AmqpError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        AmqpError::Protocol(msg.into())
    }

    pub fn channel_closed(code: u16, reply_text: impl Into<String>) -> Self {
        AmqpError::ChannelClosed { code, reply_text: reply_text.into() }
    }

    pub fn connection_closed(code: u16, reply_text: impl Into<String>) -> Self {
        AmqpError::ConnectionClosed { code, reply_text: reply_text.into() }
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        AmqpError::Timeout(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        AmqpError::InvalidArgument(msg.into())
    }

    /// True for errors that escalate to tearing down the whole
    /// connection rather than just one channel.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, AmqpError::Io(_) | AmqpError::ConnectionClosed { .. })
    }
}

impl From<CodecError> for AmqpError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Incomplete => AmqpError::Protocol("incomplete frame".to_string()),
            other => AmqpError::Protocol(other.to_string()),
        }
    }
}

/// Errors raised by the field and frame codec.
///
/// `Incomplete` is not a failure: it tells a buffered reader that more
/// bytes are needed before a value/frame can be parsed, and must never
/// propagate past `frame::read_frame`'s caller as an error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("not enough bytes buffered yet")]
    Incomplete,

    #[error("value truncated: expected {needed} more byte(s), found {available}")]
    Truncated { needed: usize, available: usize },

    #[error("unrecognized type tag: {0:#04x}")]
    InvalidTag(u8),

    #[error("string exceeds maximum length: {0} bytes")]
    StringTooLong(usize),

    #[error("value would overflow the destination buffer")]
    BufferOverflow,

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: &'static str, found: &'static str },

    #[error("frame end octet invalid: expected 0xCE, found {0:#04x}")]
    BadFrameEnd(u8),

    #[error("frame size {size} exceeds max_frame_size {max}")]
    FrameTooLarge { size: u32, max: u32 },

    #[error("unknown class/method pair: ({0}, {1})")]
    UnknownMethod(u16, u16),
}
