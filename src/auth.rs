//! SASL authenticators used during the `Start`/`StartOk` handshake.
//!
//! # Examples
//!
//! ```rust
//! use dumq_amqp::auth::{Authenticator, PlainAuthenticator};
//!
//! let auth = PlainAuthenticator::new("guest", "guest");
//! assert_eq!(auth.mechanism_name(), "PLAIN");
//! let response = auth.response_bytes(&[]);
//! assert_eq!(response, b"\0guest\0guest");
//! ```

use bytes::BytesMut;

use crate::codec::write_table_entries_unframed;
use crate::value::FieldValue;

/// Pluggable SASL authenticator consulted when answering the
/// server's `Connection.Start`.
pub trait Authenticator: std::fmt::Debug {
    /// The mechanism name advertised in `StartOk` (e.g. `"PLAIN"`).
    fn mechanism_name(&self) -> &str;

    /// The opaque response bytes for the given challenge. Built-in
    /// mechanisms ignore `challenge` (neither needs a second
    /// round-trip), but it is threaded through for mechanisms that do.
    fn response_bytes(&self, challenge: &[u8]) -> Vec<u8>;
}

/// RFC 4616 `PLAIN` mechanism: `NUL authzid NUL authcid NUL passwd`,
/// with an always-empty `authzid`.
#[derive(Debug, Clone)]
pub struct PlainAuthenticator {
    username: Vec<u8>,
    password: Vec<u8>,
}

impl PlainAuthenticator {
    pub fn new(username: impl Into<Vec<u8>>, password: impl Into<Vec<u8>>) -> Self {
        PlainAuthenticator { username: username.into(), password: password.into() }
    }
}

impl Authenticator for PlainAuthenticator {
    fn mechanism_name(&self) -> &str {
        "PLAIN"
    }

    fn response_bytes(&self, _challenge: &[u8]) -> Vec<u8> {
        let mut result = Vec::with_capacity(1 + self.username.len() + 1 + self.password.len());
        result.push(0u8);
        result.extend_from_slice(&self.username);
        result.push(0u8);
        result.extend_from_slice(&self.password);
        result
    }
}

/// The `AMQPLAIN` mechanism: a field table with `LOGIN`/`PASSWORD`
/// entries, embedded **without** its own leading u32 length prefix —
/// the outer long-string response already carries the total length,
/// so duplicating it would be redundant on the wire. Stripping it is
/// required for broker compatibility, not an artifact to clean up.
#[derive(Debug, Clone)]
pub struct AmqplainAuthenticator {
    username: Vec<u8>,
    password: Vec<u8>,
}

impl AmqplainAuthenticator {
    pub fn new(username: impl Into<Vec<u8>>, password: impl Into<Vec<u8>>) -> Self {
        AmqplainAuthenticator { username: username.into(), password: password.into() }
    }
}

impl Authenticator for AmqplainAuthenticator {
    fn mechanism_name(&self) -> &str {
        "AMQPLAIN"
    }

    fn response_bytes(&self, _challenge: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        write_table_entries_unframed(
            &mut buf,
            &[
                ("LOGIN", FieldValue::LongString(self.username.clone())),
                ("PASSWORD", FieldValue::LongString(self.password.clone())),
            ],
        )
        .expect("LOGIN/PASSWORD keys and long-string values always encode");
        buf.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_authenticator_response_shape() {
        let auth = PlainAuthenticator::new("guest", "s3cr3t");
        assert_eq!(auth.mechanism_name(), "PLAIN");
        assert_eq!(auth.response_bytes(&[]), b"\0guest\0s3cr3t");
    }

    #[test]
    fn amqplain_authenticator_has_no_outer_length_prefix() {
        let auth = AmqplainAuthenticator::new("guest", "guest");
        let response = auth.response_bytes(&[]);
        // First byte is the LOGIN key's short-string length, not a u32 length prefix.
        assert_eq!(response[0] as usize, "LOGIN".len());
        assert_eq!(&response[1..6], b"LOGIN");
    }
}
