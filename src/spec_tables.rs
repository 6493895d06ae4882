//! Static AMQP 0-9-1 class/method tables.
//!
//! Every `(class_id, method_id)` pair this client recognizes maps to
//! an ordered list of [`ArgKind`]s describing how to encode or decode
//! its argument block (method frames) or property list (content
//! headers, `basic_properties::KINDS`). The table is the single
//! source of truth consulted by both the encoder (arity + native
//! type) and the decoder (how many fields, of what kind).
//!
//! # Examples
//!
//! ```rust
//! use dumq_amqp::spec_tables::{self, class, basic};
//!
//! let kinds = spec_tables::method_arg_kinds(class::BASIC, basic::PUBLISH).unwrap();
//! assert_eq!(kinds.len(), 4);
//! ```

use crate::codec::ArgKind;

/// Class IDs (AMQP 0-9-1 §1.4, extended with RabbitMQ's Confirm
/// class).
pub mod class {
    pub const CONNECTION: u16 = 10;
    pub const CHANNEL: u16 = 20;
    pub const EXCHANGE: u16 = 40;
    pub const QUEUE: u16 = 50;
    pub const BASIC: u16 = 60;
    pub const CONFIRM: u16 = 85;
    pub const TX: u16 = 90;
}

pub mod connection {
    pub const START: u16 = 10;
    pub const START_OK: u16 = 11;
    pub const SECURE: u16 = 20;
    pub const SECURE_OK: u16 = 21;
    pub const TUNE: u16 = 30;
    pub const TUNE_OK: u16 = 31;
    pub const OPEN: u16 = 40;
    pub const OPEN_OK: u16 = 41;
    pub const CLOSE: u16 = 50;
    pub const CLOSE_OK: u16 = 51;
}

pub mod channel {
    pub const OPEN: u16 = 10;
    pub const OPEN_OK: u16 = 11;
    pub const FLOW: u16 = 20;
    pub const FLOW_OK: u16 = 21;
    pub const CLOSE: u16 = 40;
    pub const CLOSE_OK: u16 = 41;
}

pub mod exchange {
    pub const DECLARE: u16 = 10;
    pub const DECLARE_OK: u16 = 11;
    pub const DELETE: u16 = 20;
    pub const DELETE_OK: u16 = 21;
    pub const BIND: u16 = 30;
    pub const BIND_OK: u16 = 31;
    pub const UNBIND: u16 = 40;
    pub const UNBIND_OK: u16 = 51;
}

pub mod queue {
    pub const DECLARE: u16 = 10;
    pub const DECLARE_OK: u16 = 11;
    pub const BIND: u16 = 20;
    pub const BIND_OK: u16 = 21;
    pub const PURGE: u16 = 30;
    pub const PURGE_OK: u16 = 31;
    pub const DELETE: u16 = 40;
    pub const DELETE_OK: u16 = 41;
    pub const UNBIND: u16 = 50;
    pub const UNBIND_OK: u16 = 51;
}

pub mod basic {
    pub const QOS: u16 = 10;
    pub const QOS_OK: u16 = 11;
    pub const CONSUME: u16 = 20;
    pub const CONSUME_OK: u16 = 21;
    pub const CANCEL: u16 = 30;
    pub const CANCEL_OK: u16 = 31;
    pub const PUBLISH: u16 = 40;
    pub const RETURN: u16 = 50;
    pub const DELIVER: u16 = 60;
    pub const GET: u16 = 70;
    pub const GET_OK: u16 = 71;
    pub const GET_EMPTY: u16 = 72;
    pub const ACK: u16 = 80;
    pub const REJECT: u16 = 90;
    pub const RECOVER_ASYNC: u16 = 100;
    pub const RECOVER: u16 = 110;
    pub const RECOVER_OK: u16 = 111;
    /// RabbitMQ extension, not part of the base AMQP 0-9-1 spec.
    pub const NACK: u16 = 120;
}

pub mod confirm {
    /// RabbitMQ extension class. `SELECT`/`SELECT_OK` are routed
    /// through the same correlation FIFO as any other synchronous
    /// method (see `channel.rs`).
    pub const SELECT: u16 = 10;
    pub const SELECT_OK: u16 = 11;
}

pub mod tx {
    pub const SELECT: u16 = 10;
    pub const SELECT_OK: u16 = 11;
    pub const COMMIT: u16 = 20;
    pub const COMMIT_OK: u16 = 21;
    pub const ROLLBACK: u16 = 30;
    pub const ROLLBACK_OK: u16 = 31;
}

use ArgKind::{Bit, Long, LongLong, LongStr, Octet, Short, ShortStr, Table};

/// Look up the ordered argument kinds for a `(class_id, method_id)`
/// pair. Returns `None` for any pair this client doesn't recognize.
pub fn method_arg_kinds(class_id: u16, method_id: u16) -> Option<&'static [ArgKind]> {
    use class::*;

    Some(match (class_id, method_id) {
        (CONNECTION, connection::START) => &[Octet, Octet, Table, LongStr, LongStr],
        (CONNECTION, connection::START_OK) => &[Table, ShortStr, LongStr, ShortStr],
        (CONNECTION, connection::SECURE) => &[LongStr],
        (CONNECTION, connection::SECURE_OK) => &[LongStr],
        (CONNECTION, connection::TUNE) => &[Short, Long, Short],
        (CONNECTION, connection::TUNE_OK) => &[Short, Long, Short],
        (CONNECTION, connection::OPEN) => &[ShortStr, ShortStr, Bit],
        (CONNECTION, connection::OPEN_OK) => &[],
        (CONNECTION, connection::CLOSE) => &[Short, ShortStr, Short, Short],
        (CONNECTION, connection::CLOSE_OK) => &[],

        (CHANNEL, channel::OPEN) => &[],
        (CHANNEL, channel::OPEN_OK) => &[],
        (CHANNEL, channel::FLOW) => &[Bit],
        (CHANNEL, channel::FLOW_OK) => &[Bit],
        (CHANNEL, channel::CLOSE) => &[Short, ShortStr, Short, Short],
        (CHANNEL, channel::CLOSE_OK) => &[],

        (EXCHANGE, exchange::DECLARE) => &[ShortStr, ShortStr, Bit, Bit, Bit, Table],
        (EXCHANGE, exchange::DECLARE_OK) => &[],
        (EXCHANGE, exchange::DELETE) => &[ShortStr, Bit, Bit],
        (EXCHANGE, exchange::DELETE_OK) => &[],
        (EXCHANGE, exchange::BIND) => &[ShortStr, ShortStr, ShortStr, Bit, Table],
        (EXCHANGE, exchange::BIND_OK) => &[],
        (EXCHANGE, exchange::UNBIND) => &[ShortStr, ShortStr, ShortStr, Bit, Table],
        (EXCHANGE, exchange::UNBIND_OK) => &[],

        (QUEUE, queue::DECLARE) => &[ShortStr, Bit, Bit, Bit, Bit, Bit, Table],
        (QUEUE, queue::DECLARE_OK) => &[ShortStr, Long, Long],
        (QUEUE, queue::BIND) => &[ShortStr, ShortStr, ShortStr, Bit, Table],
        (QUEUE, queue::BIND_OK) => &[],
        (QUEUE, queue::UNBIND) => &[ShortStr, ShortStr, ShortStr, Table],
        (QUEUE, queue::UNBIND_OK) => &[],
        (QUEUE, queue::PURGE) => &[ShortStr, Bit],
        (QUEUE, queue::PURGE_OK) => &[Long],
        (QUEUE, queue::DELETE) => &[ShortStr, Bit, Bit, Bit],
        (QUEUE, queue::DELETE_OK) => &[Long],

        (BASIC, basic::QOS) => &[Long, Short, Bit],
        (BASIC, basic::QOS_OK) => &[],
        (BASIC, basic::CONSUME) => &[ShortStr, ShortStr, Bit, Bit, Bit, Bit, Table],
        (BASIC, basic::CONSUME_OK) => &[ShortStr],
        (BASIC, basic::CANCEL) => &[ShortStr, Bit],
        (BASIC, basic::CANCEL_OK) => &[ShortStr],
        (BASIC, basic::PUBLISH) => &[ShortStr, ShortStr, Bit, Bit],
        (BASIC, basic::RETURN) => &[Short, ShortStr, ShortStr, ShortStr],
        (BASIC, basic::DELIVER) => &[ShortStr, LongLong, Bit, ShortStr, ShortStr],
        (BASIC, basic::GET) => &[ShortStr, Bit],
        (BASIC, basic::GET_OK) => &[LongLong, Bit, ShortStr, ShortStr, Long],
        (BASIC, basic::GET_EMPTY) => &[],
        (BASIC, basic::ACK) => &[LongLong, Bit],
        (BASIC, basic::REJECT) => &[LongLong, Bit],
        (BASIC, basic::RECOVER_ASYNC) => &[Bit],
        (BASIC, basic::RECOVER) => &[Bit],
        (BASIC, basic::RECOVER_OK) => &[],
        (BASIC, basic::NACK) => &[LongLong, Bit, Bit],

        (CONFIRM, confirm::SELECT) => &[Bit],
        (CONFIRM, confirm::SELECT_OK) => &[],

        (TX, tx::SELECT) => &[],
        (TX, tx::SELECT_OK) => &[],
        (TX, tx::COMMIT) => &[],
        (TX, tx::COMMIT_OK) => &[],
        (TX, tx::ROLLBACK) => &[],
        (TX, tx::ROLLBACK_OK) => &[],

        _ => return None,
    })
}

/// Basic-class content header property kinds, in property-index
/// (MSB-first flag bit) order. See `message.rs::basic_properties` for
/// the typed accessor built on top of this table.
pub const BASIC_PROPERTY_KINDS: &[ArgKind] = &[
    ShortStr,  // 0 content_type
    ShortStr,  // 1 content_encoding
    Table,     // 2 headers
    Octet,     // 3 delivery_mode
    Octet,     // 4 priority
    ShortStr,  // 5 correlation_id
    ShortStr,  // 6 reply_to
    ShortStr,  // 7 expiration
    ShortStr,  // 8 message_id
    ArgKind::Timestamp, // 9 timestamp
    ShortStr,  // 10 type
    ShortStr,  // 11 user_id
    ShortStr,  // 12 app_id
    ShortStr,  // 13 reserved (cluster_id), must be empty if present
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimum_connection_coverage_present() {
        for (method, arity) in [
            (connection::START, 5),
            (connection::START_OK, 4),
            (connection::SECURE, 1),
            (connection::SECURE_OK, 1),
            (connection::TUNE, 3),
            (connection::TUNE_OK, 3),
            (connection::OPEN, 3),
            (connection::OPEN_OK, 0),
            (connection::CLOSE, 4),
            (connection::CLOSE_OK, 0),
        ] {
            let kinds = method_arg_kinds(class::CONNECTION, method).unwrap();
            assert_eq!(kinds.len(), arity, "method {}", method);
        }
    }

    #[test]
    fn minimum_basic_coverage_present() {
        for method in [
            basic::QOS,
            basic::QOS_OK,
            basic::CONSUME,
            basic::CONSUME_OK,
            basic::CANCEL,
            basic::CANCEL_OK,
            basic::PUBLISH,
            basic::RETURN,
            basic::DELIVER,
            basic::GET,
            basic::GET_OK,
            basic::GET_EMPTY,
            basic::ACK,
            basic::NACK,
            basic::REJECT,
            basic::RECOVER_ASYNC,
            basic::RECOVER,
            basic::RECOVER_OK,
        ] {
            assert!(method_arg_kinds(class::BASIC, method).is_some(), "method {}", method);
        }
    }

    #[test]
    fn unknown_pair_returns_none() {
        assert!(method_arg_kinds(class::BASIC, 9999).is_none());
        assert!(method_arg_kinds(9999, 1).is_none());
    }

    #[test]
    fn basic_property_kinds_has_fourteen_entries() {
        assert_eq!(BASIC_PROPERTY_KINDS.len(), 14);
    }
}
