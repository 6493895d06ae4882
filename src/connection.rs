//! Connection-level engine: client configuration and the channel-0
//! handshake/tune/heartbeat/close state machine.
//!
//! The engine here is deliberately free of socket I/O — it builds and
//! interprets the method frames of the handshake and tracks connection
//! state, while `client.rs` owns the transport and drives this engine
//! from its read pump. Keeping the two separate makes the negotiation
//! rules (tune minimum, heartbeat period) testable without a socket.
//!
//! # Examples
//!
//! ```rust
//! use dumq_amqp::connection::ClientConfig;
//!
//! let config = ClientConfig::builder()
//!     .vhost("/")
//!     .heartbeat_seconds(60)
//!     .build();
//! assert_eq!(config.heartbeat_seconds, 60);
//! ```

use std::time::Duration;

use uuid::Uuid;

use crate::codec::ArgKind;
use crate::error::{AmqpError, AmqpResult};
use crate::frame::Frame;
use crate::spec_tables::{class, connection as method};
use crate::value::{FieldTable, FieldValue};

/// Connection-level state, driven exclusively by channel-0 frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Opening,
    Starting,
    Tuning,
    Opened,
    Closing,
}

/// Client-side connection configuration, negotiated against the
/// server's `Tune` offer.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub vhost: String,
    pub max_frame_size_bytes: u32,
    pub max_channel_id: u16,
    pub heartbeat_seconds: u16,
    pub connection_timeout: Duration,
    pub locale: String,
    pub client_properties: FieldTable,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let mut client_properties = FieldTable::new();
        client_properties.insert("product", FieldValue::from("dumq-amqp"));
        client_properties.insert("platform", FieldValue::from("Rust"));
        client_properties.insert("connection_name", FieldValue::from(Uuid::new_v4().to_string()));

        ClientConfig {
            vhost: "/".to_string(),
            max_frame_size_bytes: 131_072,
            max_channel_id: 2047,
            heartbeat_seconds: 60,
            connection_timeout: Duration::from_secs(30),
            locale: "en_US".to_string(),
            client_properties,
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }
}

/// Fluent builder for [`ClientConfig`].
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn vhost(mut self, vhost: impl Into<String>) -> Self {
        self.config.vhost = vhost.into();
        self
    }

    pub fn max_frame_size_bytes(mut self, v: u32) -> Self {
        self.config.max_frame_size_bytes = v;
        self
    }

    pub fn max_channel_id(mut self, v: u16) -> Self {
        self.config.max_channel_id = v;
        self
    }

    pub fn heartbeat_seconds(mut self, v: u16) -> Self {
        self.config.heartbeat_seconds = v;
        self
    }

    pub fn connection_timeout(mut self, v: Duration) -> Self {
        self.config.connection_timeout = v;
        self
    }

    pub fn locale(mut self, v: impl Into<String>) -> Self {
        self.config.locale = v.into();
        self
    }

    pub fn client_property(mut self, key: impl Into<String>, value: FieldValue) -> Self {
        self.config.client_properties.insert(key, value);
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

/// Negotiated tune parameters, the element-wise minimum of the
/// server's offer and the client's local caps. A zero from the server
/// means "no preference", so the local cap wins outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TuneParams {
    pub channel_max: u16,
    pub frame_max: u32,
    pub heartbeat_seconds: u16,
}

fn negotiate_min(server: u32, local: u32) -> u32 {
    if server == 0 {
        local
    } else if local == 0 {
        server
    } else {
        server.min(local)
    }
}

/// Apply the tune-negotiation rule described in `ClientConfig`'s
/// module docs: element-wise minimum, zero-from-server means
/// "unlimited", zero heartbeat disables heartbeats outright.
pub fn negotiate_tune(server_channel_max: u16, server_frame_max: u32, server_heartbeat: u16, config: &ClientConfig) -> TuneParams {
    TuneParams {
        channel_max: negotiate_min(server_channel_max as u32, config.max_channel_id as u32) as u16,
        frame_max: negotiate_min(server_frame_max, config.max_frame_size_bytes),
        heartbeat_seconds: negotiate_min(server_heartbeat as u32, config.heartbeat_seconds as u32) as u16,
    }
}

/// The watchdog timer period: half the negotiated heartbeat interval.
pub fn heartbeat_period(heartbeat_seconds: u16) -> Duration {
    Duration::from_secs(heartbeat_seconds as u64).mul_f64(0.5)
}

/// The maximum silence tolerated before the connection is considered
/// dead: twice the negotiated heartbeat interval.
pub fn heartbeat_timeout(heartbeat_seconds: u16) -> Duration {
    Duration::from_secs(heartbeat_seconds as u64 * 2)
}

/// Close code the watchdog uses when it gives up on the peer.
pub const MISSED_HEARTBEATS_CLOSE_CODE: u16 = 500;

/// Build the `Connection.StartOk` method frame answering a `Start`
/// challenge with an authenticator's response.
pub fn build_start_ok(config: &ClientConfig, mechanism: &str, response: &[u8], locale: &str) -> AmqpResult<Frame> {
    use crate::codec::write_native_sequence;
    use bytes::BytesMut;

    let kinds = [ArgKind::Table, ArgKind::ShortStr, ArgKind::LongStr, ArgKind::ShortStr];
    let values = [
        FieldValue::Table(config.client_properties.clone()),
        FieldValue::ShortString(mechanism.to_string()),
        FieldValue::LongString(response.to_vec()),
        FieldValue::ShortString(locale.to_string()),
    ];

    let mut arguments = BytesMut::new();
    write_native_sequence(&mut arguments, &kinds, &values)?;

    Ok(Frame::Method {
        channel: 0,
        class_id: class::CONNECTION,
        method_id: method::START_OK,
        arguments: arguments.freeze(),
    })
}

/// Build the `Connection.TuneOk` method frame.
pub fn build_tune_ok(tune: TuneParams) -> AmqpResult<Frame> {
    use crate::codec::write_native_sequence;
    use bytes::BytesMut;

    let kinds = [ArgKind::Short, ArgKind::Long, ArgKind::Short];
    let values = [
        FieldValue::ShortUInt(tune.channel_max),
        FieldValue::LongUInt(tune.frame_max),
        FieldValue::ShortUInt(tune.heartbeat_seconds),
    ];

    let mut arguments = BytesMut::new();
    write_native_sequence(&mut arguments, &kinds, &values)?;

    Ok(Frame::Method { channel: 0, class_id: class::CONNECTION, method_id: method::TUNE_OK, arguments: arguments.freeze() })
}

/// Build the `Connection.Open` method frame: `(vhost, reserved="",
/// reserved=false)`.
pub fn build_open(vhost: &str) -> AmqpResult<Frame> {
    use crate::codec::write_native_sequence;
    use bytes::BytesMut;

    let kinds = [ArgKind::ShortStr, ArgKind::ShortStr, ArgKind::Bit];
    let values = [
        FieldValue::ShortString(vhost.to_string()),
        FieldValue::ShortString(String::new()),
        FieldValue::Boolean(false),
    ];

    let mut arguments = BytesMut::new();
    write_native_sequence(&mut arguments, &kinds, &values)?;

    Ok(Frame::Method { channel: 0, class_id: class::CONNECTION, method_id: method::OPEN, arguments: arguments.freeze() })
}

/// Build a `Connection.Close` method frame for a locally-initiated
/// shutdown.
pub fn build_close(code: u16, reply_text: &str) -> AmqpResult<Frame> {
    use crate::codec::write_native_sequence;
    use bytes::BytesMut;

    let kinds = [ArgKind::Short, ArgKind::ShortStr, ArgKind::Short, ArgKind::Short];
    let values = [
        FieldValue::ShortUInt(code),
        FieldValue::ShortString(reply_text.to_string()),
        FieldValue::ShortUInt(0),
        FieldValue::ShortUInt(0),
    ];

    let mut arguments = BytesMut::new();
    write_native_sequence(&mut arguments, &kinds, &values)?;

    Ok(Frame::Method { channel: 0, class_id: class::CONNECTION, method_id: method::CLOSE, arguments: arguments.freeze() })
}

pub fn build_close_ok() -> Frame {
    Frame::Method { channel: 0, class_id: class::CONNECTION, method_id: method::CLOSE_OK, arguments: bytes::Bytes::new() }
}

/// Decode a `Connection.Close`'s `(code, reply_text)` pair, ignoring
/// the offending class/method fields.
pub fn decode_close_reason(arguments: &mut bytes::Bytes) -> AmqpResult<(u16, String)> {
    use crate::codec::read_native_sequence;

    let kinds = [ArgKind::Short, ArgKind::ShortStr, ArgKind::Short, ArgKind::Short];
    let values = read_native_sequence(arguments, &kinds)?;
    let code = match &values[0] {
        FieldValue::ShortUInt(v) => *v,
        _ => return Err(AmqpError::protocol("Close.code was not a short")),
    };
    let reply_text = match &values[1] {
        FieldValue::ShortString(s) => s.clone(),
        _ => return Err(AmqpError::protocol("Close.reply_text was not a short-string")),
    };
    Ok((code, reply_text))
}

/// Decode `Connection.Tune`'s `(channel_max, frame_max, heartbeat)`.
pub fn decode_tune(arguments: &mut bytes::Bytes) -> AmqpResult<(u16, u32, u16)> {
    use crate::codec::read_native_sequence;

    let kinds = [ArgKind::Short, ArgKind::Long, ArgKind::Short];
    let values = read_native_sequence(arguments, &kinds)?;
    let channel_max = match &values[0] {
        FieldValue::ShortUInt(v) => *v,
        _ => return Err(AmqpError::protocol("Tune.channel_max was not a short")),
    };
    let frame_max = match &values[1] {
        FieldValue::LongUInt(v) => *v,
        _ => return Err(AmqpError::protocol("Tune.frame_max was not a long")),
    };
    let heartbeat = match &values[2] {
        FieldValue::ShortUInt(v) => *v,
        _ => return Err(AmqpError::protocol("Tune.heartbeat was not a short")),
    };
    Ok((channel_max, frame_max, heartbeat))
}

/// Decode `Connection.Start`'s `(version_major, version_minor,
/// server_properties, mechanisms, locales)`, returning only the
/// mechanism list split on spaces (the form the wire uses).
pub fn decode_start_mechanisms(arguments: &mut bytes::Bytes) -> AmqpResult<Vec<String>> {
    use crate::codec::read_native_sequence;

    let kinds = [ArgKind::Octet, ArgKind::Octet, ArgKind::Table, ArgKind::LongStr, ArgKind::LongStr];
    let values = read_native_sequence(arguments, &kinds)?;
    let mechanisms = match &values[3] {
        FieldValue::LongString(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        _ => return Err(AmqpError::protocol("Start.mechanisms was not a long-string")),
    };
    Ok(mechanisms.split(' ').filter(|s| !s.is_empty()).map(str::to_string).collect())
}

/// Reply-code constants used when the client initiates a close, or
/// matched against a server-supplied code. Kept as named consts rather
/// than a full enum: the wire value is what callers actually compare
/// against, and new broker-specific codes shouldn't need a client
/// release to recognize.
pub mod reply_codes {
    pub const SUCCESS: u16 = 200;
    pub const CONTENT_TOO_LARGE: u16 = 311;
    pub const CONNECTION_FORCED: u16 = 320;
    pub const NOT_FOUND: u16 = 404;
    pub const RESOURCE_LOCKED: u16 = 405;
    pub const PRECONDITION_FAILED: u16 = 406;
    pub const FRAME_ERROR: u16 = 501;
    pub const SYNTAX_ERROR: u16 = 502;
    pub const CHANNEL_ERROR: u16 = 504;
    pub const UNEXPECTED_FRAME: u16 = 505;
    pub const NOT_ALLOWED: u16 = 530;
    pub const NOT_IMPLEMENTED: u16 = 540;
    pub const INTERNAL_ERROR: u16 = 541;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = ClientConfig::builder().vhost("/prod").heartbeat_seconds(30).build();
        assert_eq!(config.vhost, "/prod");
        assert_eq!(config.heartbeat_seconds, 30);
    }

    #[test]
    fn negotiate_tune_takes_element_wise_minimum() {
        let config = ClientConfig::builder().max_channel_id(100).max_frame_size_bytes(4096).heartbeat_seconds(30).build();
        let tune = negotiate_tune(50, 8192, 60, &config);
        assert_eq!(tune.channel_max, 50);
        assert_eq!(tune.frame_max, 4096);
        assert_eq!(tune.heartbeat_seconds, 30);
    }

    #[test]
    fn negotiate_tune_zero_from_server_means_unlimited() {
        let config = ClientConfig::builder().max_channel_id(100).max_frame_size_bytes(4096).build();
        let tune = negotiate_tune(0, 0, 0, &config);
        assert_eq!(tune.channel_max, 100);
        assert_eq!(tune.frame_max, 4096);
        assert_eq!(tune.heartbeat_seconds, 0);
    }

    #[test]
    fn heartbeat_period_is_half_the_interval() {
        assert_eq!(heartbeat_period(60), Duration::from_secs(30));
        assert_eq!(heartbeat_timeout(60), Duration::from_secs(120));
    }

    #[test]
    fn build_and_decode_tune_ok_round_trip() {
        let tune = TuneParams { channel_max: 10, frame_max: 4096, heartbeat_seconds: 30 };
        let frame = build_tune_ok(tune).unwrap();
        if let Frame::Method { mut arguments, .. } = frame {
            let (channel_max, frame_max, heartbeat) = decode_tune(&mut arguments).unwrap();
            assert_eq!(channel_max, 10);
            assert_eq!(frame_max, 4096);
            assert_eq!(heartbeat, 30);
        } else {
            panic!("expected a method frame");
        }
    }

    #[test]
    fn build_open_encodes_vhost() {
        let frame = build_open("/prod").unwrap();
        assert!(matches!(frame, Frame::Method { channel: 0, .. }));
    }

    #[test]
    fn decode_close_reason_round_trips() {
        let frame = build_close(320, "CONNECTION_FORCED").unwrap();
        if let Frame::Method { mut arguments, .. } = frame {
            let (code, text) = decode_close_reason(&mut arguments).unwrap();
            assert_eq!(code, 320);
            assert_eq!(text, "CONNECTION_FORCED");
        } else {
            panic!("expected a method frame");
        }
    }
}
