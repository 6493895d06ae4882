//! Application-facing message types: content-header properties and
//! the delivered/outbound message shapes built on top of them.
//!
//! # Examples
//!
//! ```rust
//! use dumq_amqp::message::BasicProperties;
//!
//! let props = BasicProperties::builder()
//!     .content_type("text/plain")
//!     .content_encoding("utf-8")
//!     .build();
//! assert_eq!(props.content_type.as_deref(), Some("text/plain"));
//! ```

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::codec::{read_native_sequence, write_native_sequence};
use crate::error::CodecError;
use crate::spec_tables::BASIC_PROPERTY_KINDS;
use crate::value::{FieldTable, FieldValue};

const NUM_PROPERTIES: u32 = 14;
/// Reserved property bit 13 (`cluster_id`); must be empty if present.
const RESERVED_BIT: u32 = 13;

/// The fourteen Basic-class content-header properties, each optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BasicProperties {
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub headers: Option<FieldTable>,
    pub delivery_mode: Option<u8>,
    pub priority: Option<u8>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub expiration: Option<String>,
    pub message_id: Option<String>,
    pub timestamp: Option<i64>,
    pub kind: Option<String>,
    pub user_id: Option<String>,
    pub app_id: Option<String>,
}

impl BasicProperties {
    pub fn builder() -> BasicPropertiesBuilder {
        BasicPropertiesBuilder::default()
    }

    /// Encode the property-flags bitmask plus the present properties'
    /// native encodings, in property-index order.
    pub fn encode(&self) -> Result<(u16, Bytes), CodecError> {
        let slots: [Option<FieldValue>; 14] = [
            self.content_type.clone().map(FieldValue::from),
            self.content_encoding.clone().map(FieldValue::from),
            self.headers.clone().map(FieldValue::Table),
            self.delivery_mode.map(FieldValue::ShortShortUInt),
            self.priority.map(FieldValue::ShortShortUInt),
            self.correlation_id.clone().map(FieldValue::from),
            self.reply_to.clone().map(FieldValue::from),
            self.expiration.clone().map(FieldValue::from),
            self.message_id.clone().map(FieldValue::from),
            self.timestamp.map(FieldValue::Timestamp),
            self.kind.clone().map(FieldValue::from),
            self.user_id.clone().map(FieldValue::from),
            self.app_id.clone().map(FieldValue::from),
            None, // reserved cluster_id, always absent
        ];

        let mut flags: u16 = 0;
        let mut kinds = Vec::new();
        let mut values = Vec::new();
        for (index, slot) in slots.into_iter().enumerate() {
            if let Some(value) = slot {
                flags |= 1 << (15 - index as u32);
                kinds.push(BASIC_PROPERTY_KINDS[index]);
                values.push(value);
            }
        }

        let mut buf = BytesMut::new();
        write_native_sequence(&mut buf, &kinds, &values)?;
        Ok((flags, buf.freeze()))
    }

    /// Decode the property-flags bitmask and its native body.
    pub fn decode(flags: u16, body: &mut Bytes) -> Result<Self, CodecError> {
        if flags & (1 << (15 - RESERVED_BIT)) != 0 {
            return Err(CodecError::TypeMismatch {
                expected: "cluster_id absent",
                found: "cluster_id present",
            });
        }

        let mut kinds = Vec::new();
        let mut present = Vec::new();
        for index in 0..NUM_PROPERTIES {
            if flags & (1 << (15 - index)) != 0 {
                kinds.push(BASIC_PROPERTY_KINDS[index as usize]);
                present.push(index);
            }
        }

        let values = read_native_sequence(body, &kinds)?;
        let mut props = BasicProperties::default();
        for (index, value) in present.into_iter().zip(values.into_iter()) {
            match index {
                0 => props.content_type = value.as_long_string_utf8().map(str::to_string),
                1 => props.content_encoding = value.as_long_string_utf8().map(str::to_string),
                2 => {
                    if let FieldValue::Table(t) = value {
                        props.headers = Some(t);
                    }
                }
                3 => {
                    if let FieldValue::ShortShortUInt(v) = value {
                        props.delivery_mode = Some(v);
                    }
                }
                4 => {
                    if let FieldValue::ShortShortUInt(v) = value {
                        props.priority = Some(v);
                    }
                }
                5 => props.correlation_id = value.as_long_string_utf8().map(str::to_string),
                6 => props.reply_to = value.as_long_string_utf8().map(str::to_string),
                7 => props.expiration = value.as_long_string_utf8().map(str::to_string),
                8 => props.message_id = value.as_long_string_utf8().map(str::to_string),
                9 => {
                    if let FieldValue::Timestamp(t) = value {
                        props.timestamp = Some(t);
                    }
                }
                10 => props.kind = value.as_long_string_utf8().map(str::to_string),
                11 => props.user_id = value.as_long_string_utf8().map(str::to_string),
                12 => props.app_id = value.as_long_string_utf8().map(str::to_string),
                _ => {}
            }
        }
        Ok(props)
    }
}

/// Fluent builder for [`BasicProperties`], mirroring the teacher
/// repo's message-builder idiom.
#[derive(Debug, Clone, Default)]
pub struct BasicPropertiesBuilder {
    props: BasicProperties,
}

impl BasicPropertiesBuilder {
    pub fn content_type(mut self, v: impl Into<String>) -> Self {
        self.props.content_type = Some(v.into());
        self
    }

    pub fn content_encoding(mut self, v: impl Into<String>) -> Self {
        self.props.content_encoding = Some(v.into());
        self
    }

    pub fn headers(mut self, v: FieldTable) -> Self {
        self.props.headers = Some(v);
        self
    }

    pub fn delivery_mode(mut self, v: u8) -> Self {
        self.props.delivery_mode = Some(v);
        self
    }

    pub fn persistent(self) -> Self {
        self.delivery_mode(2)
    }

    pub fn priority(mut self, v: u8) -> Self {
        self.props.priority = Some(v);
        self
    }

    pub fn correlation_id(mut self, v: impl Into<String>) -> Self {
        self.props.correlation_id = Some(v.into());
        self
    }

    pub fn reply_to(mut self, v: impl Into<String>) -> Self {
        self.props.reply_to = Some(v.into());
        self
    }

    pub fn expiration(mut self, v: impl Into<String>) -> Self {
        self.props.expiration = Some(v.into());
        self
    }

    pub fn message_id(mut self, v: impl Into<String>) -> Self {
        self.props.message_id = Some(v.into());
        self
    }

    pub fn timestamp(mut self, v: i64) -> Self {
        self.props.timestamp = Some(v);
        self
    }

    pub fn kind(mut self, v: impl Into<String>) -> Self {
        self.props.kind = Some(v.into());
        self
    }

    pub fn user_id(mut self, v: impl Into<String>) -> Self {
        self.props.user_id = Some(v.into());
        self
    }

    pub fn app_id(mut self, v: impl Into<String>) -> Self {
        self.props.app_id = Some(v.into());
        self
    }

    pub fn build(self) -> BasicProperties {
        self.props
    }
}

/// A message handed to `basic_publish`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub exchange: String,
    pub routing_key: String,
    pub mandatory: bool,
    pub immediate: bool,
    pub properties: BasicProperties,
    pub payload: Bytes,
}

impl OutboundMessage {
    pub fn new(exchange: impl Into<String>, routing_key: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        OutboundMessage {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            mandatory: false,
            immediate: false,
            properties: BasicProperties::default(),
            payload: payload.into(),
        }
    }

    pub fn with_properties(mut self, properties: BasicProperties) -> Self {
        self.properties = properties;
        self
    }

    pub fn mandatory(mut self, mandatory: bool) -> Self {
        self.mandatory = mandatory;
        self
    }
}

/// A message received via `basic_get` or a consumer delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveredMessage {
    pub consumer_tag: Option<String>,
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub exchange: String,
    pub routing_key: String,
    pub properties: BasicProperties,
    pub payload: Bytes,
}

impl DeliveredMessage {
    pub fn body_as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_fields() {
        let props = BasicProperties::builder()
            .content_type("text/plain")
            .content_encoding("utf-8")
            .persistent()
            .priority(5)
            .build();

        assert_eq!(props.content_type.as_deref(), Some("text/plain"));
        assert_eq!(props.content_encoding.as_deref(), Some("utf-8"));
        assert_eq!(props.delivery_mode, Some(2));
        assert_eq!(props.priority, Some(5));
    }

    #[test]
    fn encode_decode_round_trip() {
        let props = BasicProperties::builder()
            .content_type("application/json")
            .message_id("msg-1")
            .timestamp(1_700_000_000)
            .build();

        let (flags, mut body) = props.encode().unwrap();
        let decoded = BasicProperties::decode(flags, &mut body).unwrap();
        assert_eq!(decoded, props);
    }

    #[test]
    fn encode_skips_absent_properties() {
        let props = BasicProperties::default();
        let (flags, body) = props.encode().unwrap();
        assert_eq!(flags, 0);
        assert!(body.is_empty());
    }

    #[test]
    fn decode_rejects_reserved_cluster_id_bit() {
        let flags: u16 = 1 << (15 - 13);
        let mut body = Bytes::new();
        let err = BasicProperties::decode(flags, &mut body).unwrap_err();
        assert!(matches!(err, CodecError::TypeMismatch { .. }));
    }
}
