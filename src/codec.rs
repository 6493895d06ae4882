//! AMQP 0-9-1 field-value codec.
//!
//! This is the layer below `frame.rs`: it encodes and decodes typed
//! field values, both tagged (`write_value`/`read_value`, used for
//! field arrays and field tables) and native/untagged
//! (`write_native`/`read_native`, used inside method-argument blocks
//! and content-header properties, where the type of every position is
//! implied by the spec table).
//!
//! # Examples
//!
//! ```rust
//! use bytes::BytesMut;
//! use dumq_amqp::codec::{write_value, read_value};
//! use dumq_amqp::value::FieldValue;
//!
//! let mut buf = BytesMut::new();
//! write_value(&mut buf, &FieldValue::LongUInt(42)).unwrap();
//! let mut frozen = buf.freeze();
//! let decoded = read_value(&mut frozen).unwrap();
//! assert_eq!(decoded, FieldValue::LongUInt(42));
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::CodecError;
use crate::value::{Decimal, FieldTable, FieldValue};

/// Single-octet type tags used by `write_value`/`read_value`.
pub mod tag {
    pub const BOOLEAN: u8 = b't';
    pub const SHORT_SHORT_INT: u8 = b'b';
    pub const SHORT_SHORT_UINT: u8 = b'B';
    pub const SHORT_INT: u8 = b'U';
    pub const SHORT_UINT: u8 = b'u';
    pub const LONG_INT: u8 = b'I';
    pub const LONG_UINT: u8 = b'i';
    pub const LONG_LONG_INT: u8 = b'L';
    pub const LONG_LONG_UINT: u8 = b'l';
    pub const FLOAT: u8 = b'f';
    pub const DOUBLE: u8 = b'd';
    pub const DECIMAL: u8 = b'D';
    pub const SHORT_STRING: u8 = b's';
    pub const LONG_STRING: u8 = b'S';
    pub const ARRAY: u8 = b'A';
    pub const TIMESTAMP: u8 = b'T';
    pub const TABLE: u8 = b'F';
    pub const VOID: u8 = b'V';
}

/// The wire kind of a single untagged (native) value, as dictated by
/// a position in a method's argument list or a content-header
/// property. `Bit` only ever appears grouped inside
/// `read_native_sequence`/`write_native_sequence`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Bit,
    Octet,
    Short,
    Long,
    LongLong,
    ShortStr,
    LongStr,
    Table,
    Timestamp,
}

fn need(buf: &Bytes, n: usize) -> Result<(), CodecError> {
    if buf.remaining() < n {
        Err(CodecError::Truncated { needed: n, available: buf.remaining() })
    } else {
        Ok(())
    }
}

/// Write a tagged field value (tag octet followed by its native
/// encoding).
pub fn write_value(buf: &mut BytesMut, value: &FieldValue) -> Result<(), CodecError> {
    match value {
        FieldValue::Boolean(b) => {
            buf.put_u8(tag::BOOLEAN);
            buf.put_u8(if *b { 1 } else { 0 });
        }
        FieldValue::ShortShortInt(v) => {
            buf.put_u8(tag::SHORT_SHORT_INT);
            buf.put_i8(*v);
        }
        FieldValue::ShortShortUInt(v) => {
            buf.put_u8(tag::SHORT_SHORT_UINT);
            buf.put_u8(*v);
        }
        FieldValue::ShortInt(v) => {
            buf.put_u8(tag::SHORT_INT);
            buf.put_i16(*v);
        }
        FieldValue::ShortUInt(v) => {
            buf.put_u8(tag::SHORT_UINT);
            buf.put_u16(*v);
        }
        FieldValue::LongInt(v) => {
            buf.put_u8(tag::LONG_INT);
            buf.put_i32(*v);
        }
        FieldValue::LongUInt(v) => {
            buf.put_u8(tag::LONG_UINT);
            buf.put_u32(*v);
        }
        FieldValue::LongLongInt(v) => {
            buf.put_u8(tag::LONG_LONG_INT);
            buf.put_i64(*v);
        }
        FieldValue::LongLongUInt(v) => {
            buf.put_u8(tag::LONG_LONG_UINT);
            buf.put_u64(*v);
        }
        FieldValue::Float(v) => {
            buf.put_u8(tag::FLOAT);
            buf.put_f32(*v);
        }
        FieldValue::Double(v) => {
            buf.put_u8(tag::DOUBLE);
            buf.put_f64(*v);
        }
        FieldValue::Decimal(d) => {
            buf.put_u8(tag::DECIMAL);
            buf.put_u8(d.scale);
            buf.put_i32(d.value);
        }
        FieldValue::ShortString(s) => {
            buf.put_u8(tag::SHORT_STRING);
            write_shortstr(buf, s.as_bytes())?;
        }
        FieldValue::LongString(bytes) => {
            buf.put_u8(tag::LONG_STRING);
            write_longstr(buf, bytes);
        }
        FieldValue::Array(values) => {
            buf.put_u8(tag::ARRAY);
            let mut body = BytesMut::new();
            for v in values {
                write_value(&mut body, v)?;
            }
            buf.put_u32(body.len() as u32);
            buf.extend_from_slice(&body);
        }
        FieldValue::Timestamp(t) => {
            buf.put_u8(tag::TIMESTAMP);
            buf.put_i64(*t);
        }
        FieldValue::Table(table) => {
            buf.put_u8(tag::TABLE);
            write_table_body(buf, table)?;
        }
        FieldValue::Void => {
            buf.put_u8(tag::VOID);
        }
    }
    Ok(())
}

/// Read a tagged field value: a single type octet then its native
/// encoding.
pub fn read_value(buf: &mut Bytes) -> Result<FieldValue, CodecError> {
    need(buf, 1)?;
    let t = buf.get_u8();
    match t {
        tag::BOOLEAN => {
            need(buf, 1)?;
            Ok(FieldValue::Boolean(buf.get_u8() != 0))
        }
        tag::SHORT_SHORT_INT => {
            need(buf, 1)?;
            Ok(FieldValue::ShortShortInt(buf.get_i8()))
        }
        tag::SHORT_SHORT_UINT => {
            need(buf, 1)?;
            Ok(FieldValue::ShortShortUInt(buf.get_u8()))
        }
        tag::SHORT_INT => {
            need(buf, 2)?;
            Ok(FieldValue::ShortInt(buf.get_i16()))
        }
        tag::SHORT_UINT => {
            need(buf, 2)?;
            Ok(FieldValue::ShortUInt(buf.get_u16()))
        }
        tag::LONG_INT => {
            need(buf, 4)?;
            Ok(FieldValue::LongInt(buf.get_i32()))
        }
        tag::LONG_UINT => {
            need(buf, 4)?;
            Ok(FieldValue::LongUInt(buf.get_u32()))
        }
        tag::LONG_LONG_INT => {
            need(buf, 8)?;
            Ok(FieldValue::LongLongInt(buf.get_i64()))
        }
        tag::LONG_LONG_UINT => {
            need(buf, 8)?;
            Ok(FieldValue::LongLongUInt(buf.get_u64()))
        }
        tag::FLOAT => {
            need(buf, 4)?;
            Ok(FieldValue::Float(buf.get_f32()))
        }
        tag::DOUBLE => {
            need(buf, 8)?;
            Ok(FieldValue::Double(buf.get_f64()))
        }
        tag::DECIMAL => {
            need(buf, 5)?;
            let scale = buf.get_u8();
            let value = buf.get_i32();
            Ok(FieldValue::Decimal(Decimal::new(scale, value)))
        }
        tag::SHORT_STRING => Ok(FieldValue::ShortString(
            String::from_utf8_lossy(&read_shortstr(buf)?).into_owned(),
        )),
        tag::LONG_STRING => Ok(FieldValue::LongString(read_longstr(buf)?)),
        tag::ARRAY => {
            need(buf, 4)?;
            let len = buf.get_u32() as usize;
            need(buf, len)?;
            let mut body = buf.copy_to_bytes(len);
            let mut values = Vec::new();
            while body.has_remaining() {
                values.push(read_value(&mut body)?);
            }
            Ok(FieldValue::Array(values))
        }
        tag::TIMESTAMP => {
            need(buf, 8)?;
            Ok(FieldValue::Timestamp(buf.get_i64()))
        }
        tag::TABLE => Ok(FieldValue::Table(read_table_body(buf)?)),
        tag::VOID => Ok(FieldValue::Void),
        other => Err(CodecError::InvalidTag(other)),
    }
}

fn write_shortstr(buf: &mut BytesMut, bytes: &[u8]) -> Result<(), CodecError> {
    if bytes.len() > u8::MAX as usize {
        return Err(CodecError::StringTooLong(bytes.len()));
    }
    buf.put_u8(bytes.len() as u8);
    buf.extend_from_slice(bytes);
    Ok(())
}

fn read_shortstr(buf: &mut Bytes) -> Result<Vec<u8>, CodecError> {
    need(buf, 1)?;
    let len = buf.get_u8() as usize;
    need(buf, len)?;
    Ok(buf.copy_to_bytes(len).to_vec())
}

fn write_longstr(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_u32(bytes.len() as u32);
    buf.extend_from_slice(bytes);
}

fn read_longstr(buf: &mut Bytes) -> Result<Vec<u8>, CodecError> {
    need(buf, 4)?;
    let len = buf.get_u32() as usize;
    need(buf, len)?;
    Ok(buf.copy_to_bytes(len).to_vec())
}

fn write_table_body(buf: &mut BytesMut, table: &FieldTable) -> Result<(), CodecError> {
    let mut body = BytesMut::new();
    for (key, value) in table.iter() {
        write_shortstr(&mut body, key.as_bytes())?;
        write_value(&mut body, value)?;
    }
    buf.put_u32(body.len() as u32);
    buf.extend_from_slice(&body);
    Ok(())
}

fn read_table_body(buf: &mut Bytes) -> Result<FieldTable, CodecError> {
    need(buf, 4)?;
    let len = buf.get_u32() as usize;
    need(buf, len)?;
    let mut body = buf.copy_to_bytes(len);
    let mut table = FieldTable::new();
    while body.has_remaining() {
        let key = String::from_utf8_lossy(&read_shortstr(&mut body)?).into_owned();
        let value = read_value(&mut body)?;
        table.insert(key, value);
    }
    Ok(table)
}

/// Like [`write_table_body`] but without the leading u32 length
/// prefix, matching the AMQPLAIN SASL mechanism's embedding
/// convention (`auth.rs`).
pub fn write_table_entries_unframed(
    buf: &mut BytesMut,
    entries: &[(&str, FieldValue)],
) -> Result<(), CodecError> {
    for (key, value) in entries {
        write_shortstr(buf, key.as_bytes())?;
        write_value(buf, value)?;
    }
    Ok(())
}

/// Write a single native (untagged) value of the given kind. `Bit`
/// values must go through `write_native_sequence`; calling this with
/// `ArgKind::Bit` writes a single whole byte, which is only correct
/// when it is not adjacent to another bit argument.
pub fn write_native(buf: &mut BytesMut, value: &FieldValue, kind: ArgKind) -> Result<(), CodecError> {
    match (kind, value) {
        (ArgKind::Bit, FieldValue::Boolean(b)) => buf.put_u8(if *b { 1 } else { 0 }),
        (ArgKind::Octet, FieldValue::ShortShortUInt(v)) => buf.put_u8(*v),
        (ArgKind::Short, FieldValue::ShortUInt(v)) => buf.put_u16(*v),
        (ArgKind::Long, FieldValue::LongUInt(v)) => buf.put_u32(*v),
        (ArgKind::LongLong, FieldValue::LongLongUInt(v)) => buf.put_u64(*v),
        (ArgKind::ShortStr, FieldValue::ShortString(s)) => write_shortstr(buf, s.as_bytes())?,
        (ArgKind::LongStr, FieldValue::LongString(bytes)) => write_longstr(buf, bytes),
        (ArgKind::Table, FieldValue::Table(table)) => write_table_body(buf, table)?,
        (ArgKind::Timestamp, FieldValue::Timestamp(t)) => buf.put_i64(*t),
        (expected, found) => {
            return Err(CodecError::TypeMismatch {
                expected: kind_name(expected),
                found: found.type_name(),
            })
        }
    }
    Ok(())
}

/// Read a single native (untagged) value of the given kind.
pub fn read_native(buf: &mut Bytes, kind: ArgKind) -> Result<FieldValue, CodecError> {
    Ok(match kind {
        ArgKind::Bit => {
            need(buf, 1)?;
            FieldValue::Boolean(buf.get_u8() != 0)
        }
        ArgKind::Octet => {
            need(buf, 1)?;
            FieldValue::ShortShortUInt(buf.get_u8())
        }
        ArgKind::Short => {
            need(buf, 2)?;
            FieldValue::ShortUInt(buf.get_u16())
        }
        ArgKind::Long => {
            need(buf, 4)?;
            FieldValue::LongUInt(buf.get_u32())
        }
        ArgKind::LongLong => {
            need(buf, 8)?;
            FieldValue::LongLongUInt(buf.get_u64())
        }
        ArgKind::ShortStr => {
            FieldValue::ShortString(String::from_utf8_lossy(&read_shortstr(buf)?).into_owned())
        }
        ArgKind::LongStr => FieldValue::LongString(read_longstr(buf)?),
        ArgKind::Table => FieldValue::Table(read_table_body(buf)?),
        ArgKind::Timestamp => {
            need(buf, 8)?;
            FieldValue::Timestamp(buf.get_i64())
        }
    })
}

fn kind_name(kind: ArgKind) -> &'static str {
    match kind {
        ArgKind::Bit => "bit",
        ArgKind::Octet => "octet",
        ArgKind::Short => "short",
        ArgKind::Long => "long",
        ArgKind::LongLong => "long-long",
        ArgKind::ShortStr => "short-string",
        ArgKind::LongStr => "long-string",
        ArgKind::Table => "table",
        ArgKind::Timestamp => "timestamp",
    }
}

/// Write a full argument/property sequence, applying the bit-packing
/// rule: consecutive `ArgKind::Bit` positions are coalesced into
/// `ceil(run_len/8)` octets, low bit first, flushed immediately
/// before the next non-bit argument or at the end of the sequence.
pub fn write_native_sequence(
    buf: &mut BytesMut,
    kinds: &[ArgKind],
    values: &[FieldValue],
) -> Result<(), CodecError> {
    if kinds.len() != values.len() {
        return Err(CodecError::TypeMismatch { expected: "matching arity", found: "mismatched arity" });
    }
    let mut i = 0;
    while i < kinds.len() {
        if kinds[i] == ArgKind::Bit {
            let start = i;
            while i < kinds.len() && kinds[i] == ArgKind::Bit {
                i += 1;
            }
            let run = &values[start..i];
            let nbytes = run.len().div_ceil(8);
            let mut packed = vec![0u8; nbytes];
            for (idx, v) in run.iter().enumerate() {
                let b = match v {
                    FieldValue::Boolean(b) => *b,
                    other => {
                        return Err(CodecError::TypeMismatch {
                            expected: "bit",
                            found: other.type_name(),
                        })
                    }
                };
                if b {
                    packed[idx / 8] |= 1 << (idx % 8);
                }
            }
            buf.extend_from_slice(&packed);
        } else {
            write_native(buf, &values[i], kinds[i])?;
            i += 1;
        }
    }
    Ok(())
}

/// Read a full argument/property sequence per the same bit-packing
/// rule as [`write_native_sequence`].
pub fn read_native_sequence(buf: &mut Bytes, kinds: &[ArgKind]) -> Result<Vec<FieldValue>, CodecError> {
    let mut values = Vec::with_capacity(kinds.len());
    let mut i = 0;
    while i < kinds.len() {
        if kinds[i] == ArgKind::Bit {
            let start = i;
            while i < kinds.len() && kinds[i] == ArgKind::Bit {
                i += 1;
            }
            let run_len = i - start;
            let nbytes = run_len.div_ceil(8);
            need(buf, nbytes)?;
            let packed = buf.copy_to_bytes(nbytes);
            for idx in 0..run_len {
                let byte = packed[idx / 8];
                let bit = (byte >> (idx % 8)) & 1;
                values.push(FieldValue::Boolean(bit != 0));
            }
        } else {
            values.push(read_native(buf, kinds[i])?);
            i += 1;
        }
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(v: FieldValue) {
        let mut buf = BytesMut::new();
        write_value(&mut buf, &v).unwrap();
        let mut frozen = buf.freeze();
        let decoded = read_value(&mut frozen).unwrap();
        assert_eq!(decoded, v);
        assert!(!frozen.has_remaining());
    }

    #[test]
    fn round_trip_all_scalar_kinds() {
        roundtrip(FieldValue::Boolean(true));
        roundtrip(FieldValue::Boolean(false));
        roundtrip(FieldValue::ShortShortInt(-5));
        roundtrip(FieldValue::ShortShortUInt(250));
        roundtrip(FieldValue::ShortInt(-1000));
        roundtrip(FieldValue::ShortUInt(60000));
        roundtrip(FieldValue::LongInt(-70000));
        roundtrip(FieldValue::LongUInt(4_000_000_000));
        roundtrip(FieldValue::LongLongInt(-1));
        roundtrip(FieldValue::LongLongUInt(u64::MAX));
        roundtrip(FieldValue::Float(1.5));
        roundtrip(FieldValue::Double(-2.25));
        roundtrip(FieldValue::Decimal(Decimal::new(2, 12345)));
        roundtrip(FieldValue::ShortString("hello".to_string()));
        roundtrip(FieldValue::LongString(b"a longer string".to_vec()));
        roundtrip(FieldValue::Timestamp(1_700_000_000));
        roundtrip(FieldValue::Void);
    }

    #[test]
    fn round_trip_array() {
        roundtrip(FieldValue::Array(vec![
            FieldValue::LongUInt(1),
            FieldValue::ShortString("x".to_string()),
            FieldValue::Boolean(true),
        ]));
    }

    #[test]
    fn round_trip_table_semantic_equality() {
        let mut table = FieldTable::new();
        table.insert("a", FieldValue::LongUInt(1));
        table.insert("b", FieldValue::ShortString("v".to_string()));
        roundtrip(FieldValue::Table(table));
    }

    #[test]
    fn shortstr_rejects_oversized_input() {
        let mut buf = BytesMut::new();
        let s = "x".repeat(300);
        let err = write_value(&mut buf, &FieldValue::ShortString(s)).unwrap_err();
        assert!(matches!(err, CodecError::StringTooLong(_)));
    }

    #[test]
    fn read_value_truncated_is_reported() {
        let mut buf = Bytes::from_static(&[tag::LONG_UINT, 0x00, 0x01]);
        let err = read_value(&mut buf).unwrap_err();
        assert!(matches!(err, CodecError::Truncated { .. }));
    }

    #[test]
    fn read_value_unknown_tag_is_reported() {
        let mut buf = Bytes::from_static(&[0xFF]);
        let err = read_value(&mut buf).unwrap_err();
        assert_eq!(err, CodecError::InvalidTag(0xFF));
    }

    #[test]
    fn bit_packing_produces_exact_byte_count() {
        for n in [1usize, 7, 8, 9, 16, 17] {
            let kinds = vec![ArgKind::Bit; n];
            let values: Vec<FieldValue> = (0..n).map(|i| FieldValue::Boolean(i % 2 == 0)).collect();
            let mut buf = BytesMut::new();
            write_native_sequence(&mut buf, &kinds, &values).unwrap();
            assert_eq!(buf.len(), n.div_ceil(8));

            let mut frozen = buf.freeze();
            let decoded = read_native_sequence(&mut frozen, &kinds).unwrap();
            assert_eq!(decoded, values);
        }
    }

    #[test]
    fn bit_packing_mixed_with_non_bit_arguments() {
        // bit bit bit | octet | bit bit | long-str
        let kinds = vec![
            ArgKind::Bit,
            ArgKind::Bit,
            ArgKind::Bit,
            ArgKind::Octet,
            ArgKind::Bit,
            ArgKind::Bit,
            ArgKind::LongStr,
        ];
        let values = vec![
            FieldValue::Boolean(true),
            FieldValue::Boolean(false),
            FieldValue::Boolean(true),
            FieldValue::ShortShortUInt(7),
            FieldValue::Boolean(false),
            FieldValue::Boolean(true),
            FieldValue::LongString(b"tail".to_vec()),
        ];
        let mut buf = BytesMut::new();
        write_native_sequence(&mut buf, &kinds, &values).unwrap();
        // first run: 3 bits -> 1 byte; octet -> 1 byte; second run: 2 bits -> 1 byte; long-str -> 4+4 bytes
        assert_eq!(buf.len(), 1 + 1 + 1 + (4 + 4));

        let mut frozen = buf.freeze();
        let decoded = read_native_sequence(&mut frozen, &kinds).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn native_sequence_arity_mismatch_is_rejected() {
        let kinds = vec![ArgKind::Octet, ArgKind::Octet];
        let values = vec![FieldValue::ShortShortUInt(1)];
        let err = write_native_sequence(&mut BytesMut::new(), &kinds, &values).unwrap_err();
        assert!(matches!(err, CodecError::TypeMismatch { .. }));
    }

    #[test]
    fn amqplain_unframed_table_entries_have_no_length_prefix() {
        let mut buf = BytesMut::new();
        write_table_entries_unframed(
            &mut buf,
            &[
                ("LOGIN", FieldValue::LongString(b"guest".to_vec())),
                ("PASSWORD", FieldValue::LongString(b"guest".to_vec())),
            ],
        )
        .unwrap();

        // No leading u32 length: first bytes are the short-string key length + "LOGIN".
        assert_eq!(buf[0] as usize, "LOGIN".len());
        assert_eq!(&buf[1..6], b"LOGIN");
    }
}
