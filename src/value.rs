//! AMQP 0-9-1 field-value type system.
//!
//! Every piece of data carried inside a method's argument block, a
//! content-header's properties, or a field table is one of the
//! variants of [`FieldValue`]. See `codec.rs` for the wire encoding.
//!
//! # Examples
//!
//! ```rust
//! use dumq_amqp::value::{FieldValue, FieldTable};
//!
//! let mut headers = FieldTable::new();
//! headers.insert("x-retry-count", FieldValue::LongUInt(3));
//! assert_eq!(headers.get("x-retry-count"), Some(&FieldValue::LongUInt(3)));
//! ```

use serde::{Deserialize, Serialize};

/// A tagged AMQP field value.
///
/// `Bit` is intentionally absent: bits only exist as a packing
/// convention inside method-argument and content-header blocks (see
/// `codec::read_native_sequence`), never as a standalone tagged value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Boolean(bool),
    ShortShortInt(i8),
    ShortShortUInt(u8),
    ShortInt(i16),
    ShortUInt(u16),
    LongInt(i32),
    LongUInt(u32),
    LongLongInt(i64),
    LongLongUInt(u64),
    Float(f32),
    Double(f64),
    Decimal(Decimal),
    ShortString(String),
    LongString(Vec<u8>),
    Array(Vec<FieldValue>),
    Timestamp(i64),
    Table(FieldTable),
    Void,
}

impl FieldValue {
    pub fn as_long_string_utf8(&self) -> Option<&str> {
        match self {
            FieldValue::LongString(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }

    pub fn as_short_string(&self) -> Option<&str> {
        match self {
            FieldValue::ShortString(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Boolean(_) => "boolean",
            FieldValue::ShortShortInt(_) => "short-short-int",
            FieldValue::ShortShortUInt(_) => "short-short-uint",
            FieldValue::ShortInt(_) => "short-int",
            FieldValue::ShortUInt(_) => "short-uint",
            FieldValue::LongInt(_) => "long-int",
            FieldValue::LongUInt(_) => "long-uint",
            FieldValue::LongLongInt(_) => "long-long-int",
            FieldValue::LongLongUInt(_) => "long-long-uint",
            FieldValue::Float(_) => "float",
            FieldValue::Double(_) => "double",
            FieldValue::Decimal(_) => "decimal",
            FieldValue::ShortString(_) => "short-string",
            FieldValue::LongString(_) => "long-string",
            FieldValue::Array(_) => "array",
            FieldValue::Timestamp(_) => "timestamp",
            FieldValue::Table(_) => "table",
            FieldValue::Void => "void",
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::LongString(s.as_bytes().to_vec())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::LongString(s.into_bytes())
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Boolean(b)
    }
}

/// A decimal value `value * 10^(-scale)`, matching the AMQP wire
/// encoding of a one-byte scale and a four-byte signed mantissa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decimal {
    pub scale: u8,
    pub value: i32,
}

impl Decimal {
    pub fn new(scale: u8, value: i32) -> Self {
        Decimal { scale, value }
    }

    pub fn to_f64(&self) -> f64 {
        self.value as f64 * 10f64.powi(-(self.scale as i32))
    }
}

impl std::fmt::Display for Decimal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let negative = self.value < 0;
        let magnitude = self.value.unsigned_abs();
        let mut digits = magnitude.to_string();

        if self.scale > 0 {
            if self.scale > 10 {
                let e_value = self.scale as i32 - digits.len() as i32 + 1;
                digits.insert(1, '.');
                digits.push_str("e-");
                digits.push_str(&e_value.to_string());
            } else {
                let scale = self.scale as usize;
                if digits.len() < scale + 1 {
                    let pad = scale + 1 - digits.len();
                    digits = "0".repeat(pad) + &digits;
                }
                let point_at = digits.len() - scale;
                digits.insert(point_at, '.');
            }
        }

        if negative {
            write!(f, "-{}", digits)
        } else {
            write!(f, "{}", digits)
        }
    }
}

/// An ordered field table: `short-string key -> FieldValue`.
///
/// Kept as a `Vec` rather than a `HashMap` because the wire order of
/// a table received from a peer is real (even though the protocol
/// does not mandate one), and tests that round-trip a peer-supplied
/// table should not be forced through hash-order comparison.
/// `PartialEq` is semantic: key-set equality plus per-key value
/// equality, independent of entry order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldTable(pub Vec<(String, FieldValue)>);

impl FieldTable {
    pub fn new() -> Self {
        FieldTable(Vec::new())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: FieldValue) {
        let key = key.into();
        if let Some(slot) = self.0.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.0.push((key, value));
        }
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, FieldValue)> {
        self.0.iter()
    }
}

impl PartialEq for FieldTable {
    fn eq(&self, other: &Self) -> bool {
        if self.0.len() != other.0.len() {
            return false;
        }
        self.0.iter().all(|(k, v)| other.get(k) == Some(v))
    }
}

impl FromIterator<(String, FieldValue)> for FieldTable {
    fn from_iter<T: IntoIterator<Item = (String, FieldValue)>>(iter: T) -> Self {
        let mut table = FieldTable::new();
        for (k, v) in iter {
            table.insert(k, v);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_to_string_matches_scale() {
        assert_eq!(Decimal::new(2, 12345).to_string(), "123.45");
        assert_eq!(Decimal::new(0, 42).to_string(), "42");
        assert_eq!(Decimal::new(3, -1).to_string(), "-0.001");
    }

    #[test]
    fn decimal_to_f64() {
        let d = Decimal::new(2, 12345);
        assert!((d.to_f64() - 123.45).abs() < 1e-9);
    }

    #[test]
    fn field_table_semantic_equality_ignores_order() {
        let mut a = FieldTable::new();
        a.insert("x", FieldValue::LongUInt(1));
        a.insert("y", FieldValue::Boolean(true));

        let mut b = FieldTable::new();
        b.insert("y", FieldValue::Boolean(true));
        b.insert("x", FieldValue::LongUInt(1));

        assert_eq!(a, b);
    }

    #[test]
    fn field_table_insert_overwrites_existing_key() {
        let mut t = FieldTable::new();
        t.insert("k", FieldValue::LongUInt(1));
        t.insert("k", FieldValue::LongUInt(2));
        assert_eq!(t.len(), 1);
        assert_eq!(t.get("k"), Some(&FieldValue::LongUInt(2)));
    }
}
