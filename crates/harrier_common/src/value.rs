//! Property values and their order-preserving byte encoding.
//!
//! The index accessor keys its tree by the encoded form, so the encoding must
//! be injective per value and preserve ordering within a type: big-endian
//! with a sign flip for integers, the IEEE 754 total-order trick for floats,
//! and a 0x00 terminator for text. Text bytes escape embedded 0x00 so the
//! terminator stays unambiguous when values are concatenated into tuples.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single property value. The store keeps these per entity per key; the
/// index keys entries by the encoded tuple of all scoped values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Boolean(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl PropertyValue {
    /// Append the order-preserving encoding of this value to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            PropertyValue::Boolean(b) => {
                buf.push(0x01);
                buf.push(if *b { 1 } else { 0 });
            }
            PropertyValue::Int(v) => {
                buf.push(0x02);
                // Big-endian with sign flip for correct ordering
                let encoded = (*v as u64) ^ (1u64 << 63);
                buf.extend_from_slice(&encoded.to_be_bytes());
            }
            PropertyValue::Float(v) => {
                buf.push(0x03);
                let bits = v.to_bits();
                let encoded = if bits & (1u64 << 63) != 0 {
                    !bits
                } else {
                    bits ^ (1u64 << 63)
                };
                buf.extend_from_slice(&encoded.to_be_bytes());
            }
            PropertyValue::Text(s) => {
                buf.push(0x04);
                for &b in s.as_bytes() {
                    buf.push(b);
                    if b == 0x00 {
                        // Escape embedded NUL; 0x00 0xFF still sorts below 0x01
                        buf.push(0xFF);
                    }
                }
                buf.push(0x00); // terminator
            }
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Boolean(b) => write!(f, "{b}"),
            PropertyValue::Int(v) => write!(f, "{v}"),
            PropertyValue::Float(v) => write!(f, "{v}"),
            PropertyValue::Text(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Boolean(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Float(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::Text(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::Text(v)
    }
}

/// The indexed value of one entity: one property value per scoped key, in
/// descriptor key order. Single-key indexes use a one-element tuple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueTuple(pub Vec<PropertyValue>);

impl ValueTuple {
    pub fn single(value: impl Into<PropertyValue>) -> Self {
        ValueTuple(vec![value.into()])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Order-preserving concatenated encoding of all values. Injective:
    /// distinct tuples never share an encoding.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.0.len() * 10);
        for value in &self.0 {
            value.encode_into(&mut buf);
        }
        buf
    }
}

impl fmt::Display for ValueTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{v}")?;
        }
        write!(f, ")")
    }
}

impl From<PropertyValue> for ValueTuple {
    fn from(v: PropertyValue) -> Self {
        ValueTuple(vec![v])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enc(v: impl Into<PropertyValue>) -> Vec<u8> {
        ValueTuple::single(v).encode()
    }

    #[test]
    fn int_encoding_orders_across_sign() {
        let vals = [i64::MIN, -100, -1, 0, 1, 100, i64::MAX];
        let encoded: Vec<Vec<u8>> = vals.iter().map(|v| enc(*v)).collect();
        for w in encoded.windows(2) {
            assert!(w[0] < w[1], "{:?} !< {:?}", w[0], w[1]);
        }
    }

    #[test]
    fn float_encoding_orders_across_sign() {
        let vals = [f64::NEG_INFINITY, -2.5, -0.5, 0.0, 0.5, 2.5, f64::INFINITY];
        let encoded: Vec<Vec<u8>> = vals.iter().map(|v| enc(*v)).collect();
        for w in encoded.windows(2) {
            assert!(w[0] < w[1]);
        }
    }

    #[test]
    fn text_encoding_orders_lexicographically() {
        assert!(enc("a") < enc("b"));
        assert!(enc("a") < enc("ab"));
        assert!(enc("") < enc("a"));
    }

    #[test]
    fn tuple_boundaries_are_unambiguous() {
        let split_a = ValueTuple(vec!["ab".into(), "c".into()]).encode();
        let split_b = ValueTuple(vec!["a".into(), "bc".into()]).encode();
        assert_ne!(split_a, split_b);

        // Embedded NUL followed by a byte that mimics a type tag must not
        // collide with a genuine two-value tuple.
        let embedded = ValueTuple::single("a\u{0}\u{4}b").encode();
        let pair = ValueTuple(vec!["a".into(), "b".into()]).encode();
        assert_ne!(embedded, pair);
    }

    #[test]
    fn distinct_types_never_collide() {
        let one_int = enc(1i64);
        let one_float = enc(1.0f64);
        let one_text = enc("1");
        assert_ne!(one_int, one_float);
        assert_ne!(one_int, one_text);
        assert_ne!(one_float, one_text);
    }

    #[test]
    fn encoding_is_deterministic() {
        let t = ValueTuple(vec![true.into(), 42i64.into(), "x".into()]);
        assert_eq!(t.encode(), t.encode());
    }

    #[test]
    fn display_is_compact() {
        let t = ValueTuple(vec![1i64.into(), "v".into()]);
        assert_eq!(t.to_string(), "(1, \"v\")");
    }
}
