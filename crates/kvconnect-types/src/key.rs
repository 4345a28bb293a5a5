//! Order-preserving composite key codec.
//!
//! A [`Key`] is a tuple of typed [`KeyPart`]s. [`pack`] turns it into bytes
//! whose lexicographic order equals the tuple order, so range reads on the
//! server can be expressed as plain byte ranges:
//!
//! - every part starts with a type tag; tag order is the canonical type order
//!   `bytes < string < float < integer < boolean`
//! - bytes and strings escape interior `0x00` as `0x00 0xFF` and end with a bare
//!   `0x00`, so `["a"]` never looks like a prefix of `["a\0"]`
//! - floats are stored big-endian with negative values fully inverted and
//!   positive values sign-flipped (the same order as [`f64::total_cmp`])
//! - integers are stored as 16-byte big-endian two's complement with the sign
//!   bit flipped

use crate::error::DecodeError;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

const BYTES: u8 = 0x01;
const STRING: u8 = 0x02;
const FLOAT: u8 = 0x21;
const INTEGER: u8 = 0x22;
const FALSE: u8 = 0x26;
const TRUE: u8 = 0x27;

const TERMINATOR: u8 = 0x00;
const ESCAPE: u8 = 0xFF;

const SIGN_64: u64 = 1 << 63;
const SIGN_128: u128 = 1 << 127;

/// One typed component of a composite key.
#[derive(Debug, Clone)]
pub enum KeyPart {
    Bytes(Vec<u8>),
    String(String),
    Float(f64),
    Int(i128),
    Bool(bool),
}

impl KeyPart {
    fn rank(&self) -> u8 {
        match self {
            KeyPart::Bytes(_) => 0,
            KeyPart::String(_) => 1,
            KeyPart::Float(_) => 2,
            KeyPart::Int(_) => 3,
            KeyPart::Bool(_) => 4,
        }
    }
}

impl Ord for KeyPart {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (KeyPart::Bytes(a), KeyPart::Bytes(b)) => a.cmp(b),
            (KeyPart::String(a), KeyPart::String(b)) => a.as_bytes().cmp(b.as_bytes()),
            (KeyPart::Float(a), KeyPart::Float(b)) => a.total_cmp(b),
            (KeyPart::Int(a), KeyPart::Int(b)) => a.cmp(b),
            (KeyPart::Bool(a), KeyPart::Bool(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for KeyPart {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for KeyPart {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for KeyPart {}

impl Hash for KeyPart {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            KeyPart::Bytes(b) => b.hash(state),
            KeyPart::String(s) => s.hash(state),
            KeyPart::Float(f) => f.to_bits().hash(state),
            KeyPart::Int(i) => i.hash(state),
            KeyPart::Bool(b) => b.hash(state),
        }
    }
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Bytes(b) => write!(f, "0x{}", hex::encode(b)),
            KeyPart::String(s) => write!(f, "{:?}", s),
            KeyPart::Float(n) => write!(f, "{}", n),
            KeyPart::Int(i) => write!(f, "{}n", i),
            KeyPart::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for KeyPart {
    fn from(value: &str) -> Self {
        KeyPart::String(value.to_string())
    }
}

impl From<String> for KeyPart {
    fn from(value: String) -> Self {
        KeyPart::String(value)
    }
}

impl From<Vec<u8>> for KeyPart {
    fn from(value: Vec<u8>) -> Self {
        KeyPart::Bytes(value)
    }
}

impl From<&[u8]> for KeyPart {
    fn from(value: &[u8]) -> Self {
        KeyPart::Bytes(value.to_vec())
    }
}

impl From<f64> for KeyPart {
    fn from(value: f64) -> Self {
        KeyPart::Float(value)
    }
}

impl From<i64> for KeyPart {
    fn from(value: i64) -> Self {
        KeyPart::Int(i128::from(value))
    }
}

impl From<i128> for KeyPart {
    fn from(value: i128) -> Self {
        KeyPart::Int(value)
    }
}

impl From<bool> for KeyPart {
    fn from(value: bool) -> Self {
        KeyPart::Bool(value)
    }
}

/// Composite ordered key. The empty key is the root prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(Vec<KeyPart>);

impl Key {
    pub fn new(parts: Vec<KeyPart>) -> Self {
        Self(parts)
    }

    pub fn root() -> Self {
        Self::default()
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append a part, builder style.
    pub fn with(mut self, part: impl Into<KeyPart>) -> Self {
        self.0.push(part.into());
        self
    }

    pub fn push(&mut self, part: impl Into<KeyPart>) {
        self.0.push(part.into());
    }

    pub fn starts_with(&self, prefix: &Key) -> bool {
        self.0.starts_with(&prefix.0)
    }

    pub fn pack(&self) -> Vec<u8> {
        pack(self)
    }
}

impl From<Vec<KeyPart>> for Key {
    fn from(parts: Vec<KeyPart>) -> Self {
        Self(parts)
    }
}

impl FromIterator<KeyPart> for Key {
    fn from_iter<I: IntoIterator<Item = KeyPart>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", part)?;
        }
        write!(f, "]")
    }
}

/// Build a [`Key`] from anything convertible into [`KeyPart`].
///
/// ```
/// use kvconnect_types::{key, KeyPart};
///
/// let k = key!["users", 42i64, true];
/// assert_eq!(k.parts()[1], KeyPart::Int(42));
/// ```
#[macro_export]
macro_rules! key {
    ($($part:expr),* $(,)?) => {
        $crate::Key::new(vec![$($crate::KeyPart::from($part)),*])
    };
}

/// Encode a key into its order-preserving byte form.
pub fn pack(key: &Key) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() * 10);
    for part in key.parts() {
        encode_part(part, &mut out);
    }
    out
}

fn encode_part(part: &KeyPart, out: &mut Vec<u8>) {
    match part {
        KeyPart::Bytes(b) => {
            out.push(BYTES);
            append_escaped(b, out);
        }
        KeyPart::String(s) => {
            out.push(STRING);
            append_escaped(s.as_bytes(), out);
        }
        KeyPart::Float(n) => {
            out.push(FLOAT);
            let bits = n.to_bits();
            let mapped = if bits & SIGN_64 != 0 {
                !bits
            } else {
                bits ^ SIGN_64
            };
            out.extend_from_slice(&mapped.to_be_bytes());
        }
        KeyPart::Int(i) => {
            out.push(INTEGER);
            let shifted = (*i as u128) ^ SIGN_128;
            out.extend_from_slice(&shifted.to_be_bytes());
        }
        KeyPart::Bool(false) => out.push(FALSE),
        KeyPart::Bool(true) => out.push(TRUE),
    }
}

fn append_escaped(bytes: &[u8], out: &mut Vec<u8>) {
    for byte in bytes {
        if *byte == TERMINATOR {
            out.extend_from_slice(&[TERMINATOR, ESCAPE]);
        } else {
            out.push(*byte);
        }
    }
    out.push(TERMINATOR);
}

/// Decode bytes produced by [`pack`].
pub fn unpack(bytes: &[u8]) -> Result<Key, DecodeError> {
    let mut parts = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let tag = bytes[pos];
        pos += 1;

        let part = match tag {
            BYTES => {
                let (raw, next) = read_escaped(bytes, pos)?;
                pos = next;
                KeyPart::Bytes(raw)
            }
            STRING => {
                let start = pos;
                let (raw, next) = read_escaped(bytes, pos)?;
                pos = next;
                let s = String::from_utf8(raw)
                    .map_err(|_| DecodeError::InvalidUtf8 { offset: start })?;
                KeyPart::String(s)
            }
            FLOAT => {
                let raw: [u8; 8] = read_fixed(bytes, pos)?;
                pos += 8;
                let mapped = u64::from_be_bytes(raw);
                let bits = if mapped & SIGN_64 != 0 {
                    mapped ^ SIGN_64
                } else {
                    !mapped
                };
                KeyPart::Float(f64::from_bits(bits))
            }
            INTEGER => {
                let raw: [u8; 16] = read_fixed(bytes, pos)?;
                pos += 16;
                KeyPart::Int((u128::from_be_bytes(raw) ^ SIGN_128) as i128)
            }
            FALSE => KeyPart::Bool(false),
            TRUE => KeyPart::Bool(true),
            other => {
                return Err(DecodeError::UnknownTag {
                    tag: other,
                    offset: pos - 1,
                })
            }
        };
        parts.push(part);
    }

    Ok(Key(parts))
}

fn read_escaped(bytes: &[u8], mut pos: usize) -> Result<(Vec<u8>, usize), DecodeError> {
    let mut out = Vec::new();
    loop {
        match bytes.get(pos) {
            None => return Err(DecodeError::Truncated { offset: pos }),
            Some(&TERMINATOR) => {
                if bytes.get(pos + 1) == Some(&ESCAPE) {
                    out.push(TERMINATOR);
                    pos += 2;
                } else {
                    return Ok((out, pos + 1));
                }
            }
            Some(&b) => {
                out.push(b);
                pos += 1;
            }
        }
    }
}

fn read_fixed<const N: usize>(bytes: &[u8], pos: usize) -> Result<[u8; N], DecodeError> {
    bytes
        .get(pos..pos + N)
        .and_then(|slice| slice.try_into().ok())
        .ok_or(DecodeError::Truncated {
            offset: bytes.len(),
        })
}

/// Byte range `[start, end)` matching exactly `key`.
pub fn point_range(key: &Key) -> (Vec<u8>, Vec<u8>) {
    let start = pack(key);
    let mut end = start.clone();
    end.push(0x00);
    (start, end)
}

/// Byte range `[start, end)` matching every key strictly below `prefix`.
///
/// The prefix key itself is not part of the range.
pub fn prefix_range(prefix: &Key) -> (Vec<u8>, Vec<u8>) {
    let packed = pack(prefix);
    let mut start = packed.clone();
    start.push(0x00);
    let mut end = packed;
    end.push(0xFF);
    (start, end)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_packed_order(a: &Key, b: &Key) {
        assert!(a < b, "{} should sort before {}", a, b);
        assert!(
            pack(a) < pack(b),
            "packed {} should sort before packed {}",
            a,
            b
        );
    }

    #[test]
    fn test_type_rank_order() {
        let ordered = [
            key![vec![0xFFu8]],
            key![""],
            key![f64::NEG_INFINITY],
            key![i128::MIN],
            key![false],
            key![true],
        ];
        for pair in ordered.windows(2) {
            assert_packed_order(&pair[0], &pair[1]);
        }
    }

    #[test]
    fn test_embedded_zero_bytes_sort_correctly() {
        let a = key![b"a".as_slice()];
        let b = key![b"a\0".as_slice()];
        let c = key![b"a\x01".as_slice()];
        assert_packed_order(&a, &b);
        assert_packed_order(&b, &c);

        let s1 = key!["a", "z"];
        let s2 = key!["a\0"];
        assert_packed_order(&s1, &s2);
    }

    #[test]
    fn test_float_order() {
        let values = [
            f64::NEG_INFINITY,
            -1e300,
            -1.5,
            -0.0,
            0.0,
            f64::MIN_POSITIVE,
            2.5,
            f64::INFINITY,
        ];
        for pair in values.windows(2) {
            assert_packed_order(&key![pair[0]], &key![pair[1]]);
        }
    }

    #[test]
    fn test_integer_order() {
        let values = [i128::MIN, -(1i128 << 70), -1, 0, 1, 1i128 << 64, i128::MAX];
        for pair in values.windows(2) {
            assert_packed_order(&key![pair[0]], &key![pair[1]]);
        }
    }

    #[test]
    fn test_prefix_sorts_before_extension() {
        assert_packed_order(&key!["users"], &key!["users", 1i64]);
        assert_packed_order(&Key::root(), &key![false]);
    }

    #[test]
    fn test_roundtrip_mixed_key() {
        let k = key![
            b"\x00raw\x00".as_slice(),
            "na\0me",
            -3.25,
            i128::MIN,
            true,
            false
        ];
        let packed = pack(&k);
        assert_eq!(unpack(&packed).unwrap(), k);
        assert_eq!(unpack(&[]).unwrap(), Key::root());
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let err = unpack(&[0x02, b'a', 0x00, 0x99]).unwrap_err();
        assert_eq!(err, DecodeError::UnknownTag { tag: 0x99, offset: 3 });
    }

    #[test]
    fn test_truncated_input_rejected() {
        assert!(matches!(
            unpack(&[0x02, b'a']),
            Err(DecodeError::Truncated { .. })
        ));
        assert!(matches!(
            unpack(&[0x21, 0x80, 0x00]),
            Err(DecodeError::Truncated { .. })
        ));
        assert!(matches!(
            unpack(&[0x22; 5]),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        assert_eq!(
            unpack(&[0x02, 0xC3, 0x28, 0x00]).unwrap_err(),
            DecodeError::InvalidUtf8 { offset: 1 }
        );
    }

    #[test]
    fn test_point_and_prefix_ranges() {
        let prefix = key!["users"];
        let (start, end) = prefix_range(&prefix);
        let member = pack(&key!["users", "alice"]);
        assert!(start <= member && member < end);
        assert!(pack(&prefix) < start);
        assert!(pack(&key!["usersx"]) >= end);

        let (p_start, p_end) = point_range(&prefix);
        assert_eq!(p_start, pack(&prefix));
        assert!(member >= p_end);
    }

    #[test]
    fn test_display() {
        let k = key!["a", 1i64, 2.5, true, vec![0xABu8]];
        assert_eq!(k.to_string(), r#"["a", 1n, 2.5, true, 0xab]"#);
    }
}
