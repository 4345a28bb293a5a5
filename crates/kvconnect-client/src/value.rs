//! Stored values and the pluggable value codec.

use kvconnect_proto as proto;
use kvconnect_types::{unpack, DecodeError, Error, Key, Result, Versionstamp};

/// A value stored under a key.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Raw bytes, stored verbatim.
    Bytes(Vec<u8>),
    /// 64-bit unsigned integer, the operand type of sum/min/max mutations.
    U64(u64),
    /// Structured value, handed to the serializer slot of the codec.
    Json(serde_json::Value),
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Value::Bytes(value.to_vec())
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::U64(value)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Value::Json(value)
    }
}

/// How value bytes are to be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueEncoding {
    /// Payload produced by the configured serializer.
    Serialized,
    /// 8-byte little-endian unsigned integer.
    Le64,
    /// Opaque bytes.
    Bytes,
}

impl ValueEncoding {
    pub fn to_wire(self) -> i32 {
        let wire = match self {
            ValueEncoding::Serialized => proto::ValueEncoding::VeV8,
            ValueEncoding::Le64 => proto::ValueEncoding::VeLe64,
            ValueEncoding::Bytes => proto::ValueEncoding::VeBytes,
        };
        wire as i32
    }

    pub fn from_wire(value: i32) -> std::result::Result<Self, DecodeError> {
        match proto::ValueEncoding::try_from(value) {
            Ok(proto::ValueEncoding::VeV8) => Ok(ValueEncoding::Serialized),
            Ok(proto::ValueEncoding::VeLe64) => Ok(ValueEncoding::Le64),
            Ok(proto::ValueEncoding::VeBytes) => Ok(ValueEncoding::Bytes),
            _ => Err(DecodeError::Value(format!("unknown value encoding {}", value))),
        }
    }
}

/// Strategy for turning [`Value`]s into stored payloads and back.
///
/// Inject a custom implementation through
/// [`ClientConfig::with_value_codec`](crate::ClientConfig::with_value_codec)
/// when the database is shared with clients that use another serializer.
pub trait ValueCodec: Send + Sync + 'static {
    fn encode(&self, value: &Value) -> Result<(Vec<u8>, ValueEncoding)>;

    fn decode(&self, data: &[u8], encoding: ValueEncoding) -> Result<Value>;
}

/// Bytes verbatim, integers as little-endian u64, structured values as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultValueCodec;

impl ValueCodec for DefaultValueCodec {
    fn encode(&self, value: &Value) -> Result<(Vec<u8>, ValueEncoding)> {
        match value {
            Value::Bytes(b) => Ok((b.clone(), ValueEncoding::Bytes)),
            Value::U64(n) => Ok((n.to_le_bytes().to_vec(), ValueEncoding::Le64)),
            Value::Json(v) => {
                let data = serde_json::to_vec(v)
                    .map_err(|e| Error::Decode(DecodeError::Value(e.to_string())))?;
                Ok((data, ValueEncoding::Serialized))
            }
        }
    }

    fn decode(&self, data: &[u8], encoding: ValueEncoding) -> Result<Value> {
        match encoding {
            ValueEncoding::Bytes => Ok(Value::Bytes(data.to_vec())),
            ValueEncoding::Le64 => Ok(Value::U64(decode_le64(data)?)),
            ValueEncoding::Serialized => serde_json::from_slice(data)
                .map(Value::Json)
                .map_err(|e| DecodeError::Value(format!("serialized payload: {}", e)).into()),
        }
    }
}

pub(crate) fn decode_le64(data: &[u8]) -> std::result::Result<u64, DecodeError> {
    let raw: [u8; 8] = data.try_into().map_err(|_| {
        DecodeError::Value(format!("expected 8 bytes for u64, got {}", data.len()))
    })?;
    Ok(u64::from_le_bytes(raw))
}

/// A key with its current value and versionstamp.
///
/// Absent keys carry `None` for both.
#[derive(Debug, Clone, PartialEq)]
pub struct KvEntry {
    pub key: Key,
    pub value: Option<Value>,
    pub versionstamp: Option<Versionstamp>,
}

impl KvEntry {
    pub fn absent(key: Key) -> Self {
        Self {
            key,
            value: None,
            versionstamp: None,
        }
    }

    pub fn exists(&self) -> bool {
        self.versionstamp.is_some()
    }
}

/// Decode a wire entry, using the key stored in the entry itself.
pub(crate) fn decode_entry(codec: &dyn ValueCodec, entry: proto::KvEntry) -> Result<KvEntry> {
    let key = unpack(&entry.key)?;
    decode_entry_for(codec, key, entry)
}

/// Decode a wire entry reported for `key`. An empty versionstamp means absent.
pub(crate) fn decode_entry_for(
    codec: &dyn ValueCodec,
    key: Key,
    entry: proto::KvEntry,
) -> Result<KvEntry> {
    if entry.versionstamp.is_empty() {
        return Ok(KvEntry::absent(key));
    }
    let versionstamp = Versionstamp::try_from(entry.versionstamp.as_slice())?;
    let encoding = ValueEncoding::from_wire(entry.encoding)?;
    let value = codec.decode(&entry.value, encoding)?;
    Ok(KvEntry {
        key,
        value: Some(value),
        versionstamp: Some(versionstamp),
    })
}
