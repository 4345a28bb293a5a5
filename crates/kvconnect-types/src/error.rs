use thiserror::Error;

/// Centralized error type for the KV Connect client.
///
/// `CheckFailed` outcomes of an atomic write are deliberately not part of this
/// enum: they are regular results that optimistic-concurrency loops branch on.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error(
        "Consistency violated at {endpoint} after metadata refresh \
         (read_disabled={read_disabled}, strongly_consistent={read_is_strongly_consistent}, status={status})"
    )]
    Consistency {
        endpoint: String,
        read_disabled: bool,
        read_is_strongly_consistent: bool,
        status: i32,
    },

    #[error("Transport failed for {url} after {attempts} attempts: {message}")]
    Transport {
        url: String,
        attempts: u32,
        status: Option<u16>,
        message: String,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
}

/// Violations of the KV Connect protocol contract.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Server protocol version {version} is not in the supported set {supported:?}")]
    UnsupportedVersion { version: u32, supported: Vec<u32> },

    #[error("Malformed metadata: {0}")]
    MalformedMetadata(String),

    #[error("Metadata carries an empty token")]
    EmptyToken,

    #[error("Metadata lists no endpoints")]
    NoEndpoints,

    #[error("No endpoint available for {consistency} consistency")]
    NoEndpoint { consistency: String },

    #[error("Unexpected status {status} from {url}: {body}")]
    UnexpectedStatus {
        url: String,
        status: u16,
        body: String,
    },

    #[error("Unexpected content type {content_type:?} from {url}")]
    UnexpectedContentType {
        url: String,
        content_type: Option<String>,
    },

    #[error("Invalid protobuf message: {0}")]
    InvalidMessage(String),

    #[error("Stream ended mid-frame: expected {expected} bytes, {available} available")]
    Truncated { expected: usize, available: usize },

    #[error("Reads are disabled on this endpoint")]
    ReadDisabled,

    #[error("Writes are disabled on this endpoint")]
    WriteDisabled,

    #[error("Unexpected {operation} status {status}")]
    UnexpectedOutcome {
        operation: &'static str,
        status: i32,
    },
}

/// Errors while decoding keys, versionstamps, values or cursors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Key truncated at byte {offset}")]
    Truncated { offset: usize },

    #[error("Unknown key type tag 0x{tag:02x} at byte {offset}")]
    UnknownTag { tag: u8, offset: usize },

    #[error("Invalid UTF-8 in string key part at byte {offset}")]
    InvalidUtf8 { offset: usize },

    #[error("Invalid versionstamp: {0}")]
    InvalidVersionstamp(String),

    #[error("Invalid value: {0}")]
    Value(String),

    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the failure came from exhausting transport retries.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport { .. })
    }

    /// HTTP status carried by the failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Transport { status, .. } => *status,
            Error::Protocol(ProtocolError::UnexpectedStatus { status, .. }) => Some(*status),
            _ => None,
        }
    }
}
