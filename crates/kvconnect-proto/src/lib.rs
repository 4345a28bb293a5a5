//! # kvconnect-proto
//!
//! Protocol buffer messages for the KV Connect data path.
//!
//! These are the request/response bodies exchanged with `snapshot_read`,
//! `atomic_write` and `watch` endpoints:
//!
//! - `SnapshotRead` / `SnapshotReadOutput` - range reads
//! - `AtomicWrite` / `AtomicWriteOutput` - checks, mutations and enqueues
//! - `Watch` / `WatchOutput` - per-key change reports on the watch stream
//!
//! ## Usage
//!
//! ```rust
//! use kvconnect_proto::{Message, ReadRange, SnapshotRead};
//!
//! let req = SnapshotRead {
//!     ranges: vec![ReadRange { start: vec![0x02], end: vec![0x03], limit: 1, reverse: false }],
//! };
//! let bytes = req.encode_to_vec();
//! assert_eq!(SnapshotRead::decode(bytes.as_slice()).unwrap(), req);
//! ```

/// Data path messages, laid out as the schema compiler would emit them.
pub mod datapath {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct SnapshotRead {
        #[prost(message, repeated, tag = "1")]
        pub ranges: Vec<ReadRange>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct SnapshotReadOutput {
        #[prost(message, repeated, tag = "1")]
        pub ranges: Vec<ReadRangeOutput>,
        #[prost(bool, tag = "2")]
        pub read_disabled: bool,
        #[prost(string, repeated, tag = "3")]
        pub regions_if_read_disabled: Vec<String>,
        #[prost(bool, tag = "4")]
        pub read_is_strongly_consistent: bool,
        #[prost(string, tag = "5")]
        pub primary_if_not_strongly_consistent: String,
        #[prost(enumeration = "SnapshotReadStatus", tag = "8")]
        pub status: i32,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum SnapshotReadStatus {
        SrUnspecified = 0,
        SrSuccess = 1,
        SrReadDisabled = 2,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ReadRange {
        #[prost(bytes = "vec", tag = "1")]
        pub start: Vec<u8>,
        #[prost(bytes = "vec", tag = "2")]
        pub end: Vec<u8>,
        #[prost(int32, tag = "3")]
        pub limit: i32,
        #[prost(bool, tag = "4")]
        pub reverse: bool,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ReadRangeOutput {
        #[prost(message, repeated, tag = "1")]
        pub values: Vec<KvEntry>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct AtomicWrite {
        #[prost(message, repeated, tag = "1")]
        pub checks: Vec<Check>,
        #[prost(message, repeated, tag = "2")]
        pub mutations: Vec<Mutation>,
        #[prost(message, repeated, tag = "3")]
        pub enqueues: Vec<Enqueue>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct AtomicWriteOutput {
        #[prost(enumeration = "AtomicWriteStatus", tag = "1")]
        pub status: i32,
        #[prost(bytes = "vec", tag = "2")]
        pub versionstamp: Vec<u8>,
        #[prost(string, tag = "3")]
        pub primary_if_write_disabled: String,
        #[prost(uint32, repeated, tag = "4")]
        pub failed_checks: Vec<u32>,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum AtomicWriteStatus {
        AwUnspecified = 0,
        AwSuccess = 1,
        AwCheckFailure = 2,
        AwWriteDisabled = 5,
    }

    /// Versionstamp check; an empty `versionstamp` asserts the key is absent.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Check {
        #[prost(bytes = "vec", tag = "1")]
        pub key: Vec<u8>,
        #[prost(bytes = "vec", tag = "2")]
        pub versionstamp: Vec<u8>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Mutation {
        #[prost(bytes = "vec", tag = "1")]
        pub key: Vec<u8>,
        #[prost(message, optional, tag = "2")]
        pub value: Option<KvValue>,
        #[prost(enumeration = "MutationType", tag = "3")]
        pub mutation_type: i32,
        #[prost(int64, tag = "4")]
        pub expire_at_ms: i64,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum MutationType {
        MUnspecified = 0,
        MSet = 1,
        MDelete = 2,
        MSum = 3,
        MMax = 4,
        MMin = 5,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct KvValue {
        #[prost(bytes = "vec", tag = "1")]
        pub data: Vec<u8>,
        #[prost(enumeration = "ValueEncoding", tag = "2")]
        pub encoding: i32,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct KvEntry {
        #[prost(bytes = "vec", tag = "1")]
        pub key: Vec<u8>,
        #[prost(bytes = "vec", tag = "2")]
        pub value: Vec<u8>,
        #[prost(enumeration = "ValueEncoding", tag = "3")]
        pub encoding: i32,
        #[prost(bytes = "vec", tag = "4")]
        pub versionstamp: Vec<u8>,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum ValueEncoding {
        VeUnspecified = 0,
        VeV8 = 1,
        VeLe64 = 2,
        VeBytes = 3,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Enqueue {
        #[prost(bytes = "vec", tag = "1")]
        pub payload: Vec<u8>,
        #[prost(int64, tag = "2")]
        pub deadline_ms: i64,
        #[prost(bytes = "vec", repeated, tag = "3")]
        pub keys_if_undelivered: Vec<Vec<u8>>,
        #[prost(uint32, repeated, tag = "4")]
        pub backoff_schedule: Vec<u32>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Watch {
        #[prost(message, repeated, tag = "1")]
        pub keys: Vec<WatchKey>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct WatchKey {
        #[prost(bytes = "vec", tag = "1")]
        pub key: Vec<u8>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct WatchOutput {
        #[prost(enumeration = "SnapshotReadStatus", tag = "1")]
        pub status: i32,
        #[prost(message, repeated, tag = "2")]
        pub keys: Vec<WatchKeyOutput>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct WatchKeyOutput {
        #[prost(bool, tag = "1")]
        pub changed: bool,
        #[prost(message, optional, tag = "2")]
        pub entry_if_changed: Option<KvEntry>,
    }
}

pub use prost::Message;

// Re-export commonly used types for convenience
pub use datapath::{
    AtomicWrite, AtomicWriteOutput, AtomicWriteStatus, Check, Enqueue, KvEntry, KvValue,
    Mutation, MutationType, ReadRange, ReadRangeOutput, SnapshotRead, SnapshotReadOutput,
    SnapshotReadStatus, ValueEncoding, Watch, WatchKey, WatchKeyOutput, WatchOutput,
};
