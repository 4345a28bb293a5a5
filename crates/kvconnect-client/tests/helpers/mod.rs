// Test helper modules

pub mod fake_server;

pub use fake_server::{frame, versionstamp, FakeServer, METADATA_URL, REPLICA_URL, STRONG_URL};
