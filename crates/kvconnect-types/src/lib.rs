//! # kvconnect-types
//!
//! Core domain types shared by the KV Connect crates.
//!
//! This crate provides:
//! - The error taxonomy (`Error`, `ProtocolError`, `DecodeError`)
//! - Composite ordered keys (`Key`, `KeyPart`) and their byte codec
//! - Versionstamps
//!
//! ## Design Philosophy
//!
//! This crate intentionally has no network or runtime dependencies so the key
//! codec can be used (and property tested) on its own.

pub mod error;
pub mod key;
pub mod versionstamp;

pub use error::{DecodeError, Error, ProtocolError, Result};
pub use key::{pack, point_range, prefix_range, unpack, Key, KeyPart};
pub use versionstamp::Versionstamp;
