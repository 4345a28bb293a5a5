//! # kvconnect-client
//!
//! Client for remote key-value databases that speak the KV Connect protocol.
//!
//! The client:
//! - Discovers endpoints and a short-lived token through the metadata exchange
//! - Refreshes metadata shortly before it expires
//! - Routes strong requests to the primary and eventual reads to replicas
//! - Retries 5xx responses and network failures with backoff
//! - Streams key changes over the watch channel
//!
//! ## Example
//!
//! ```rust,ignore
//! use kvconnect_client::{ClientConfig, Consistency, Kv};
//! use kvconnect_types::key;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let kv = Kv::connect(ClientConfig::from_env()?).await?;
//!
//!     kv.set(&key!["users", "ada"], b"hello".to_vec()).await?;
//!
//!     let entry = kv.get(&key!["users", "ada"], Consistency::Strong).await?;
//!     println!("{:?} @ {:?}", entry.value, entry.versionstamp);
//!
//!     kv.delete(&key!["users", "ada"]).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Layers
//!
//! - [`Kv`]: get / list / set / delete / atomic / watch
//! - [`RpcClient`]: endpoint resolution plus consistency recovery
//! - [`Session`]: metadata ownership and refresh
//! - [`RetryingTransport`]: retries over a pluggable [`Transport`]

mod atomic;
mod config;
mod kv;
mod metadata;
mod router;
mod rpc;
mod session;
pub mod transport;
mod value;
pub mod watch;

pub use atomic::{AtomicOperation, CommitResult, EnqueueOptions, SetOptions};
pub use config::{ClientConfig, ENV_ACCESS_TOKEN, ENV_URL};
pub use kv::{Kv, KvListIter, ListOptions, ListSelector, DEFAULT_BATCH_SIZE};
pub use metadata::{Consistency, DatabaseMetadata, Endpoint};
pub use router::select_endpoint;
pub use rpc::RpcClient;
pub use session::{Session, REFRESH_WINDOW_MINUTES};
pub use transport::{
    BodyStream, BufferedResponse, HttpRequest, HttpResponse, ReqwestTransport, RetryPolicy,
    RetryingTransport, Transport, TransportFailure,
};
pub use value::{DefaultValueCodec, KvEntry, Value, ValueCodec, ValueEncoding};
pub use watch::{FrameDecoder, WatchChange, WatchStream, MAX_FRAME_LEN};

// Re-export the shared vocabulary so callers need a single dependency.
pub use kvconnect_types::{key, Error, Key, KeyPart, ProtocolError, Result, Versionstamp};
