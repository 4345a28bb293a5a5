//! Data path RPCs: snapshot reads, atomic writes and watches.
//!
//! Every call resolves an endpoint from a metadata snapshot, encodes its
//! request once and hands the bytes to the retrying transport. Snapshot reads
//! additionally get one consistency recovery round: if the server reports that
//! it cannot honour the requested guarantee, metadata is force-refreshed and
//! the read is sent exactly once more.

use crate::metadata::{Consistency, DatabaseMetadata, Endpoint};
use crate::router::select_endpoint;
use crate::session::Session;
use crate::transport::{HttpRequest, RetryingTransport};
use crate::value::ValueCodec;
use crate::watch::WatchStream;
use bytes::Bytes;
use kvconnect_proto::{
    AtomicWrite, AtomicWriteOutput, Message, SnapshotRead, SnapshotReadOutput,
    SnapshotReadStatus, Watch,
};
use kvconnect_types::{Error, Key, ProtocolError, Result};
use std::sync::Arc;
use tracing::warn;
use url::Url;

const PROTOBUF: &str = "application/x-protobuf";

pub struct RpcClient {
    session: Arc<Session>,
    transport: RetryingTransport,
}

impl RpcClient {
    pub fn new(session: Arc<Session>, transport: RetryingTransport) -> Self {
        Self { session, transport }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Range read with consistency validation and a single recovery attempt.
    pub async fn snapshot_read(
        &self,
        request: &SnapshotRead,
        consistency: Consistency,
    ) -> Result<SnapshotReadOutput> {
        let body = Bytes::from(request.encode_to_vec());

        let (metadata, endpoint) = self.resolve(consistency).await?;
        let output: SnapshotReadOutput = self
            .call(&metadata, &endpoint, "snapshot_read", body.clone())
            .await?;
        if !is_rejected(metadata.version, &output, consistency) {
            return Ok(output);
        }

        warn!(
            endpoint = %endpoint.url,
            read_disabled = output.read_disabled,
            strongly_consistent = output.read_is_strongly_consistent,
            status = output.status,
            "Snapshot read rejected, refreshing metadata and retrying once"
        );

        let metadata = self.session.force_refresh().await?;
        let endpoint = select_endpoint(&metadata, consistency)?.clone();
        let output: SnapshotReadOutput = self
            .call(&metadata, &endpoint, "snapshot_read", body)
            .await?;
        if is_rejected(metadata.version, &output, consistency) {
            return Err(Error::Consistency {
                endpoint: endpoint.url,
                read_disabled: output.read_disabled,
                read_is_strongly_consistent: output.read_is_strongly_consistent,
                status: output.status,
            });
        }
        Ok(output)
    }

    /// Atomic write, always sent to a strong endpoint.
    pub async fn atomic_write(&self, request: &AtomicWrite) -> Result<AtomicWriteOutput> {
        let body = Bytes::from(request.encode_to_vec());
        let (metadata, endpoint) = self.resolve(Consistency::Strong).await?;
        self.call(&metadata, &endpoint, "atomic_write", body).await
    }

    /// Open a watch stream for `keys`.
    ///
    /// Fails with [`Error::Unsupported`] before any network call when the
    /// server speaks a protocol version without watch support.
    pub async fn watch(&self, keys: Vec<Key>, codec: Arc<dyn ValueCodec>) -> Result<WatchStream> {
        if !self.session.snapshot().supports_watch() {
            return Err(Error::Unsupported(
                "watch requires KV Connect protocol version 3",
            ));
        }

        let request = Watch {
            keys: keys
                .iter()
                .map(|k| kvconnect_proto::WatchKey { key: k.pack() })
                .collect(),
        };
        let body = Bytes::from(request.encode_to_vec());

        let (metadata, endpoint) = self.resolve(Consistency::Strong).await?;
        if !metadata.supports_watch() {
            return Err(Error::Unsupported(
                "watch requires KV Connect protocol version 3",
            ));
        }
        let request = data_request(&metadata, &endpoint, "watch", body)?;
        let url = request.url.to_string();
        let response = self.transport.send(request).await?;
        Ok(WatchStream::new(url, keys, response.body, codec))
    }

    async fn resolve(&self, consistency: Consistency) -> Result<(Arc<DatabaseMetadata>, Endpoint)> {
        self.session.refresh_if_needed().await?;
        let metadata = self.session.snapshot();
        let endpoint = select_endpoint(&metadata, consistency)?.clone();
        Ok((metadata, endpoint))
    }

    async fn call<M: Message + Default>(
        &self,
        metadata: &DatabaseMetadata,
        endpoint: &Endpoint,
        method: &str,
        body: Bytes,
    ) -> Result<M> {
        let request = data_request(metadata, endpoint, method, body)?;
        let url = request.url.to_string();
        let response = self.transport.send_buffered(request).await?;
        M::decode(response.body).map_err(|e| {
            ProtocolError::InvalidMessage(format!("{} response from {}: {}", method, url, e)).into()
        })
    }
}

fn is_rejected(version: u32, output: &SnapshotReadOutput, consistency: Consistency) -> bool {
    (version >= 3 && output.status() == SnapshotReadStatus::SrReadDisabled)
        || output.read_disabled
        || (consistency == Consistency::Strong && !output.read_is_strongly_consistent)
}

fn data_request(
    metadata: &DatabaseMetadata,
    endpoint: &Endpoint,
    method: &str,
    body: Bytes,
) -> Result<HttpRequest> {
    let url = Url::parse(&format!("{}/{}", endpoint.url, method)).map_err(|e| {
        ProtocolError::MalformedMetadata(format!("invalid endpoint url '{}': {}", endpoint.url, e))
    })?;

    let request = HttpRequest::new(url, body)
        .with_header("authorization", format!("Bearer {}", metadata.token))
        .with_header("content-type", PROTOBUF);

    Ok(if metadata.version == 1 {
        request.with_header("x-transaction-domain-id", metadata.database_id.clone())
    } else {
        request
            .with_header("x-denokv-database-id", metadata.database_id.clone())
            .with_header("x-denokv-version", metadata.version.to_string())
    })
}
