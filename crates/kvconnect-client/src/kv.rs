//! The key-value surface: get, list, set, delete, atomic writes and watches.

use crate::atomic::{AtomicOperation, CommitResult, EnqueueOptions, SetOptions};
use crate::config::ClientConfig;
use crate::metadata::{Consistency, DatabaseMetadata};
use crate::rpc::RpcClient;
use crate::session::Session;
use crate::transport::{ReqwestTransport, RetryingTransport, Transport};
use crate::value::{decode_entry, decode_entry_for, DefaultValueCodec, KvEntry, Value, ValueCodec};
use crate::watch::WatchStream;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use futures::stream::{BoxStream, StreamExt};
use kvconnect_proto::{AtomicWriteStatus, ReadRange, SnapshotRead};
use kvconnect_types::{
    point_range, prefix_range, DecodeError, Error, Key, ProtocolError, Result, Versionstamp,
};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info};

/// Default number of entries fetched per list RPC.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Handle to a remote database.
///
/// Cheap to clone; clones share the metadata session and transport.
#[derive(Clone)]
pub struct Kv {
    rpc: Arc<RpcClient>,
    codec: Arc<dyn ValueCodec>,
}

impl Kv {
    /// Connect using the transport from `config`, or a reqwest transport.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let transport: Arc<dyn Transport> = match &config.transport {
            Some(transport) => transport.clone(),
            None => Arc::new(ReqwestTransport::new()?),
        };
        Self::with_transport(config, transport).await
    }

    /// Connect over an explicit transport.
    pub async fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let transport = RetryingTransport::new(transport, config.retry_policy(), config.debug);
        let session = Session::open(&config, transport.clone()).await?;
        let codec = config
            .value_codec
            .clone()
            .unwrap_or_else(|| Arc::new(DefaultValueCodec));

        let metadata = session.snapshot();
        info!(
            url = %config.url,
            version = metadata.version,
            database_id = %metadata.database_id,
            "Connected to KV Connect database"
        );

        Ok(Self {
            rpc: Arc::new(RpcClient::new(Arc::new(session), transport)),
            codec,
        })
    }

    /// Current metadata snapshot.
    pub fn metadata(&self) -> Arc<DatabaseMetadata> {
        self.rpc.session().snapshot()
    }

    pub async fn get(&self, key: &Key, consistency: Consistency) -> Result<KvEntry> {
        let mut entries = self.get_many(std::slice::from_ref(key), consistency).await?;
        entries
            .pop()
            .ok_or_else(|| ProtocolError::InvalidMessage("empty get response".to_string()).into())
    }

    /// Read several keys in one snapshot. Results follow the order of `keys`.
    pub async fn get_many(&self, keys: &[Key], consistency: Consistency) -> Result<Vec<KvEntry>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let request = SnapshotRead {
            ranges: keys
                .iter()
                .map(|key| {
                    let (start, end) = point_range(key);
                    ReadRange {
                        start,
                        end,
                        limit: 1,
                        reverse: false,
                    }
                })
                .collect(),
        };
        let output = self.rpc.snapshot_read(&request, consistency).await?;
        if output.ranges.len() != keys.len() {
            return Err(ProtocolError::InvalidMessage(format!(
                "snapshot read returned {} ranges for {} keys",
                output.ranges.len(),
                keys.len()
            ))
            .into());
        }

        keys.iter()
            .zip(output.ranges)
            .map(|(key, range)| match range.values.into_iter().next() {
                Some(entry) => decode_entry_for(self.codec.as_ref(), key.clone(), entry),
                None => Ok(KvEntry::absent(key.clone())),
            })
            .collect()
    }

    /// Iterate over a key range. Pagination happens on demand.
    pub fn list(&self, selector: ListSelector, options: ListOptions) -> Result<KvListIter> {
        KvListIter::new(self.clone(), selector, options)
    }

    pub async fn set(&self, key: &Key, value: impl Into<Value>) -> Result<Versionstamp> {
        committed(self.atomic().set(key, value).commit().await?)
    }

    pub async fn set_with(
        &self,
        key: &Key,
        value: impl Into<Value>,
        options: SetOptions,
    ) -> Result<Versionstamp> {
        committed(self.atomic().set_with(key, value, options).commit().await?)
    }

    pub async fn delete(&self, key: &Key) -> Result<Versionstamp> {
        committed(self.atomic().delete(key).commit().await?)
    }

    pub async fn sum(&self, key: &Key, operand: u64) -> Result<Versionstamp> {
        committed(self.atomic().sum(key, operand).commit().await?)
    }

    pub async fn min(&self, key: &Key, operand: u64) -> Result<Versionstamp> {
        committed(self.atomic().min(key, operand).commit().await?)
    }

    pub async fn max(&self, key: &Key, operand: u64) -> Result<Versionstamp> {
        committed(self.atomic().max(key, operand).commit().await?)
    }

    pub async fn enqueue(&self, value: impl Into<Value>, options: EnqueueOptions) -> Result<Versionstamp> {
        committed(self.atomic().enqueue(value, options).commit().await?)
    }

    /// Start an atomic write.
    pub fn atomic(&self) -> AtomicOperation {
        AtomicOperation::new(self.rpc.clone(), self.codec.clone())
    }

    /// Watch `keys` for changes. Requires protocol version 3.
    pub async fn watch(&self, keys: &[Key]) -> Result<WatchStream> {
        self.rpc.watch(keys.to_vec(), self.codec.clone()).await
    }

    /// Queue listening is not available over KV Connect.
    pub async fn listen_queue(&self) -> Result<()> {
        Err(Error::Unsupported(
            "listening to queues is not supported over KV Connect",
        ))
    }
}

fn committed(result: CommitResult) -> Result<Versionstamp> {
    match result {
        CommitResult::Committed { versionstamp } => Ok(versionstamp),
        CommitResult::CheckFailed { .. } => Err(ProtocolError::UnexpectedOutcome {
            operation: "atomic_write",
            status: AtomicWriteStatus::AwCheckFailure as i32,
        }
        .into()),
    }
}

/// Which keys a list covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListSelector {
    /// Every key strictly below `prefix`.
    Prefix(Key),
    /// Keys in `[start, end)`.
    Range { start: Key, end: Key },
    /// Keys below `prefix`, from `start` (inclusive).
    PrefixStart { prefix: Key, start: Key },
    /// Keys below `prefix`, up to `end` (exclusive).
    PrefixEnd { prefix: Key, end: Key },
}

/// Packed bounds of a selector plus the common prefix cursors are relative to.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ListBounds {
    prefix: Vec<u8>,
    start: Vec<u8>,
    end: Vec<u8>,
}

impl ListSelector {
    fn bounds(&self) -> Result<ListBounds> {
        match self {
            ListSelector::Prefix(prefix) => {
                let (start, end) = prefix_range(prefix);
                Ok(ListBounds {
                    prefix: prefix.pack(),
                    start,
                    end,
                })
            }
            ListSelector::Range { start, end } => {
                if start > end {
                    return Err(Error::InvalidArgument(format!(
                        "list start {} is after end {}",
                        start, end
                    )));
                }
                Ok(ListBounds {
                    prefix: Vec::new(),
                    start: start.pack(),
                    end: end.pack(),
                })
            }
            ListSelector::PrefixStart { prefix, start } => {
                ensure_within(prefix, start)?;
                let (_, end) = prefix_range(prefix);
                Ok(ListBounds {
                    prefix: prefix.pack(),
                    start: start.pack(),
                    end,
                })
            }
            ListSelector::PrefixEnd { prefix, end } => {
                ensure_within(prefix, end)?;
                let (start, _) = prefix_range(prefix);
                Ok(ListBounds {
                    prefix: prefix.pack(),
                    start,
                    end: end.pack(),
                })
            }
        }
    }
}

fn ensure_within(prefix: &Key, key: &Key) -> Result<()> {
    if key.len() > prefix.len() && key.starts_with(prefix) {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "list bound {} is not below prefix {}",
            key, prefix
        )))
    }
}

/// Options for [`Kv::list`].
#[derive(Debug, Clone)]
pub struct ListOptions {
    /// Stop after this many entries.
    pub limit: Option<usize>,
    /// Walk from the end of the range.
    pub reverse: bool,
    /// Entries per RPC.
    pub batch_size: usize,
    pub consistency: Consistency,
    /// Resume after the entry this cursor was taken at.
    pub cursor: Option<String>,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            limit: None,
            reverse: false,
            batch_size: DEFAULT_BATCH_SIZE,
            consistency: Consistency::Strong,
            cursor: None,
        }
    }
}

impl ListOptions {
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = consistency;
        self
    }

    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }
}

/// Paginating iterator over a list.
///
/// Each page is a fresh snapshot read whose window starts right after the
/// last entry handed out, so restarting from [`cursor`](Self::cursor) on a new
/// iterator continues exactly where this one stopped.
pub struct KvListIter {
    kv: Kv,
    bounds: ListBounds,
    reverse: bool,
    batch_size: usize,
    consistency: Consistency,
    remaining: Option<usize>,
    buffer: VecDeque<KvEntry>,
    last_key: Option<Vec<u8>>,
    exhausted: bool,
}

impl KvListIter {
    fn new(kv: Kv, selector: ListSelector, options: ListOptions) -> Result<Self> {
        if options.batch_size == 0 {
            return Err(Error::InvalidArgument(
                "batch size must be at least 1".to_string(),
            ));
        }

        let mut bounds = selector.bounds()?;
        let last_key = match &options.cursor {
            Some(cursor) => {
                let key = decode_cursor(&bounds, cursor)?;
                if options.reverse {
                    bounds.end = key.clone();
                } else {
                    bounds.start = after(&key);
                }
                Some(key)
            }
            None => None,
        };

        Ok(Self {
            kv,
            bounds,
            reverse: options.reverse,
            batch_size: options.batch_size,
            consistency: options.consistency,
            remaining: options.limit,
            buffer: VecDeque::new(),
            last_key,
            exhausted: false,
        })
    }

    /// Next entry, fetching another page when the buffer runs dry.
    pub async fn next(&mut self) -> Option<Result<KvEntry>> {
        loop {
            if let Some(entry) = self.buffer.pop_front() {
                if let Some(remaining) = self.remaining.as_mut() {
                    *remaining -= 1;
                }
                self.last_key = Some(entry.key.pack());
                return Some(Ok(entry));
            }
            if self.exhausted || self.remaining == Some(0) {
                return None;
            }
            if let Err(e) = self.fetch_page().await {
                self.exhausted = true;
                self.buffer.clear();
                return Some(Err(e));
            }
        }
    }

    /// Opaque position of the last entry returned.
    pub fn cursor(&self) -> Option<String> {
        let key = self.last_key.as_ref()?;
        let suffix = key.strip_prefix(self.bounds.prefix.as_slice()).unwrap_or(key);
        Some(URL_SAFE_NO_PAD.encode(suffix))
    }

    /// Drain everything that is left.
    pub async fn collect(mut self) -> Result<Vec<KvEntry>> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next().await {
            entries.push(entry?);
        }
        Ok(entries)
    }

    pub fn into_stream(self) -> BoxStream<'static, Result<KvEntry>> {
        futures::stream::unfold(self, |mut iter| async move {
            iter.next().await.map(|item| (item, iter))
        })
        .boxed()
    }

    async fn fetch_page(&mut self) -> Result<()> {
        if self.bounds.start >= self.bounds.end {
            self.exhausted = true;
            return Ok(());
        }

        let limit = match self.remaining {
            Some(remaining) => remaining.min(self.batch_size),
            None => self.batch_size,
        };
        let request = SnapshotRead {
            ranges: vec![ReadRange {
                start: self.bounds.start.clone(),
                end: self.bounds.end.clone(),
                limit: i32::try_from(limit).unwrap_or(i32::MAX),
                reverse: self.reverse,
            }],
        };

        let output = self.kv.rpc.snapshot_read(&request, self.consistency).await?;
        let values = output
            .ranges
            .into_iter()
            .next()
            .map(|range| range.values)
            .unwrap_or_default();

        debug!(entries = values.len(), limit, reverse = self.reverse, "Fetched list page");

        let fetched = values.len();
        let next_bound = values.last().map(|last| last.key.clone());
        // A page is delivered whole or not at all.
        let page = values
            .into_iter()
            .map(|entry| decode_entry(self.kv.codec.as_ref(), entry))
            .collect::<Result<Vec<_>>>()?;

        if fetched < limit {
            self.exhausted = true;
        }
        match next_bound {
            Some(last) if self.reverse => self.bounds.end = last,
            Some(last) => self.bounds.start = after(&last),
            None => self.exhausted = true,
        }
        self.buffer.extend(page);
        Ok(())
    }
}

/// Smallest packed key sorting after `key`.
fn after(key: &[u8]) -> Vec<u8> {
    let mut next = Vec::with_capacity(key.len() + 1);
    next.extend_from_slice(key);
    next.push(0x00);
    next
}

fn decode_cursor(bounds: &ListBounds, cursor: &str) -> Result<Vec<u8>> {
    let suffix = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|e| DecodeError::InvalidCursor(e.to_string()))?;
    let mut key = bounds.prefix.clone();
    key.extend_from_slice(&suffix);
    if key < bounds.start || key >= bounds.end {
        return Err(DecodeError::InvalidCursor("cursor is outside the selected range".to_string()).into());
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvconnect_types::key;

    #[test]
    fn test_prefix_bounds() {
        let bounds = ListSelector::Prefix(key!["users"]).bounds().unwrap();
        let packed = key!["users"].pack();
        assert_eq!(bounds.prefix, packed);
        assert_eq!(bounds.start, [packed.clone(), vec![0x00]].concat());
        assert_eq!(bounds.end, [packed, vec![0xFF]].concat());
    }

    #[test]
    fn test_prefix_start_must_be_below_prefix() {
        let ok = ListSelector::PrefixStart {
            prefix: key!["users"],
            start: key!["users", "m"],
        };
        assert_eq!(ok.bounds().unwrap().start, key!["users", "m"].pack());

        let bad = ListSelector::PrefixEnd {
            prefix: key!["users"],
            end: key!["groups", "m"],
        };
        assert!(matches!(bad.bounds(), Err(Error::InvalidArgument(_))));

        let reversed = ListSelector::Range {
            start: key!["b"],
            end: key!["a"],
        };
        assert!(reversed.bounds().is_err());
    }

    #[test]
    fn test_cursor_is_relative_to_prefix() {
        let bounds = ListSelector::Prefix(key!["users"]).bounds().unwrap();
        let last = key!["users", "ada"].pack();
        let suffix = &last[bounds.prefix.len()..];
        let cursor = URL_SAFE_NO_PAD.encode(suffix);

        assert_eq!(decode_cursor(&bounds, &cursor).unwrap(), last);
        assert!(!cursor.contains('='));
    }

    #[test]
    fn test_cursor_outside_range_is_rejected() {
        let bounds = ListSelector::Prefix(key!["users"]).bounds().unwrap();
        assert!(matches!(
            decode_cursor(&bounds, "not base64!"),
            Err(Error::Decode(DecodeError::InvalidCursor(_)))
        ));
        // A bare 0xFF suffix sorts at the exclusive end.
        let past_end = URL_SAFE_NO_PAD.encode([0xFF]);
        assert!(decode_cursor(&bounds, &past_end).is_err());
    }

    #[test]
    fn test_after_is_strict_successor() {
        let key = key!["a"].pack();
        let next = after(&key);
        assert!(next > key);
        assert!(next < key!["a", 0i64].pack());
    }
}
