#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Duration as ChronoDuration, Utc};
use futures::{FutureExt, StreamExt};
use kvconnect_client::{ClientConfig, HttpRequest, HttpResponse, Transport, TransportFailure};
use kvconnect_proto::{
    AtomicWrite, AtomicWriteOutput, AtomicWriteStatus, KvEntry, Message, MutationType,
    ReadRangeOutput, SnapshotRead, SnapshotReadOutput, SnapshotReadStatus,
};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use url::Url;

pub const METADATA_URL: &str = "https://kv.test/connect";
pub const STRONG_URL: &str = "https://kv.test/strong";
pub const REPLICA_URL: &str = "https://replica.kv.test/data";

#[derive(Debug, Clone)]
pub struct StoredValue {
    pub data: Vec<u8>,
    pub encoding: i32,
    pub versionstamp: Vec<u8>,
}

/// A request as the server saw it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

pub struct ServerState {
    pub version: u32,
    /// (url, consistency) pairs as written into the metadata document.
    pub endpoints: Vec<(String, String)>,
    pub expires_in: ChronoDuration,
    /// Final location reported for the metadata response.
    pub metadata_location: String,
    pub store: BTreeMap<Vec<u8>, StoredValue>,
    pub commits: u64,
    pub enqueued: usize,
    /// Snapshot reads still to be answered as not strongly consistent.
    pub inconsistent_reads: u32,
    /// Statuses returned, in order, before normal service resumes.
    pub fail_next: VecDeque<u16>,
    pub watch_chunks: Vec<Vec<u8>>,
    /// Keep the watch body open after the scripted chunks.
    pub hold_watch_open: bool,
    /// Upcoming successful responses whose body breaks after the first byte.
    pub reset_bodies: u32,
    pub metadata_content_type: String,
    pub requests: Vec<Recorded>,
}

impl Default for ServerState {
    fn default() -> Self {
        Self {
            version: 3,
            endpoints: vec![
                (STRONG_URL.to_string(), "strong".to_string()),
                (REPLICA_URL.to_string(), "eventual".to_string()),
            ],
            expires_in: ChronoDuration::hours(1),
            metadata_location: METADATA_URL.to_string(),
            store: BTreeMap::new(),
            commits: 0,
            enqueued: 0,
            inconsistent_reads: 0,
            fail_next: VecDeque::new(),
            watch_chunks: Vec::new(),
            hold_watch_open: false,
            reset_bodies: 0,
            metadata_content_type: "application/json; charset=utf-8".to_string(),
            requests: Vec::new(),
        }
    }
}

impl ServerState {
    pub fn calls(&self, suffix: &str) -> usize {
        self.requests
            .iter()
            .filter(|r| r.url.ends_with(suffix))
            .count()
    }

    pub fn urls(&self, suffix: &str) -> Vec<String> {
        self.requests
            .iter()
            .filter(|r| r.url.ends_with(suffix))
            .map(|r| r.url.clone())
            .collect()
    }
}

/// In-memory KV Connect server plugged in as the client's transport.
#[derive(Clone, Default)]
pub struct FakeServer {
    state: Arc<Mutex<ServerState>>,
    watch_released: Arc<AtomicBool>,
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap()
    }

    pub fn metadata_calls(&self) -> usize {
        self.state().calls("/connect")
    }

    pub fn watch_released(&self) -> bool {
        self.watch_released.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> ClientConfig {
        ClientConfig::new(METADATA_URL, "access-token")
            .with_retry_backoff(Duration::ZERO, Duration::ZERO)
            .with_transport(Arc::new(self.clone()))
    }

    fn metadata(&self, state: &ServerState, url: Url) -> HttpResponse {
        let endpoints: Vec<_> = state
            .endpoints
            .iter()
            .map(|(url, consistency)| serde_json::json!({"url": url, "consistency": consistency}))
            .collect();
        let id_field = if state.version == 1 { "uuid" } else { "databaseId" };
        let body = serde_json::json!({
            "version": state.version,
            id_field: "db-test",
            "endpoints": endpoints,
            "token": format!("data-token-{}", state.calls("/connect")),
            "expiresAt": (Utc::now() + state.expires_in).to_rfc3339(),
        });
        let location = Url::parse(&state.metadata_location).unwrap_or(url);
        HttpResponse::from_bytes(
            200,
            location,
            Some(state.metadata_content_type.as_str()),
            serde_json::to_vec(&body).unwrap_or_default(),
        )
    }

    fn snapshot_read(state: &mut ServerState, request: SnapshotRead) -> SnapshotReadOutput {
        let strongly_consistent = state.inconsistent_reads == 0;
        if !strongly_consistent {
            state.inconsistent_reads -= 1;
        }

        let ranges = request
            .ranges
            .into_iter()
            .map(|range| {
                let matched = state
                    .store
                    .range(range.start.clone()..range.end.clone())
                    .map(|(key, stored)| KvEntry {
                        key: key.clone(),
                        value: stored.data.clone(),
                        encoding: stored.encoding,
                        versionstamp: stored.versionstamp.clone(),
                    });
                let limit = range.limit.max(0) as usize;
                let values = if range.reverse {
                    matched.rev().take(limit).collect()
                } else {
                    matched.take(limit).collect()
                };
                ReadRangeOutput { values }
            })
            .collect();

        SnapshotReadOutput {
            ranges,
            read_is_strongly_consistent: strongly_consistent,
            status: SnapshotReadStatus::SrSuccess as i32,
            ..Default::default()
        }
    }

    fn atomic_write(state: &mut ServerState, request: AtomicWrite) -> AtomicWriteOutput {
        let failed_checks: Vec<u32> = request
            .checks
            .iter()
            .enumerate()
            .filter(|(_, check)| {
                let current = state.store.get(&check.key).map(|s| s.versionstamp.clone());
                current.unwrap_or_default() != check.versionstamp
            })
            .map(|(i, _)| i as u32)
            .collect();
        if !failed_checks.is_empty() {
            return AtomicWriteOutput {
                status: AtomicWriteStatus::AwCheckFailure as i32,
                failed_checks,
                ..Default::default()
            };
        }

        state.commits += 1;
        let versionstamp = versionstamp(state.commits);
        for mutation in request.mutations {
            let kind = mutation.mutation_type();
            let operand = mutation.value.unwrap_or_default();
            match kind {
                MutationType::MSet => {
                    state.store.insert(
                        mutation.key,
                        StoredValue {
                            data: operand.data,
                            encoding: operand.encoding,
                            versionstamp: versionstamp.clone(),
                        },
                    );
                }
                MutationType::MDelete => {
                    state.store.remove(&mutation.key);
                }
                kind @ (MutationType::MSum | MutationType::MMin | MutationType::MMax) => {
                    let current = state.store.get(&mutation.key).map(|s| le64(&s.data));
                    let operand_value = le64(&operand.data);
                    let next = match (kind, current) {
                        (_, None) => operand_value,
                        (MutationType::MSum, Some(c)) => c.wrapping_add(operand_value),
                        (MutationType::MMin, Some(c)) => c.min(operand_value),
                        (_, Some(c)) => c.max(operand_value),
                    };
                    state.store.insert(
                        mutation.key,
                        StoredValue {
                            data: next.to_le_bytes().to_vec(),
                            encoding: operand.encoding,
                            versionstamp: versionstamp.clone(),
                        },
                    );
                }
                MutationType::MUnspecified => {}
            }
        }
        state.enqueued += request.enqueues.len();

        AtomicWriteOutput {
            status: AtomicWriteStatus::AwSuccess as i32,
            versionstamp,
            ..Default::default()
        }
    }

    fn watch(&self, state: &ServerState, url: Url) -> HttpResponse {
        let chunks: Vec<_> = state
            .watch_chunks
            .iter()
            .cloned()
            .map(|c| Ok::<_, TransportFailure>(Bytes::from(c)))
            .collect();
        let guard = ReleaseGuard(self.watch_released.clone());
        let body = futures::stream::iter(chunks);
        let body = if state.hold_watch_open {
            body.chain(futures::stream::pending()).boxed()
        } else {
            body.boxed()
        };
        HttpResponse {
            status: 200,
            url,
            content_type: Some("application/octet-stream".to_string()),
            body: body
                .map(move |chunk| {
                    let _held = &guard;
                    chunk
                })
                .boxed(),
        }
    }
}

struct ReleaseGuard(Arc<AtomicBool>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for FakeServer {
    async fn post(&self, request: HttpRequest) -> Result<HttpResponse, TransportFailure> {
        let mut state = self.state();
        state.requests.push(Recorded {
            url: request.url.to_string(),
            headers: request
                .headers
                .iter()
                .map(|(n, v)| (n.to_string(), v.clone()))
                .collect(),
        });

        if let Some(status) = state.fail_next.pop_front() {
            return Ok(HttpResponse::from_bytes(
                status,
                request.url,
                Some("text/plain"),
                "scripted failure",
            ));
        }

        let url = request.url.clone();
        let path = url.path().to_string();
        let protobuf = Some("application/x-protobuf");
        let response = if request.url.as_str() == METADATA_URL {
            self.metadata(&state, url)
        } else if path.ends_with("/snapshot_read") {
            let read = SnapshotRead::decode(request.body)
                .map_err(|e| TransportFailure::permanent(e.to_string()))?;
            let output = Self::snapshot_read(&mut state, read);
            HttpResponse::from_bytes(200, url, protobuf, output.encode_to_vec())
        } else if path.ends_with("/atomic_write") {
            let write = AtomicWrite::decode(request.body)
                .map_err(|e| TransportFailure::permanent(e.to_string()))?;
            let output = Self::atomic_write(&mut state, write);
            HttpResponse::from_bytes(200, url, protobuf, output.encode_to_vec())
        } else if path.ends_with("/watch") {
            self.watch(&state, url)
        } else {
            HttpResponse::from_bytes(404, url, Some("text/plain"), "not found")
        };

        if state.reset_bodies > 0 && response.status == 200 {
            state.reset_bodies -= 1;
            let mut response = response;
            let prefix = response
                .body
                .next()
                .now_or_never()
                .flatten()
                .and_then(|chunk| chunk.ok());
            let head = prefix.map(|b| b.slice(..b.len().min(1))).unwrap_or_default();
            response.body = futures::stream::iter(vec![
                Ok(head),
                Err(TransportFailure::transient("connection reset by peer")),
            ])
            .boxed();
            return Ok(response);
        }
        Ok(response)
    }
}

pub fn versionstamp(commit: u64) -> Vec<u8> {
    let mut out = vec![0u8; 12];
    out[2..10].copy_from_slice(&commit.to_be_bytes());
    out
}

fn le64(data: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    let n = data.len().min(8);
    raw[..n].copy_from_slice(&data[..n]);
    u64::from_le_bytes(raw)
}

/// Length-prefix `payload` as a watch frame.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = (payload.len() as u32).to_le_bytes().to_vec();
    out.extend_from_slice(payload);
    out
}
