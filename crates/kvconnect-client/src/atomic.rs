//! Atomic write builder.
//!
//! An [`AtomicOperation`] collects checks, mutations and enqueues and sends
//! them as a single `AtomicWrite`. The server applies all of it or none of it.

use crate::rpc::RpcClient;
use crate::value::{Value, ValueCodec, ValueEncoding};
use chrono::Utc;
use kvconnect_proto::{
    AtomicWrite, AtomicWriteOutput, AtomicWriteStatus, Check, Enqueue, KvValue, Mutation,
    MutationType,
};
use kvconnect_types::{Error, Key, ProtocolError, Result, Versionstamp};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Options for [`AtomicOperation::set_with`].
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Let the server delete the key after this long.
    pub expire_in: Option<Duration>,
}

impl SetOptions {
    pub fn with_expire_in(mut self, expire_in: Duration) -> Self {
        self.expire_in = Some(expire_in);
        self
    }
}

/// Options for [`AtomicOperation::enqueue`].
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Earliest delivery time, relative to now.
    pub delay: Option<Duration>,
    /// Keys that receive the payload if delivery is given up.
    pub keys_if_undelivered: Vec<Key>,
    /// Redelivery delays in milliseconds.
    pub backoff_schedule: Vec<u32>,
}

impl EnqueueOptions {
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_keys_if_undelivered(mut self, keys: Vec<Key>) -> Self {
        self.keys_if_undelivered = keys;
        self
    }

    pub fn with_backoff_schedule(mut self, schedule: Vec<u32>) -> Self {
        self.backoff_schedule = schedule;
        self
    }
}

/// Outcome of a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitResult {
    /// Everything was applied at this versionstamp.
    Committed { versionstamp: Versionstamp },
    /// At least one check did not hold. Nothing was applied.
    CheckFailed { failed_keys: Vec<Key> },
}

impl CommitResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, CommitResult::Committed { .. })
    }

    pub fn versionstamp(&self) -> Option<Versionstamp> {
        match self {
            CommitResult::Committed { versionstamp } => Some(*versionstamp),
            CommitResult::CheckFailed { .. } => None,
        }
    }
}

/// Builder for an all-or-nothing write.
///
/// Value encoding errors are remembered and reported by [`commit`](Self::commit)
/// so that calls can be chained.
pub struct AtomicOperation {
    rpc: Arc<RpcClient>,
    codec: Arc<dyn ValueCodec>,
    request: AtomicWrite,
    checked_keys: Vec<Key>,
    error: Option<Error>,
}

impl AtomicOperation {
    pub(crate) fn new(rpc: Arc<RpcClient>, codec: Arc<dyn ValueCodec>) -> Self {
        Self {
            rpc,
            codec,
            request: AtomicWrite::default(),
            checked_keys: Vec::new(),
            error: None,
        }
    }

    /// Require `key` to be at `versionstamp`, or absent when `None`.
    pub fn check(mut self, key: &Key, versionstamp: Option<Versionstamp>) -> Self {
        self.request.checks.push(Check {
            key: key.pack(),
            versionstamp: versionstamp.map(|v| v.as_bytes().to_vec()).unwrap_or_default(),
        });
        self.checked_keys.push(key.clone());
        self
    }

    pub fn set(self, key: &Key, value: impl Into<Value>) -> Self {
        self.set_with(key, value, SetOptions::default())
    }

    pub fn set_with(mut self, key: &Key, value: impl Into<Value>, options: SetOptions) -> Self {
        let value = value.into();
        match self.codec.encode(&value) {
            Ok((data, encoding)) => {
                let expire_at_ms = options.expire_in.map(deadline_ms).unwrap_or(0);
                self.push_mutation(key, MutationType::MSet, Some((data, encoding)), expire_at_ms);
            }
            Err(e) => self.fail(e),
        }
        self
    }

    pub fn delete(mut self, key: &Key) -> Self {
        self.push_mutation(key, MutationType::MDelete, None, 0);
        self
    }

    /// Add `operand` to the u64 stored at `key`, wrapping on overflow.
    pub fn sum(mut self, key: &Key, operand: u64) -> Self {
        self.push_le64(key, MutationType::MSum, operand);
        self
    }

    /// Store the smaller of the current u64 and `operand`.
    pub fn min(mut self, key: &Key, operand: u64) -> Self {
        self.push_le64(key, MutationType::MMin, operand);
        self
    }

    /// Store the larger of the current u64 and `operand`.
    pub fn max(mut self, key: &Key, operand: u64) -> Self {
        self.push_le64(key, MutationType::MMax, operand);
        self
    }

    pub fn enqueue(mut self, value: impl Into<Value>, options: EnqueueOptions) -> Self {
        let value = value.into();
        match self.codec.encode(&value) {
            Ok((payload, _)) => self.request.enqueues.push(Enqueue {
                payload,
                deadline_ms: deadline_ms(options.delay.unwrap_or_default()),
                keys_if_undelivered: options.keys_if_undelivered.iter().map(Key::pack).collect(),
                backoff_schedule: options.backoff_schedule,
            }),
            Err(e) => self.fail(e),
        }
        self
    }

    /// Send the write.
    pub async fn commit(self) -> Result<CommitResult> {
        if let Some(e) = self.error {
            return Err(e);
        }
        debug!(
            checks = self.request.checks.len(),
            mutations = self.request.mutations.len(),
            enqueues = self.request.enqueues.len(),
            "Committing atomic write"
        );
        let output = self.rpc.atomic_write(&self.request).await?;
        commit_result(output, &self.checked_keys)
    }

    fn push_le64(&mut self, key: &Key, kind: MutationType, operand: u64) {
        let data = operand.to_le_bytes().to_vec();
        self.push_mutation(key, kind, Some((data, ValueEncoding::Le64)), 0);
    }

    fn push_mutation(
        &mut self,
        key: &Key,
        kind: MutationType,
        value: Option<(Vec<u8>, ValueEncoding)>,
        expire_at_ms: i64,
    ) {
        self.request.mutations.push(Mutation {
            key: key.pack(),
            value: value.map(|(data, encoding)| KvValue {
                data,
                encoding: encoding.to_wire(),
            }),
            mutation_type: kind as i32,
            expire_at_ms,
        });
    }

    fn fail(&mut self, error: Error) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }
}

fn deadline_ms(after: Duration) -> i64 {
    let after = i64::try_from(after.as_millis()).unwrap_or(i64::MAX);
    Utc::now().timestamp_millis().saturating_add(after)
}

/// Map the server's answer onto a [`CommitResult`].
///
/// An empty index list on a check failure means the server did not say which
/// check failed; every checked key is reported.
pub(crate) fn commit_result(output: AtomicWriteOutput, checked_keys: &[Key]) -> Result<CommitResult> {
    match output.status() {
        AtomicWriteStatus::AwSuccess => {
            let versionstamp = Versionstamp::try_from(output.versionstamp.as_slice())?;
            Ok(CommitResult::Committed { versionstamp })
        }
        AtomicWriteStatus::AwCheckFailure => {
            let failed_keys = if output.failed_checks.is_empty() {
                checked_keys.to_vec()
            } else {
                output
                    .failed_checks
                    .iter()
                    .map(|&i| {
                        checked_keys.get(i as usize).cloned().ok_or_else(|| {
                            Error::from(ProtocolError::InvalidMessage(format!(
                                "failed check index {} out of {} checks",
                                i,
                                checked_keys.len()
                            )))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?
            };
            Ok(CommitResult::CheckFailed { failed_keys })
        }
        AtomicWriteStatus::AwWriteDisabled => Err(ProtocolError::WriteDisabled.into()),
        _ => Err(ProtocolError::UnexpectedOutcome {
            operation: "atomic_write",
            status: output.status,
        }
        .into()),
    }
}
