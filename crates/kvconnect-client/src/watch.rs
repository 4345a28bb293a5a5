//! Watch stream decoding.
//!
//! The body of a watch response is an endless sequence of frames:
//!
//! ```text
//! +----------------+---------------------------+
//! | len: u32 (LE)  | WatchOutput (len bytes)   |
//! +----------------+---------------------------+
//! ```
//!
//! A zero length is a keepalive. The server ending the body between frames is
//! a graceful end of the stream; ending it inside a frame is a protocol error,
//! and so is a declared length above the decoder's frame limit.

use crate::transport::BodyStream;
use crate::value::{decode_entry_for, KvEntry, ValueCodec};
use bytes::{Buf, Bytes, BytesMut};
use futures::stream::{FusedStream, Stream, StreamExt};
use kvconnect_proto::{Message, SnapshotReadStatus, WatchOutput};
use kvconnect_types::{Error, Key, ProtocolError, Result};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tracing::debug;

const LEN_PREFIX: usize = 4;

/// Largest frame accepted by default.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Incremental length-prefixed frame splitter.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    max_frame_len: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self {
            buffer: BytesMut::new(),
            max_frame_len: MAX_FRAME_LEN,
        }
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    pub fn extend(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Next complete non-empty frame. Keepalives are consumed silently.
    ///
    /// Fails as soon as a length prefix above the frame limit is seen,
    /// without waiting for the payload.
    pub fn next_frame(&mut self) -> std::result::Result<Option<Bytes>, ProtocolError> {
        loop {
            let Some(len) = self.peek_len() else {
                return Ok(None);
            };
            if len == 0 {
                self.buffer.advance(LEN_PREFIX);
                continue;
            }
            if len > self.max_frame_len {
                return Err(ProtocolError::InvalidMessage(format!(
                    "watch frame of {} bytes exceeds the {} byte limit",
                    len, self.max_frame_len
                )));
            }
            if self.buffer.len() - LEN_PREFIX < len {
                return Ok(None);
            }
            self.buffer.advance(LEN_PREFIX);
            return Ok(Some(self.buffer.split_to(len).freeze()));
        }
    }

    /// Check that the input ended on a frame boundary.
    pub fn finish(&self) -> std::result::Result<(), ProtocolError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let expected = match self.peek_len() {
            Some(len) => LEN_PREFIX.saturating_add(len),
            None => LEN_PREFIX,
        };
        Err(ProtocolError::Truncated {
            expected,
            available: self.buffer.len(),
        })
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    fn peek_len(&self) -> Option<usize> {
        match self.buffer.get(..LEN_PREFIX)? {
            [a, b, c, d] => Some(u32::from_le_bytes([*a, *b, *c, *d]) as usize),
            _ => None,
        }
    }
}

/// Per-key report inside one watch batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchChange {
    Unchanged { key: Key },
    /// New state of the key; a `None` value means it was deleted.
    Changed(KvEntry),
}

impl WatchChange {
    pub fn key(&self) -> &Key {
        match self {
            WatchChange::Unchanged { key } => key,
            WatchChange::Changed(entry) => &entry.key,
        }
    }
}

/// Lazy stream of watch batches over one connection.
///
/// The response body is owned by the stream: it is released as soon as the
/// stream completes, fails, or is dropped.
pub struct WatchStream {
    url: String,
    keys: Vec<Key>,
    body: Option<BodyStream>,
    decoder: FrameDecoder,
    codec: Arc<dyn ValueCodec>,
}

impl WatchStream {
    pub fn new(
        url: String,
        keys: Vec<Key>,
        body: BodyStream,
        codec: Arc<dyn ValueCodec>,
    ) -> Self {
        Self {
            url,
            keys,
            body: Some(body),
            decoder: FrameDecoder::new(),
            codec,
        }
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    /// Release the underlying connection now. Further polls yield `None`.
    pub fn close(&mut self) {
        if self.body.take().is_some() {
            debug!(url = %self.url, "Watch stream closed");
        }
        self.decoder.clear();
    }

    fn decode_frame(&self, frame: Bytes) -> Result<Vec<WatchChange>> {
        let output = WatchOutput::decode(frame).map_err(|e| {
            ProtocolError::InvalidMessage(format!("watch frame from {}: {}", self.url, e))
        })?;

        match output.status() {
            SnapshotReadStatus::SrSuccess => {}
            SnapshotReadStatus::SrReadDisabled => return Err(ProtocolError::ReadDisabled.into()),
            _ => {
                return Err(ProtocolError::UnexpectedOutcome {
                    operation: "watch",
                    status: output.status,
                }
                .into())
            }
        }

        if output.keys.len() != self.keys.len() {
            return Err(ProtocolError::InvalidMessage(format!(
                "watch frame reports {} keys, {} were requested",
                output.keys.len(),
                self.keys.len()
            ))
            .into());
        }

        self.keys
            .iter()
            .zip(output.keys)
            .map(|(key, report)| {
                if !report.changed {
                    return Ok(WatchChange::Unchanged { key: key.clone() });
                }
                let entry = report.entry_if_changed.unwrap_or_default();
                decode_entry_for(self.codec.as_ref(), key.clone(), entry).map(WatchChange::Changed)
            })
            .collect()
    }
}

impl Stream for WatchStream {
    type Item = Result<Vec<WatchChange>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            let next = this.decoder.next_frame();
            let batch = match next {
                Ok(None) => None,
                Ok(Some(frame)) => Some(this.decode_frame(frame)),
                Err(e) => Some(Err(e.into())),
            };
            if let Some(batch) = batch {
                if batch.is_err() {
                    this.close();
                }
                return Poll::Ready(Some(batch));
            }

            let Some(body) = this.body.as_mut() else {
                return Poll::Ready(None);
            };

            match ready!(body.poll_next_unpin(cx)) {
                Some(Ok(chunk)) => this.decoder.extend(&chunk),
                Some(Err(failure)) => {
                    let url = this.url.clone();
                    this.close();
                    return Poll::Ready(Some(Err(Error::Transport {
                        url,
                        attempts: 1,
                        status: None,
                        message: failure.message,
                    })));
                }
                None => {
                    let outcome = this.decoder.finish();
                    this.close();
                    return match outcome {
                        Ok(()) => Poll::Ready(None),
                        Err(e) => Poll::Ready(Some(Err(e.into()))),
                    };
                }
            }
        }
    }
}

impl FusedStream for WatchStream {
    fn is_terminated(&self) -> bool {
        self.body.is_none()
    }
}

impl Drop for WatchStream {
    fn drop(&mut self) {
        self.close();
    }
}
