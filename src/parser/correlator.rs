//! Reassembly of newline-delimited JSON replies and FIFO correlation
//!
//! The entry parser answers every input line with exactly one JSON document
//! on its own line, in submission order. Replies carry no request key, so
//! each completed line is paired with the oldest record still waiting.

use super::BridgeError;
use crate::types::{LineRecord, ParsedFields, ParsedLine};
use crate::util::clip_bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Records submitted to the parser and still waiting for their reply.
///
/// Shared between the single writer (push) and the single reader (pop).
#[derive(Debug, Clone, Default)]
pub struct PendingQueue {
    inner: Arc<Mutex<VecDeque<LineRecord>>>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a record about to be written to the parser
    pub fn push_back(&self, record: LineRecord) {
        self.inner.lock().push_back(record);
    }

    /// Dequeue the record the next reply belongs to
    pub fn pop_front(&self) -> Option<LineRecord> {
        self.inner.lock().pop_front()
    }

    /// Withdraw the most recent record after its write failed
    pub fn pop_back(&self) -> Option<LineRecord> {
        self.inner.lock().pop_back()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Turns an unstructured byte stream into merged [`ParsedLine`]s
#[derive(Debug)]
pub struct LineCorrelator {
    pending: PendingQueue,
    /// Bytes of a reply line whose terminator has not arrived yet
    partial: Vec<u8>,
    replies: u64,
}

impl LineCorrelator {
    pub fn new(pending: PendingQueue) -> Self {
        Self {
            pending,
            partial: Vec::new(),
            replies: 0,
        }
    }

    /// Number of replies correlated so far
    pub fn replies(&self) -> u64 {
        self.replies
    }

    /// Feed one chunk of parser output, returning every record it completes
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Result<Vec<ParsedLine>, BridgeError> {
        let mut results = Vec::new();

        // Only the new bytes can contain a terminator
        let mut search_from = self.partial.len();
        self.partial.extend_from_slice(chunk);

        let buffer = std::mem::take(&mut self.partial);
        let mut line_start = 0;

        while let Some(offset) = buffer[search_from..].iter().position(|&b| b == b'\n') {
            let line_end = search_from + offset;
            results.push(self.correlate(&buffer[line_start..line_end])?);
            line_start = line_end + 1;
            search_from = line_start;
        }

        self.partial = buffer[line_start..].to_vec();
        Ok(results)
    }

    /// Flush a trailing unterminated reply once the parser's output has ended.
    ///
    /// Whitespace after the last newline is not a reply. Fails if records are
    /// still waiting for a reply, since the parser can no longer answer them.
    pub fn finish(&mut self) -> Result<Option<ParsedLine>, BridgeError> {
        let partial = std::mem::take(&mut self.partial);
        let last = if partial.iter().all(|b| b.is_ascii_whitespace()) {
            None
        } else {
            Some(self.correlate(&partial)?)
        };

        let unanswered = self.pending.len();
        if unanswered > 0 {
            return Err(BridgeError::Correlation(format!(
                "parser output ended with {} record(s) unanswered after {} replies",
                unanswered, self.replies
            )));
        }

        Ok(last)
    }

    /// Decode one reply line and pair it with the head of the queue.
    ///
    /// A blank line is a reply too, and fails to decode.
    fn correlate(&mut self, line: &[u8]) -> Result<ParsedLine, BridgeError> {
        let line = line.strip_suffix(b"\r").unwrap_or(line);

        let parsed: ParsedFields =
            serde_json::from_slice(line).map_err(|source| BridgeError::Decode {
                line: clip_bytes(line, 200),
                source,
            })?;

        let record = self.pending.pop_front().ok_or_else(|| {
            BridgeError::Correlation(format!(
                "reply #{} arrived with no pending record",
                self.replies + 1
            ))
        })?;

        self.replies += 1;
        Ok(ParsedLine {
            line: record,
            parsed,
        })
    }
}
