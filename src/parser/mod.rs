//! Bridge to the external city directory entry parser
//!
//! The parser is a separate long-lived process (a Python CRF model) that
//! reads one directory line per stdin line and writes one JSON document per
//! stdout line:
//!
//! ```text
//! in:  John Smith, carpenter, 123 Broadway
//! out: {"subjects":[{"type":"primary","value":"John Smith","occupation":"carpenter"}],
//!       "locations":[{"value":"123 Broadway"}]}
//! ```
//!
//! # Architecture
//!
//! ```text
//!   submit(record) ──► PendingQueue (FIFO) ──────────────┐
//!        │                                               │ pop_front
//!        ▼ write + flush                                 ▼
//!   ┌──────────┐  stdout bytes   ┌────────────────┐  ParsedLine   ┌───────────────┐
//!   │  parser  │ ──────────────► │ LineCorrelator │ ────────────► │ ParsedResults │
//!   └──────────┘  (any chunking) └────────────────┘  (bounded)    └───────────────┘
//! ```
//!
//! Replies carry no request id, so correctness depends on the parser
//! answering every line exactly once and in order. Any deviation is reported
//! as a fatal [`BridgeError`].

pub mod bridge;
pub mod command;
pub mod correlator;

pub use bridge::{pump_output, BridgeState, EntryParserBridge, ParsedResults, DEFAULT_RESULT_BUFFER};
pub use command::ParserCommand;
pub use correlator::{LineCorrelator, PendingQueue};

use thiserror::Error;

/// Errors raised by the parser bridge. All of them end the bridge's usefulness.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Failed to start entry parser '{program}': {reason}")]
    ProcessStart { program: String, reason: String },

    #[error("Entry parser protocol out of sync: {0}")]
    Correlation(String),

    #[error("Entry parser sent an undecodable reply '{line}': {source}")]
    Decode {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Entry parser exited ({status}) before record {record_id} could be written")]
    ProcessExited { record_id: String, status: String },

    #[error("Entry parser '{program}' exited unsuccessfully: {status}")]
    ProcessFailed { program: String, status: String },

    #[error("Entry parser input is already closed")]
    InputClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
