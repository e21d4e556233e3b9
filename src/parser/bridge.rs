//! Long-lived external entry parser process
//!
//! One process serves a whole run. Lines go in on stdin, one JSON reply per
//! line comes back on stdout, and replies are matched to records purely by
//! position.

use super::command::ParserCommand;
use super::correlator::{LineCorrelator, PendingQueue};
use super::BridgeError;
use crate::types::{LineRecord, ParsedLine};
use parking_lot::Mutex;
use std::fmt;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Size of each read from the parser's stdout
const READ_CHUNK_SIZE: usize = 8192;

/// Default number of merged records buffered ahead of the consumer
pub const DEFAULT_RESULT_BUFFER: usize = 1024;

/// Lifecycle of the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// Process started, nothing submitted yet
    Idle,
    /// Accepting submissions
    Running,
    /// Input closed, replies still arriving
    Draining,
    /// Parser output has ended
    Closed,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BridgeState::Idle => "idle",
            BridgeState::Running => "running",
            BridgeState::Draining => "draining",
            BridgeState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Ordered stream of merged records produced by the bridge
pub struct ParsedResults {
    rx: mpsc::Receiver<Result<ParsedLine, BridgeError>>,
}

impl ParsedResults {
    /// Next merged record, in submission order. `None` once the parser's output has ended.
    pub async fn next(&mut self) -> Option<Result<ParsedLine, BridgeError>> {
        self.rx.recv().await
    }
}

/// Bridge to the external entry parser.
///
/// Writes are serialized: [`submit`](Self::submit) takes `&mut self` and
/// returns only after the line has been flushed to the process, so a stalled
/// parser stalls the submitter instead of growing an input buffer.
pub struct EntryParserBridge {
    program: String,
    child: Child,
    stdin: Option<ChildStdin>,
    pending: PendingQueue,
    state: Arc<Mutex<BridgeState>>,
    results: Option<ParsedResults>,
    submitted: u64,
}

impl EntryParserBridge {
    /// Start the parser process.
    ///
    /// Missing scripts, training data or executables fail here rather than on
    /// the first submission.
    pub fn spawn(command: &ParserCommand, result_buffer: usize) -> Result<Self, BridgeError> {
        command.check_resources()?;

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BridgeError::ProcessStart {
                program: command.program.clone(),
                reason: e.to_string(),
            })?;

        let (stdin, stdout, stderr) = match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
            (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
            _ => {
                return Err(BridgeError::ProcessStart {
                    program: command.program.clone(),
                    reason: "failed to capture process pipes".to_string(),
                })
            }
        };

        info!("Started entry parser: {} {}", command.program, command.args.join(" "));

        let pending = PendingQueue::new();
        let state = Arc::new(Mutex::new(BridgeState::Idle));
        let (tx, rx) = mpsc::channel(result_buffer.max(1));

        tokio::spawn(pump_output(
            stdout,
            LineCorrelator::new(pending.clone()),
            tx,
            Some(state.clone()),
        ));
        tokio::spawn(log_stderr(stderr));

        Ok(Self {
            program: command.program.clone(),
            child,
            stdin: Some(stdin),
            pending,
            state,
            results: Some(ParsedResults { rx }),
            submitted: 0,
        })
    }

    /// Take the result stream. Returns `None` if it was already taken.
    pub fn results(&mut self) -> Option<ParsedResults> {
        self.results.take()
    }

    pub fn state(&self) -> BridgeState {
        *self.state.lock()
    }

    /// Records submitted so far
    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    /// Records written but not yet answered
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Queue a record and write its text to the parser, waiting for the flush
    pub async fn submit(&mut self, record: LineRecord) -> Result<(), BridgeError> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(BridgeError::InputClosed);
        };

        {
            let mut state = self.state.lock();
            if *state == BridgeState::Idle {
                *state = BridgeState::Running;
            }
        }

        // An embedded newline would produce two replies for one record
        let mut line = record.text.replace(['\r', '\n'], " ");
        line.push('\n');

        let record_id = record.record_id();
        self.pending.push_back(record);

        let written = match stdin.write_all(line.as_bytes()).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };

        if let Err(e) = written {
            self.pending.pop_back();
            return Err(match self.child.try_wait() {
                Ok(Some(status)) => BridgeError::ProcessExited {
                    record_id,
                    status: status.to_string(),
                },
                _ if e.kind() == std::io::ErrorKind::BrokenPipe => BridgeError::ProcessExited {
                    record_id,
                    status: "stdin closed by parser".to_string(),
                },
                _ => BridgeError::Io(e),
            });
        }

        self.submitted += 1;
        Ok(())
    }

    /// Close the parser's input. Safe to call more than once.
    pub async fn finish(&mut self) -> Result<(), BridgeError> {
        if let Some(mut stdin) = self.stdin.take() {
            debug!("Closing entry parser input after {} records", self.submitted);

            {
                let mut state = self.state.lock();
                if *state != BridgeState::Closed {
                    *state = BridgeState::Draining;
                }
            }

            stdin.shutdown().await?;
        }
        Ok(())
    }

    /// Close input and wait for the process to exit
    pub async fn wait(mut self) -> Result<ExitStatus, BridgeError> {
        self.finish().await?;
        let status = self.child.wait().await?;

        if !status.success() {
            return Err(BridgeError::ProcessFailed {
                program: self.program.clone(),
                status: status.to_string(),
            });
        }
        Ok(status)
    }
}

/// Read parser output in chunks, correlate it, and forward merged records.
///
/// Stops at the first protocol error. Sending blocks while the consumer is
/// behind, which in turn stops reading the parser's stdout.
pub async fn pump_output<R: AsyncRead + Unpin>(
    mut reader: R,
    mut correlator: LineCorrelator,
    tx: mpsc::Sender<Result<ParsedLine, BridgeError>>,
    state: Option<Arc<Mutex<BridgeState>>>,
) {
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];

    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                let _ = tx.send(Err(BridgeError::Io(e))).await;
                return;
            }
        };

        match correlator.push_chunk(&chunk[..n]) {
            Ok(parsed) => {
                for item in parsed {
                    if tx.send(Ok(item)).await.is_err() {
                        debug!("Result consumer dropped, stopping parser output pump");
                        return;
                    }
                }
            }
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                return;
            }
        }
    }

    match correlator.finish() {
        Ok(Some(last)) => {
            let _ = tx.send(Ok(last)).await;
        }
        Ok(None) => {}
        Err(e) => {
            let _ = tx.send(Err(e)).await;
        }
    }

    if let Some(state) = state {
        *state.lock() = BridgeState::Closed;
    }
    debug!("Entry parser output ended after {} replies", correlator.replies());
}

async fn log_stderr<R: AsyncRead + Unpin>(stderr: R) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => warn!("entry parser: {}", line),
            Ok(None) => break,
            Err(e) => {
                debug!("Stopped reading entry parser stderr: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Year;

    fn record(page_num: u32, text: &str) -> LineRecord {
        LineRecord {
            uuid: "vol".to_string(),
            year: Year::Range(1850, 1851),
            image_id: "1".to_string(),
            page_uuid: "p".to_string(),
            page_num,
            bbox: [0, page_num, 100, page_num + 10],
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_pump_with_one_byte_pipe() {
        let pending = PendingQueue::new();
        for i in 0..3 {
            pending.push_back(record(i, &format!("text {}", i)));
        }

        // A one-byte duplex forces single-byte deliveries
        let (mut writer, reader) = tokio::io::duplex(1);
        let (tx, mut rx) = mpsc::channel(16);
        let pump = tokio::spawn(pump_output(reader, LineCorrelator::new(pending), tx, None));

        let replies = "{\"subjects\":[],\"locations\":[{\"value\":\"0\"}]}\n\
                       {\"subjects\":[],\"locations\":[{\"value\":\"1\"}]}\n\
                       {\"subjects\":[],\"locations\":[{\"value\":\"2\"}]}";
        writer.write_all(replies.as_bytes()).await.unwrap();
        drop(writer);

        let mut received = Vec::new();
        while let Some(item) = rx.recv().await {
            received.push(item.unwrap());
        }
        pump.await.unwrap();

        assert_eq!(received.len(), 3);
        for (i, parsed) in received.iter().enumerate() {
            assert_eq!(parsed.line.page_num, i as u32);
            assert_eq!(parsed.parsed.locations[0].value, i.to_string());
        }
    }

    #[tokio::test]
    async fn test_pump_stops_on_desync() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let (tx, mut rx) = mpsc::channel(16);
        let pump = tokio::spawn(pump_output(
            reader,
            LineCorrelator::new(PendingQueue::new()),
            tx,
            None,
        ));

        writer.write_all(b"{\"subjects\":[]}\n").await.unwrap();
        drop(writer);

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, Err(BridgeError::Correlation(_))));
        assert!(rx.recv().await.is_none());
        pump.await.unwrap();
    }

    #[tokio::test]
    async fn test_spawn_missing_executable() {
        let command = ParserCommand::new("/nonexistent/entry-parser-binary");
        let result = EntryParserBridge::spawn(&command, 8);

        assert!(matches!(result, Err(BridgeError::ProcessStart { .. })));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(BridgeState::Draining.to_string(), "draining");
    }
}
