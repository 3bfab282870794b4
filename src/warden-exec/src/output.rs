//! Output collection and line streaming.
//!
//! Both the buffered and the streaming path feed the same
//! [`OutputCollector`], which does size accounting and truncation for the
//! whole execution (stdout and stderr share one budget).

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use warden_protocol::TRUNCATION_MARKER;

/// Chunk size for buffered reads.
const READ_CHUNK: usize = 8 * 1024;

/// Lines longer than this are split.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Capacity of each streaming channel.
pub const STREAM_BUFFER: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Default)]
struct CollectorState {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    collected: u64,
    truncated: bool,
}

/// Output gathered for the terminal result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectedOutput {
    /// Stdout, suffixed with the truncation marker when the cap was hit.
    pub stdout: String,
    pub stderr: String,
    /// Bytes accepted, not counting the marker.
    pub output_size: u64,
    pub truncated: bool,
}

/// Bounded, shared output buffer.
#[derive(Debug, Clone)]
pub struct OutputCollector {
    state: Arc<Mutex<CollectorState>>,
    max_size: u64,
    retain: bool,
}

impl OutputCollector {
    /// `max_size` of zero means unbounded. With `retain` false bytes are
    /// counted but not kept.
    pub fn new(max_size: u64, retain: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(CollectorState::default())),
            max_size,
            retain,
        }
    }

    /// Accept as much of `data` as the budget allows.
    pub fn push(&self, stream: OutputStream, data: &[u8]) {
        let mut state = self.state.lock();
        if state.truncated || data.is_empty() {
            return;
        }

        let remaining = if self.max_size == 0 {
            u64::MAX
        } else {
            self.max_size.saturating_sub(state.collected)
        };
        let take = (data.len() as u64).min(remaining) as usize;
        if take < data.len() {
            state.truncated = true;
        }

        if self.retain {
            match stream {
                OutputStream::Stdout => state.stdout.extend_from_slice(&data[..take]),
                OutputStream::Stderr => state.stderr.extend_from_slice(&data[..take]),
            }
        }
        state.collected += take as u64;
    }

    pub fn is_truncated(&self) -> bool {
        self.state.lock().truncated
    }

    pub fn collected(&self) -> u64 {
        self.state.lock().collected
    }

    pub fn finish(&self) -> CollectedOutput {
        let state = self.state.lock();
        let mut stdout = String::from_utf8_lossy(&state.stdout).into_owned();
        if state.truncated && self.retain {
            if !stdout.is_empty() && !stdout.ends_with('\n') {
                stdout.push('\n');
            }
            stdout.push_str(TRUNCATION_MARKER);
        }
        CollectedOutput {
            stdout,
            stderr: String::from_utf8_lossy(&state.stderr).into_owned(),
            output_size: state.collected,
            truncated: state.truncated,
        }
    }
}

/// Read `reader` to the end into `collector`. Keeps draining after the cap
/// so the writer never blocks on a full pipe. Stops early when `stop` fires.
pub async fn collect<R>(
    mut reader: R,
    stream: OutputStream,
    collector: OutputCollector,
    stop: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            read = reader.read(&mut buf) => match read {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            },
        };
        collector.push(stream, &buf[..n]);
    }
}

/// Forwards complete lines of one pipe to a channel.
#[derive(Debug)]
pub struct OutputStreamer {
    stream: OutputStream,
    sender: mpsc::Sender<String>,
    collector: OutputCollector,
}

impl OutputStreamer {
    pub fn new(
        stream: OutputStream,
        sender: mpsc::Sender<String>,
        collector: OutputCollector,
    ) -> Self {
        Self {
            stream,
            sender,
            collector,
        }
    }

    /// Stream lines (without their terminator) in write order.
    ///
    /// Sending waits for channel capacity. Once the receiver is gone the pipe
    /// is still drained into the collector.
    pub async fn run<R>(self, reader: R, stop: CancellationToken)
    where
        R: AsyncRead + Unpin,
    {
        let mut reader = BufReader::new(reader);
        let mut line = Vec::new();
        let mut forward = true;

        loop {
            line.clear();
            // Buffered data wins over `stop`; only an idle open pipe is abandoned.
            let more = tokio::select! {
                biased;
                read = read_line_capped(&mut reader, &mut line, MAX_LINE_LENGTH) => read,
                _ = stop.cancelled() => Ok(false),
            };
            match more {
                Ok(true) => {}
                Ok(false) | Err(_) => break,
            }

            self.collector.push(self.stream, &line);
            if forward && self.sender.send(line_text(&line)).await.is_err() {
                forward = false;
            }
        }

        // A partial line read before the pipe was abandoned.
        if !line.is_empty() {
            self.collector.push(self.stream, &line);
            if forward {
                let _ = self.sender.send(line_text(&line)).await;
            }
        }
    }
}

fn line_text(line: &[u8]) -> String {
    let mut end = line.len();
    if line[..end].ends_with(b"\n") {
        end -= 1;
    }
    if line[..end].ends_with(b"\r") {
        end -= 1;
    }
    String::from_utf8_lossy(&line[..end]).into_owned()
}

/// Read one line including its `\n`, or at most `max` bytes. Returns
/// `false` at end of input with nothing read.
async fn read_line_capped<R>(reader: &mut R, line: &mut Vec<u8>, max: usize) -> io::Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(!line.is_empty());
        }

        let room = max.saturating_sub(line.len());
        let window = &available[..available.len().min(room)];
        if let Some(pos) = window.iter().position(|&b| b == b'\n') {
            line.extend_from_slice(&window[..=pos]);
            reader.consume(pos + 1);
            return Ok(true);
        }

        let taken = window.len();
        line.extend_from_slice(window);
        reader.consume(taken);
        if line.len() >= max {
            return Ok(true);
        }
    }
}
