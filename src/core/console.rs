//! Expect engine: drive an interactive process by matching its output
//!
//! A `Console` accepts command lines and waits, with a hard deadline, for one
//! of several patterns to appear in the process output. Output is consumed up
//! to the end of the match; the text before the match is kept as diagnostic
//! context for the caller.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use regex::Regex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Unmatched output kept for matching; older text is dropped
const MAX_BUFFERED_BYTES: usize = 64 * 1024;

/// Grace period for the process to exit after being killed
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

#[cfg(windows)]
const LINE_ENDING: &str = "\r\n";
#[cfg(not(windows))]
const LINE_ENDING: &str = "\n";

/// Why an expect or send did not succeed
#[derive(Debug, thiserror::Error)]
pub enum ExpectError {
    #[error("no expected output within {0:?}")]
    Timeout(Duration),

    #[error("process output ended")]
    Eof,

    #[error("process i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

/// One interactive process
#[async_trait]
pub trait Console: Send {
    /// Write `line` followed by a line ending
    async fn send_line(&mut self, line: &str) -> Result<(), ExpectError>;

    /// Wait until one of `patterns` matches; returns the index of the pattern
    /// whose match starts earliest in the pending output
    async fn expect(&mut self, patterns: &[&Regex], timeout: Duration) -> Result<usize, ExpectError>;

    /// Output seen before the last match, or everything pending after a failure
    fn before(&self) -> &str;

    /// Has the process not exited yet?
    fn is_alive(&mut self) -> bool;

    /// Kill the process and reap it; safe to call more than once
    async fn terminate(&mut self);
}

/// Find the pattern whose match starts earliest in `text`.
///
/// Ties go to the pattern listed first. Returns `(pattern index, match start,
/// match end)`.
pub fn earliest_match(text: &str, patterns: &[&Regex]) -> Option<(usize, usize, usize)> {
    patterns
        .iter()
        .enumerate()
        .filter_map(|(index, pattern)| pattern.find(text).map(|m| (index, m.start(), m.end())))
        .min_by_key(|(index, start, _)| (*start, *index))
}

/// Pending-output buffer shared by console implementations
#[derive(Debug, Default)]
pub struct OutputBuffer {
    pending: String,
    before: String,
    /// Trailing bytes of a character split across reads
    partial: Vec<u8>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, text: &str) {
        self.pending.push_str(text);
        if self.pending.len() > MAX_BUFFERED_BYTES {
            let mut cut = self.pending.len() - MAX_BUFFERED_BYTES;
            while !self.pending.is_char_boundary(cut) {
                cut += 1;
            }
            self.pending.drain(..cut);
        }
    }

    /// Append raw process output. An incomplete UTF-8 sequence at the end is
    /// held back until the rest arrives; invalid bytes become U+FFFD.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.partial.extend_from_slice(bytes);
        let mut text = String::new();
        let mut rest: &[u8] = &self.partial;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }
        let leftover = rest.to_vec();
        self.partial = leftover;
        self.push(&text);
    }

    /// Consume through the earliest match, if any
    pub fn take_match(&mut self, patterns: &[&Regex]) -> Option<usize> {
        let (index, start, end) = earliest_match(&self.pending, patterns)?;
        self.before = self.pending[..start].to_string();
        self.pending.drain(..end);
        Some(index)
    }

    /// Give up on the pending output; it becomes the diagnostic text
    pub fn abandon(&mut self) {
        self.before = std::mem::take(&mut self.pending);
    }

    pub fn before(&self) -> &str {
        &self.before
    }

    pub fn pending(&self) -> &str {
        &self.pending
    }
}

/// A real child process with piped stdio.
///
/// stdout and stderr are pumped into one channel by background tasks, so
/// prompts printed without a trailing newline are still seen.
pub struct ProcessConsole {
    child: Child,
    stdin: Option<ChildStdin>,
    output: mpsc::UnboundedReceiver<Vec<u8>>,
    buffer: OutputBuffer,
    eof: bool,
}

impl ProcessConsole {
    /// Spawn `program` with `args`.
    ///
    /// On Unix the child gets its own process group so a terminal Ctrl-C
    /// reaches only vpnmon, which then shuts the child down in order.
    pub fn spawn(program: &Path, args: &[String]) -> std::io::Result<Self> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        {
            command.process_group(0);
        }

        let mut child = command.spawn()?;
        let stdin = child.stdin.take();
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump(stderr, tx));
        }
        debug!("spawned {} (pid {:?})", program.display(), child.id());

        Ok(Self {
            child,
            stdin,
            output: rx,
            buffer: OutputBuffer::new(),
            eof: false,
        })
    }
}

async fn pump<R: AsyncRead + Unpin>(mut reader: R, tx: mpsc::UnboundedSender<Vec<u8>>) {
    let mut chunk = [0u8; 1024];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if tx.send(chunk[..n].to_vec()).is_err() {
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl Console for ProcessConsole {
    async fn send_line(&mut self, line: &str) -> Result<(), ExpectError> {
        let stdin = self.stdin.as_mut().ok_or(ExpectError::Eof)?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(LINE_ENDING.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn expect(&mut self, patterns: &[&Regex], timeout: Duration) -> Result<usize, ExpectError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(index) = self.buffer.take_match(patterns) {
                return Ok(index);
            }
            if self.eof {
                self.buffer.abandon();
                return Err(ExpectError::Eof);
            }
            match tokio::time::timeout_at(deadline, self.output.recv()).await {
                Ok(Some(chunk)) => self.buffer.push_bytes(&chunk),
                Ok(None) => self.eof = true,
                Err(_) => {
                    self.buffer.abandon();
                    return Err(ExpectError::Timeout(timeout));
                }
            }
        }
    }

    fn before(&self) -> &str {
        self.buffer.before()
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    async fn terminate(&mut self) {
        self.stdin = None;
        if self.is_alive() {
            if let Err(e) = self.child.start_kill() {
                debug!("kill failed: {}", e);
            }
        }
        if tokio::time::timeout(TERMINATE_GRACE, self.child.wait()).await.is_err() {
            debug!("child did not exit within {:?}", TERMINATE_GRACE);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn re(pattern: &str) -> Regex {
        Regex::new(pattern).unwrap()
    }

    #[test]
    fn test_earliest_match_prefers_position() {
        let username = re("Username:");
        let failed = re("unsuccessful domain name");
        let text = "  >> error: unsuccessful domain name resolution\nVPN> Username:";
        let found = earliest_match(text, &[&username, &failed]);
        assert_eq!(found.map(|(index, _, _)| index), Some(1));
    }

    #[test]
    fn test_earliest_match_tie_goes_to_first_listed() {
        let a = re("VPN");
        let b = re("VPN>");
        assert_eq!(earliest_match("VPN> ", &[&b, &a]).map(|m| m.0), Some(0));
    }

    #[test]
    fn test_earliest_match_none() {
        let prompt = re("VPN>");
        assert!(earliest_match("connecting...", &[&prompt]).is_none());
    }

    #[test]
    fn test_take_match_consumes_through_match() {
        let prompt = re("VPN>");
        let mut buffer = OutputBuffer::new();
        buffer.push("banner text\nVPN> trailing");
        assert_eq!(buffer.take_match(&[&prompt]), Some(0));
        assert_eq!(buffer.before(), "banner text\n");
        assert_eq!(buffer.pending(), " trailing");
    }

    #[test]
    fn test_character_split_across_reads() {
        let prompt = re("Benutzer: ü");
        let mut buffer = OutputBuffer::new();
        let bytes = "Benutzer: ü".as_bytes();
        let (head, tail) = bytes.split_at(bytes.len() - 1);
        buffer.push_bytes(head);
        assert_eq!(buffer.pending(), "Benutzer: ");
        buffer.push_bytes(tail);
        assert_eq!(buffer.pending(), "Benutzer: ü");
        assert_eq!(buffer.take_match(&[&prompt]), Some(0));
    }

    #[test]
    fn test_invalid_bytes_are_replaced() {
        let mut buffer = OutputBuffer::new();
        buffer.push_bytes(b"VPN\xff> ");
        assert_eq!(buffer.pending(), "VPN\u{FFFD}> ");
    }

    #[test]
    fn test_buffer_is_bounded() {
        let mut buffer = OutputBuffer::new();
        for _ in 0..100 {
            buffer.push(&"x".repeat(4096));
        }
        assert!(buffer.pending().len() <= MAX_BUFFERED_BYTES);
    }

    #[test]
    fn test_abandon_keeps_diagnostics() {
        let mut buffer = OutputBuffer::new();
        buffer.push("  >> state: Reconnecting");
        buffer.abandon();
        assert_eq!(buffer.before(), "  >> state: Reconnecting");
        assert_eq!(buffer.pending(), "");
    }
}
