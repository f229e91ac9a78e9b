//! Transport layer
//!
//! A [`Transport`] owns one physical link. It carries raw bytes out and
//! newline-framed text lines in. Transports never reconnect or retry on their
//! own; that decision belongs to the caller.

use g2burn_core::ConnectionError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

pub mod buffered;
pub mod mock;
pub mod serial;

/// Connection parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Port identifier (e.g., "/dev/ttyUSB0", "COM3")
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Time to wait after opening before talking to the firmware, which
    /// resets when the port opens
    pub settle_delay_ms: u64,
}

impl ConnectionParams {
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            ..Default::default()
        }
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 115200,
            settle_delay_ms: 2000,
        }
    }
}

/// Lines received during one read call. Finite; consumed in arrival order.
#[derive(Debug, Default)]
pub struct ReceivedLines {
    lines: VecDeque<String>,
}

impl ReceivedLines {
    pub fn new(lines: impl IntoIterator<Item = String>) -> Self {
        Self {
            lines: lines.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl Iterator for ReceivedLines {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.lines.pop_front()
    }
}

/// A character-oriented, line-framed link to a controller.
pub trait Transport: Send {
    /// Port identifier this session was opened on
    fn port_name(&self) -> &str;

    fn is_open(&self) -> bool;

    /// Write bytes immediately. Fails with `LinkError` on write failure and
    /// `NotConnected` after `close`.
    fn send_raw(&mut self, bytes: &[u8]) -> Result<(), ConnectionError>;

    /// Wait up to `timeout` for at least one complete line and return every
    /// complete line received so far. Fails with `Timeout` when none arrives.
    fn read_lines(&mut self, timeout: Duration) -> Result<ReceivedLines, ConnectionError>;

    /// Discard anything received but not yet read.
    fn clear_input(&mut self) -> Result<(), ConnectionError>;

    /// Close the link. Safe to call more than once.
    fn close(&mut self);
}

/// Reassembles newline-terminated lines from arbitrary byte chunks.
///
/// Carriage returns are stripped and blank lines dropped.
#[derive(Debug, Default)]
pub struct LineBuffer {
    partial: Vec<u8>,
    complete: VecDeque<String>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        for &b in bytes {
            if b == b'\n' {
                let line = String::from_utf8_lossy(&self.partial).trim().to_string();
                self.partial.clear();
                if !line.is_empty() {
                    self.complete.push_back(line);
                }
            } else if b != b'\r' {
                self.partial.push(b);
            }
        }
    }

    pub fn has_lines(&self) -> bool {
        !self.complete.is_empty()
    }

    /// Take every complete line received so far.
    pub fn take_lines(&mut self) -> ReceivedLines {
        ReceivedLines::new(self.complete.drain(..))
    }

    pub fn clear(&mut self) {
        self.partial.clear();
        self.complete.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_buffer_reassembles_chunks() {
        let mut buf = LineBuffer::new();
        buf.push(b"o");
        assert!(!buf.has_lines());
        buf.push(b"k\r\n<Idle|MPos:0.000,0.000,0.000");
        buf.push(b"|FS:0,0>\r\n\r\nerr");
        let lines: Vec<String> = buf.take_lines().collect();
        assert_eq!(lines, vec!["ok", "<Idle|MPos:0.000,0.000,0.000|FS:0,0>"]);

        buf.push(b"or:20\n");
        let lines: Vec<String> = buf.take_lines().collect();
        assert_eq!(lines, vec!["error:20"]);
    }

    #[test]
    fn test_received_lines_is_finite() {
        let mut lines = ReceivedLines::new(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines.next().as_deref(), Some("a"));
        assert_eq!(lines.next().as_deref(), Some("b"));
        assert_eq!(lines.next(), None);
    }
}
