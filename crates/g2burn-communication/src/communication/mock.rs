//! In-memory transport for exercising the controller without hardware.
//!
//! [`MockTransport::new`] returns the transport plus a [`MockHandle`] sharing
//! its state, so a test can script firmware responses and inspect every
//! byte written after the transport has been moved into a controller.

use super::{ReceivedLines, Transport};
use g2burn_core::ConnectionError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
struct MockState {
    open: bool,
    writes: Vec<Vec<u8>>,
    incoming: VecDeque<String>,
    fail_writes: bool,
    auto_ok: bool,
    status_reply: Option<String>,
    clear_count: usize,
}

/// Scripted transport. Reads never block: with nothing queued they fail
/// with `Timeout` immediately. Empty lines are answered with `ok` the way
/// the firmware does; other lines only when auto-ok is on.
#[derive(Debug)]
pub struct MockTransport {
    name: String,
    state: Arc<Mutex<MockState>>,
}

/// Test-side view of a [`MockTransport`].
#[derive(Debug, Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new(name: impl Into<String>) -> (Self, MockHandle) {
        let state = Arc::new(Mutex::new(MockState {
            open: true,
            writes: Vec::new(),
            incoming: VecDeque::new(),
            fail_writes: false,
            auto_ok: false,
            status_reply: None,
            clear_count: 0,
        }));
        let handle = MockHandle {
            state: state.clone(),
        };
        (
            Self {
                name: name.into(),
                state,
            },
            handle,
        )
    }
}

impl Transport for MockTransport {
    fn port_name(&self) -> &str {
        &self.name
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }

    fn send_raw(&mut self, bytes: &[u8]) -> Result<(), ConnectionError> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(ConnectionError::NotConnected);
        }
        if state.fail_writes {
            return Err(ConnectionError::LinkError {
                reason: "mock write failure".to_string(),
            });
        }
        state.writes.push(bytes.to_vec());

        if bytes == b"?" {
            if let Some(reply) = state.status_reply.clone() {
                state.incoming.push_back(reply);
            }
            return Ok(());
        }

        // Like GRBL, `\r` and `\n` both end a line and an empty line is
        // always acknowledged.
        let mut line_empty = true;
        for &byte in bytes {
            if byte == b'\r' || byte == b'\n' {
                if line_empty || state.auto_ok {
                    state.incoming.push_back("ok".to_string());
                }
                line_empty = true;
            } else {
                line_empty = false;
            }
        }
        Ok(())
    }

    fn read_lines(&mut self, timeout: Duration) -> Result<ReceivedLines, ConnectionError> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(ConnectionError::NotConnected);
        }
        if state.incoming.is_empty() {
            return Err(ConnectionError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        Ok(ReceivedLines::new(state.incoming.drain(..)))
    }

    fn clear_input(&mut self) -> Result<(), ConnectionError> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(ConnectionError::NotConnected);
        }
        state.incoming.clear();
        state.clear_count += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.state.lock().open = false;
    }
}

impl MockHandle {
    /// Queue a line as if the firmware had sent it.
    pub fn push_line(&self, line: &str) {
        self.state.lock().incoming.push_back(line.to_string());
    }

    /// Also answer every non-empty line written with `ok`.
    pub fn set_auto_ok(&self, enabled: bool) {
        self.state.lock().auto_ok = enabled;
    }

    /// Reply to each `?` query with the given status report.
    pub fn set_status_reply(&self, reply: Option<&str>) {
        self.state.lock().status_reply = reply.map(str::to_string);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    pub fn clear_count(&self) -> usize {
        self.state.lock().clear_count
    }

    /// Every write call in order
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state.lock().writes.clone()
    }

    /// Non-empty command lines written, without their newlines.
    pub fn sent_lines(&self) -> Vec<String> {
        self.state
            .lock()
            .writes
            .iter()
            .filter(|w| w.ends_with(b"\n"))
            .flat_map(|w| {
                String::from_utf8_lossy(w)
                    .split('\n')
                    .map(|l| l.trim().to_string())
                    .filter(|l| !l.is_empty())
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Single-byte writes, i.e. real-time commands.
    pub fn realtime_bytes(&self) -> Vec<u8> {
        self.state
            .lock()
            .writes
            .iter()
            .filter(|w| w.len() == 1)
            .map(|w| w[0])
            .collect()
    }

    /// Total bytes written as command lines.
    pub fn line_bytes_written(&self) -> usize {
        self.state
            .lock()
            .writes
            .iter()
            .filter(|w| w.len() > 1)
            .map(|w| w.len())
            .sum()
    }

    pub fn clear_writes(&self) {
        self.state.lock().writes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firmware::grbl::WAKE_UP;

    #[test]
    fn test_empty_lines_are_acknowledged() {
        let (mut mock, _handle) = MockTransport::new("mock");
        mock.send_raw(WAKE_UP).unwrap();
        let lines: Vec<String> = mock.read_lines(Duration::ZERO).unwrap().collect();
        assert_eq!(lines, vec!["ok"; 4]);
    }

    #[test]
    fn test_commands_need_auto_ok() {
        let (mut mock, handle) = MockTransport::new("mock");
        mock.send_raw(b"G0 X1\n").unwrap();
        assert!(mock.read_lines(Duration::ZERO).is_err());

        handle.set_auto_ok(true);
        mock.send_raw(b"G0 X1\n").unwrap();
        mock.send_raw(b"!").unwrap();
        assert_eq!(mock.read_lines(Duration::ZERO).unwrap().len(), 1);
    }
}
