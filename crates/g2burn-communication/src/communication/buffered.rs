//! Outstanding-buffer tracking for the GRBL character-counting protocol
//!
//! GRBL has a fixed serial receive buffer and no backpressure other than one
//! `ok`/`error` acknowledgment per processed line. The sender therefore keeps
//! every sent-but-unacknowledged line here and only sends the next line when
//! its bytes fit in what is left of the budget.
//!
//! Acknowledgments arrive strictly in send order, so they are correlated by
//! position: each one retires the oldest pending line.

use std::collections::VecDeque;
use std::time::Instant;

/// A sent line awaiting acknowledgment
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCommand {
    /// Line text without the newline
    pub text: String,
    /// Bytes on the wire, newline included
    pub bytes: usize,
    pub enqueued_at: Instant,
    /// Program instruction index, `None` for framing and system lines
    pub instruction_index: Option<usize>,
}

impl PendingCommand {
    pub fn new(text: impl Into<String>, instruction_index: Option<usize>) -> Self {
        let text = text.into();
        Self {
            bytes: text.len() + 1,
            text,
            enqueued_at: Instant::now(),
            instruction_index,
        }
    }
}

/// FIFO of pending commands bounded by a byte budget.
#[derive(Debug, Clone)]
pub struct CommandBuffer {
    pending: VecDeque<PendingCommand>,
    outstanding_bytes: usize,
    max_buffer_bytes: usize,
}

impl CommandBuffer {
    pub fn new(max_buffer_bytes: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            outstanding_bytes: 0,
            max_buffer_bytes,
        }
    }

    pub fn max_buffer_bytes(&self) -> usize {
        self.max_buffer_bytes
    }

    /// Sum of the byte lengths of every pending command
    pub fn outstanding_bytes(&self) -> usize {
        self.outstanding_bytes
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Check whether `bytes` more would still fit in the budget
    pub fn has_room(&self, bytes: usize) -> bool {
        self.outstanding_bytes + bytes <= self.max_buffer_bytes
    }

    /// Record a sent command. Returns the command back when it does not fit.
    pub fn push(&mut self, command: PendingCommand) -> Result<(), PendingCommand> {
        if !self.has_room(command.bytes) {
            return Err(command);
        }
        self.outstanding_bytes += command.bytes;
        self.pending.push_back(command);
        Ok(())
    }

    /// Retire the oldest pending command.
    pub fn acknowledge(&mut self) -> Option<PendingCommand> {
        let command = self.pending.pop_front()?;
        self.outstanding_bytes -= command.bytes;
        Some(command)
    }

    pub fn front(&self) -> Option<&PendingCommand> {
        self.pending.front()
    }

    /// Discard every pending command; returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        self.outstanding_bytes = 0;
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_withholds_third_line() {
        let mut buffer = CommandBuffer::new(20);
        for i in 0..2 {
            assert!(buffer
                .push(PendingCommand::new("G0 X10 Y2", Some(i)))
                .is_ok());
        }
        assert_eq!(buffer.outstanding_bytes(), 20);
        let rejected = buffer.push(PendingCommand::new("G0 X10 Y2", Some(2)));
        assert!(rejected.is_err());
        assert_eq!(buffer.len(), 2);

        let acked = buffer.acknowledge().unwrap();
        assert_eq!(acked.instruction_index, Some(0));
        assert!(buffer.has_room(10));
    }

    #[test]
    fn test_clear_reports_dropped() {
        let mut buffer = CommandBuffer::new(128);
        buffer.push(PendingCommand::new("M3", None)).unwrap();
        buffer.push(PendingCommand::new("M5", None)).unwrap();
        assert_eq!(buffer.clear(), 2);
        assert_eq!(buffer.outstanding_bytes(), 0);
        assert!(buffer.acknowledge().is_none());
    }
}
