//! Error handling for G2burn
//!
//! Errors are split by the layer that raises them:
//! - Generation errors (bad shapes, images or settings, never sent to hardware)
//! - Connection errors (serial link faults)
//! - Controller errors (protocol and machine faults while streaming)
//!
//! All error types use `thiserror` for ergonomic error handling.

use crate::data::MachineState;
use thiserror::Error;

/// Errors raised while building a motion program or engraving grid.
///
/// These are pure value errors: they are always returned before any
/// hardware interaction takes place.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    /// A shape is degenerate or lies outside the declared workspace
    #[error("Invalid geometry in shape {shape_index}: {reason}")]
    InvalidGeometry {
        /// Position of the offending shape in the input sequence.
        shape_index: usize,
        /// Why the shape was rejected.
        reason: String,
    },

    /// The source pixel matrix or raster options are unusable
    #[error("Invalid image: {reason}")]
    InvalidImage {
        /// Why the image was rejected.
        reason: String,
    },

    /// Generator settings are out of range
    #[error("Invalid generator settings: {reason}")]
    InvalidSettings {
        /// Why the settings were rejected.
        reason: String,
    },
}

impl GenerationError {
    /// Shorthand for an `InvalidGeometry` error.
    pub fn geometry(shape_index: usize, reason: impl Into<String>) -> Self {
        Self::InvalidGeometry {
            shape_index,
            reason: reason.into(),
        }
    }

    /// Shorthand for an `InvalidImage` error.
    pub fn image(reason: impl Into<String>) -> Self {
        Self::InvalidImage {
            reason: reason.into(),
        }
    }

    /// Shorthand for an `InvalidSettings` error.
    pub fn settings(reason: impl Into<String>) -> Self {
        Self::InvalidSettings {
            reason: reason.into(),
        }
    }
}

/// Connection error type
///
/// Transport faults. None of these are retried automatically.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    /// The port does not exist, cannot be opened or is owned by another process
    #[error("Port {port} unavailable: {reason}")]
    PortUnavailable {
        /// The port identifier that failed to open.
        port: String,
        /// The underlying reason.
        reason: String,
    },

    /// A write to the link failed
    #[error("Link error: {reason}")]
    LinkError {
        /// The underlying reason.
        reason: String,
    },

    /// No complete line arrived within the read bound
    #[error("No response within {timeout_ms}ms")]
    Timeout {
        /// The read bound in milliseconds.
        timeout_ms: u64,
    },

    /// Commands are outstanding but no acknowledgment arrived in time
    #[error("Link stalled: {pending} command(s) unacknowledged for {stalled_ms}ms")]
    LinkStall {
        /// Number of unacknowledged commands.
        pending: usize,
        /// Time since the last acknowledgment in milliseconds.
        stalled_ms: u64,
    },

    /// The session is closed
    #[error("Not connected")]
    NotConnected,
}

/// Controller error type
///
/// Protocol state machine faults and API misuse.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControllerError {
    /// The firmware rejected a streamed line
    #[error("{}", describe_streaming_fault(.instruction_index, .code, .message))]
    StreamingFault {
        /// Program instruction index of the rejected line, `None` for framing lines.
        instruction_index: Option<usize>,
        /// Firmware error code.
        code: u8,
        /// Decoded error description.
        message: String,
    },

    /// The operation is not valid in the current machine state
    #[error("Cannot {operation} while {current}")]
    InvalidState {
        /// The state at the time of the call.
        current: MachineState,
        /// The operation that was refused.
        operation: String,
    },

    /// The firmware reported an alarm; operator reset required
    #[error("Alarm {code}: {message}")]
    AlarmCondition {
        /// Firmware alarm code.
        code: u8,
        /// Decoded alarm description.
        message: String,
    },
}

fn describe_streaming_fault(index: &Option<usize>, code: &u8, message: &str) -> String {
    match index {
        Some(index) => format!("Instruction {} rejected with error {}: {}", index, code, message),
        None => format!("Program framing line rejected with error {}: {}", code, message),
    }
}

/// Main error type for G2burn
#[derive(Error, Debug)]
pub enum Error {
    /// Generation error
    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Controller error
    #[error(transparent)]
    Controller(#[from] ControllerError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a new generic error
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }
}

/// Result type for G2burn operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streaming_fault_display() {
        let err = ControllerError::StreamingFault {
            instruction_index: Some(7),
            code: 20,
            message: "Unsupported command".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Instruction 7 rejected with error 20: Unsupported command"
        );

        let framing = ControllerError::StreamingFault {
            instruction_index: None,
            code: 22,
            message: "Feed rate undefined".to_string(),
        };
        assert!(framing.to_string().starts_with("Program framing line"));
    }

    #[test]
    fn test_invalid_state_display() {
        let err = ControllerError::InvalidState {
            current: MachineState::Run,
            operation: "start a stream".to_string(),
        };
        assert_eq!(err.to_string(), "Cannot start a stream while Run");
    }

    #[test]
    fn test_conversion_into_unified_error() {
        let err: Error = ConnectionError::NotConnected.into();
        assert!(matches!(err, Error::Connection(ConnectionError::NotConnected)));

        let err: Error = GenerationError::geometry(2, "zero width").into();
        assert_eq!(err.to_string(), "Invalid geometry in shape 2: zero width");
    }
}
