//! # G2burn Communication
//!
//! Serial transport and the GRBL streaming protocol.
//!
//! The [`StreamingController`] is a synchronous state machine that owns a
//! [`Transport`] and performs every read and write on it. The async
//! [`GrblController`] runs one on a dedicated tokio task and exposes the
//! control surface to callers over channels.

pub mod communication;
pub mod firmware;

pub use communication::{
    buffered::{CommandBuffer, PendingCommand},
    mock::{MockHandle, MockTransport},
    serial::{list_ports, SerialPortInfo, SerialTransport},
    ConnectionParams, LineBuffer, ReceivedLines, Transport,
};

pub use firmware::grbl::{
    wake_up, HOME_COMMAND, JOG_PREFIX, SETTINGS_COMMAND, WAKE_UP,
    controller::{ControllerSnapshot, GrblController},
    decode_alarm, decode_error,
    response_parser::{GrblResponse, GrblResponseParser},
    status_parser::{BufferState, StatusReport},
    streamer::{
        ControllerEvent, Fault, FaultReport, StreamJob, StreamLine, StreamingConfig,
        StreamingController,
    },
};
