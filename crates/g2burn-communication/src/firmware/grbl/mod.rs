//! GRBL 1.1 protocol
//!
//! Real-time commands are single bytes the firmware handles the moment they
//! arrive. They never enter the receive buffer and are not acknowledged.

pub mod controller;
pub mod error_decoder;
pub mod response_parser;
pub mod status_parser;
pub mod streamer;

pub use error_decoder::{decode_alarm, decode_error};

use crate::communication::Transport;
use g2burn_core::ConnectionError;
use std::time::Duration;

/// Status report query
pub const STATUS_QUERY: u8 = b'?';
/// Feed hold
pub const FEED_HOLD: u8 = b'!';
/// Cycle start / resume
pub const CYCLE_START: u8 = b'~';
/// Soft reset (Ctrl-X)
pub const SOFT_RESET: u8 = 0x18;

/// Default serial receive buffer of a GRBL 1.1 board
pub const RX_BUFFER_SIZE: usize = 128;

/// Wake-up sequence written right after the port opens. GRBL treats both
/// `\r` and `\n` as line ends and answers each empty line with `ok`.
pub const WAKE_UP: &[u8] = b"\r\n\r\n";

/// Kill alarm lock
pub const UNLOCK_COMMAND: &str = "$X";

/// Run homing cycle
pub const HOME_COMMAND: &str = "$H";

/// Dump firmware settings as `$n=value` lines
pub const SETTINGS_COMMAND: &str = "$$";

/// Prefix of a GRBL 1.1 jog command
pub const JOG_PREFIX: &str = "$J=";

/// Wake the firmware and discard everything it says while settling.
///
/// Opening the port resets most boards, so the wake-up is written first,
/// then `settle` is waited out (boot banner plus one `ok` per empty line of
/// [`WAKE_UP`]) before input is flushed. Blocks the calling thread.
pub fn wake_up<T: Transport + ?Sized>(
    transport: &mut T,
    settle: Duration,
) -> Result<(), ConnectionError> {
    transport.send_raw(WAKE_UP)?;
    std::thread::sleep(settle);
    transport.clear_input()
}
