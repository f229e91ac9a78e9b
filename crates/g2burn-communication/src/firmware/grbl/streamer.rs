//! GRBL streaming state machine
//!
//! [`StreamingController`] owns the transport and is driven by repeated calls
//! to [`StreamingController::poll`]. Each poll runs four phases in order:
//!
//! 1. read every line the firmware sent and apply it
//! 2. check for a stalled link
//! 3. send as many queued lines as the receive-buffer budget allows
//! 4. send a status query when the poll interval has elapsed
//!
//! Control requests (pause, emergency stop, ...) are applied between polls by
//! the same owner, so the link never sees interleaved writers and a status
//! query can never land inside a line.

use super::error_decoder::{decode_alarm, decode_error};
use super::response_parser::{GrblResponse, GrblResponseParser};
use super::status_parser::StatusReport;
use super::{
    wake_up, CYCLE_START, FEED_HOLD, HOME_COMMAND, JOG_PREFIX, RX_BUFFER_SIZE, SETTINGS_COMMAND,
    SOFT_RESET, STATUS_QUERY, UNLOCK_COMMAND,
};
use crate::communication::buffered::{CommandBuffer, PendingCommand};
use crate::communication::serial::SerialTransport;
use crate::communication::{ConnectionParams, Transport};
use chrono::{DateTime, Utc};
use g2burn_core::{ConnectionError, ControllerError, Error, MachineState, Position, Result};
use g2burn_designer::{format_number, MotionInstruction, MotionProgram};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Streaming parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamingConfig {
    /// Firmware receive buffer size in bytes
    pub max_buffer_bytes: usize,
    /// Interval between `?` status queries
    pub poll_interval: Duration,
    /// How long outstanding commands may go without any acknowledgment
    /// before the link is reported stalled
    pub stall_timeout: Duration,
    /// Upper bound on each read phase
    pub read_timeout: Duration,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            max_buffer_bytes: RX_BUFFER_SIZE,
            poll_interval: Duration::from_millis(200),
            stall_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_millis(20),
        }
    }
}

/// One line of a stream job
#[derive(Debug, Clone, PartialEq)]
pub struct StreamLine {
    pub text: String,
    /// Body instruction index; `None` for preamble and postamble lines
    pub instruction_index: Option<usize>,
    /// Counted as sent without touching the wire (comments)
    pub skip: bool,
}

impl StreamLine {
    fn framing(text: &str) -> Self {
        Self {
            text: text.to_string(),
            instruction_index: None,
            skip: false,
        }
    }

    fn instruction(index: usize, instruction: &MotionInstruction) -> Self {
        Self {
            text: instruction.to_string(),
            instruction_index: Some(index),
            skip: instruction.is_comment(),
        }
    }

    /// Bytes this line occupies in the receive buffer, newline included
    pub fn bytes(&self) -> usize {
        self.text.len() + 1
    }
}

/// The lines of one streaming run
#[derive(Debug, Clone, PartialEq)]
pub struct StreamJob {
    pub id: Uuid,
    pub lines: Vec<StreamLine>,
    /// Number of body instructions, the denominator of `progress()`
    pub total_instructions: usize,
}

impl StreamJob {
    /// Preamble, body and postamble of a program.
    pub fn from_program(program: &MotionProgram) -> Self {
        let lines = program
            .preamble()
            .iter()
            .map(|line| StreamLine::framing(line))
            .chain(
                program
                    .instructions()
                    .iter()
                    .enumerate()
                    .map(|(i, instruction)| StreamLine::instruction(i, instruction)),
            )
            .chain(program.postamble().iter().map(|line| StreamLine::framing(line)))
            .collect();

        Self {
            id: Uuid::new_v4(),
            lines,
            total_instructions: program.instructions().len(),
        }
    }

    /// Bare instructions with no preamble or postamble.
    pub fn from_instructions(instructions: &[MotionInstruction]) -> Self {
        Self {
            id: Uuid::new_v4(),
            lines: instructions
                .iter()
                .enumerate()
                .map(|(i, instruction)| StreamLine::instruction(i, instruction))
                .collect(),
            total_instructions: instructions.len(),
        }
    }
}

/// Any fault the controller can report
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Fault {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Controller(#[from] ControllerError),
}

/// A fault with the context an operator needs to choose between abort and
/// manual recovery.
#[derive(Debug, Clone, PartialEq)]
pub struct FaultReport {
    pub fault: Fault,
    /// Instruction in flight when the fault occurred, if any
    pub instruction_index: Option<usize>,
    /// Machine state after the fault was applied
    pub state: MachineState,
    pub link_open: bool,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for FaultReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (state {}, ", self.fault, self.state)?;
        match self.instruction_index {
            Some(index) => write!(f, "instruction {}, ", index)?,
            None => write!(f, "no instruction in flight, ")?,
        }
        write!(f, "link {})", if self.link_open { "open" } else { "closed" })
    }
}

/// Notifications emitted by the controller, in the order they happened
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    Connected { port: String },
    Disconnected,
    StateChanged { from: MachineState, to: MachineState },
    StreamStarted { job_id: Uuid, total: usize },
    Progress { sent: usize, total: usize },
    StreamCompleted { job_id: Uuid, instructions: usize },
    StreamStopped { job_id: Uuid },
    StreamAborted { job_id: Uuid },
    Fault(FaultReport),
    Alarm { code: u8, message: String },
    Status(StatusReport),
    Message(String),
    /// One `$n=value` line of a settings dump
    Setting { number: u16, value: String },
    /// A home, jog or settings command was acknowledged `ok`
    CommandCompleted { command: String },
    /// The alarm lock was cleared by `$X`
    Unlocked,
}

#[derive(Debug)]
struct ActiveStream {
    job: StreamJob,
    next_line: usize,
    instructions_sent: usize,
    stopping: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnlockPhase {
    AwaitingBanner,
    AwaitingAck,
}

/// Character-counting GRBL streamer.
pub struct StreamingController {
    config: StreamingConfig,
    transport: Option<Box<dyn Transport>>,
    parser: GrblResponseParser,
    buffer: CommandBuffer,
    stream: Option<ActiveStream>,
    state: MachineState,
    estop_latched: bool,
    /// Set by `pause`, cleared only by `resume`, resets and aborts
    hold: bool,
    unlock: Option<UnlockPhase>,
    /// Acknowledgments still owed for commands discarded by a reset
    stale_acks: usize,
    last_ack: Instant,
    stall_reported: bool,
    last_status_query: Instant,
    last_status: Option<StatusReport>,
    last_fault: Option<FaultReport>,
    settings: BTreeMap<u16, String>,
    progress: (usize, usize),
    events: Vec<ControllerEvent>,
}

impl fmt::Debug for StreamingController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingController")
            .field("port", &self.port_name())
            .field("state", &self.state)
            .field("outstanding_bytes", &self.buffer.outstanding_bytes())
            .field("streaming", &self.stream.is_some())
            .field("estop_latched", &self.estop_latched)
            .finish()
    }
}

impl Default for StreamingController {
    fn default() -> Self {
        Self::new(StreamingConfig::default())
    }
}

impl StreamingController {
    pub fn new(config: StreamingConfig) -> Self {
        Self {
            buffer: CommandBuffer::new(config.max_buffer_bytes),
            config,
            transport: None,
            parser: GrblResponseParser::new(),
            stream: None,
            state: MachineState::Disconnected,
            estop_latched: false,
            hold: false,
            unlock: None,
            stale_acks: 0,
            last_ack: Instant::now(),
            stall_reported: false,
            last_status_query: Instant::now(),
            last_status: None,
            last_fault: None,
            settings: BTreeMap::new(),
            progress: (0, 0),
            events: Vec::new(),
        }
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    /// Open a serial port, run the wake-up handshake and attach.
    pub fn connect(&mut self, params: &ConnectionParams) -> Result<()> {
        if self.transport.is_some() {
            return Err(self.invalid_state("connect"));
        }
        let mut transport = SerialTransport::open(params)?;
        if let Err(e) = wake_up(&mut transport, params.settle_delay()) {
            transport.close();
            return Err(e.into());
        }
        self.attach(transport)
    }

    pub fn attach<T: Transport + 'static>(&mut self, transport: T) -> Result<()> {
        self.attach_boxed(Box::new(transport))
    }

    /// Take ownership of an open transport that has already been through
    /// [`wake_up`]. Nothing is written; input still queued is discarded.
    pub fn attach_boxed(&mut self, mut transport: Box<dyn Transport>) -> Result<()> {
        self.disconnect();

        if let Err(e) = transport.clear_input() {
            transport.close();
            return Err(e.into());
        }

        let port = transport.port_name().to_string();
        self.transport = Some(transport);
        self.reset_link_state();
        self.last_ack = Instant::now();
        self.last_status_query = Instant::now();

        tracing::info!("Connected to {}", port);
        self.events.push(ControllerEvent::Connected { port });
        self.set_state(MachineState::Idle);
        Ok(())
    }

    /// Close the link. Any active stream is aborted. Does nothing when
    /// already disconnected.
    pub fn disconnect(&mut self) {
        let Some(mut transport) = self.transport.take() else {
            return;
        };
        transport.close();
        tracing::info!("Disconnected from {}", transport.port_name());

        self.abort_stream();
        self.reset_link_state();
        self.set_state(MachineState::Disconnected);
        self.events.push(ControllerEvent::Disconnected);
    }

    pub fn start_stream(&mut self, program: &MotionProgram) -> Result<Uuid> {
        self.start_job(StreamJob::from_program(program))
    }

    /// Begin streaming a job and fill the buffer budget right away.
    ///
    /// Only valid from `Idle` with no stream draining and no latched
    /// emergency stop. On failure nothing is sent.
    pub fn start_job(&mut self, job: StreamJob) -> Result<Uuid> {
        self.require_link()?;
        if self.estop_latched {
            return Err(self.invalid_state("start streaming before reset and unlock"));
        }
        if self.stream.is_some() || self.state != MachineState::Idle {
            return Err(self.invalid_state("start streaming"));
        }

        let max = self.config.max_buffer_bytes;
        if let Some(line) = job.lines.iter().find(|l| !l.skip && l.bytes() > max) {
            return Err(Error::other(format!(
                "Line '{}' needs {} bytes but the receive buffer holds {}",
                line.text,
                line.bytes(),
                max
            )));
        }

        let job_id = job.id;
        let total = job.total_instructions;
        tracing::info!(
            "Starting stream {} ({} instructions, {} lines)",
            job_id,
            total,
            job.lines.len()
        );

        self.stream = Some(ActiveStream {
            job,
            next_line: 0,
            instructions_sent: 0,
            stopping: false,
        });
        self.progress = (0, total);
        self.stall_reported = false;
        self.events
            .push(ControllerEvent::StreamStarted { job_id, total });
        self.set_state(MachineState::Run);

        self.pump();
        self.check_completion();
        Ok(job_id)
    }

    /// Feed hold. Lines are withheld until `resume`.
    pub fn pause(&mut self) -> Result<()> {
        self.require_link()?;
        let allowed = matches!(self.state, MachineState::Run | MachineState::Jog)
            || (self.stream.is_some() && self.state != MachineState::Alarm);
        if !allowed {
            return Err(self.invalid_state("pause"));
        }

        self.send_realtime(FEED_HOLD)?;
        tracing::info!("Feed hold");
        self.hold = true;
        self.set_state(MachineState::Hold);
        Ok(())
    }

    /// Cycle start. Only valid in `Hold`.
    pub fn resume(&mut self) -> Result<()> {
        self.require_link()?;
        if !self.hold && self.state != MachineState::Hold {
            return Err(self.invalid_state("resume"));
        }

        self.send_realtime(CYCLE_START)?;
        tracing::info!("Cycle start");
        self.hold = false;
        self.set_state(MachineState::Run);
        self.pump();
        self.check_completion();
        Ok(())
    }

    /// Stop sending further lines. Lines already sent drain normally and
    /// `StreamStopped` is emitted once they are all acknowledged.
    pub fn stop_stream(&mut self) -> Result<()> {
        match self.stream.as_mut() {
            Some(stream) => {
                stream.stopping = true;
                tracing::info!(
                    "Stopping stream {} after {} instructions",
                    stream.job.id,
                    stream.instructions_sent
                );
            }
            None => return Err(self.invalid_state("stop streaming")),
        }
        self.check_completion();
        Ok(())
    }

    /// Soft-reset the firmware immediately, discard every pending command,
    /// abort the stream and latch the controller in `Alarm` until
    /// [`reset_and_unlock`](Self::reset_and_unlock) completes.
    pub fn emergency_stop(&mut self) -> Result<()> {
        self.require_link()?;
        self.estop_latched = true;
        self.send_realtime(SOFT_RESET)?;

        let dropped = self.buffer.clear();
        self.stale_acks += dropped;
        tracing::warn!(
            "Emergency stop: discarded {} pending command(s)",
            dropped
        );

        self.abort_stream();
        self.unlock = None;
        self.stall_reported = false;
        self.set_state(MachineState::Alarm);
        Ok(())
    }

    /// Soft-reset, wait for the startup banner, then send `$X`. The
    /// emergency-stop latch clears when `$X` is acknowledged.
    pub fn reset_and_unlock(&mut self) -> Result<()> {
        self.require_link()?;
        self.send_realtime(SOFT_RESET)?;

        self.stale_acks += self.buffer.clear();
        self.abort_stream();
        self.stall_reported = false;
        self.unlock = Some(UnlockPhase::AwaitingBanner);
        tracing::info!("Soft reset sent, waiting for controller banner");
        Ok(())
    }

    /// Run the homing cycle. Valid from `Idle`, or from `Alarm` to clear a
    /// limit alarm. GRBL acknowledges `$H` only once homing has finished,
    /// so it is exempt from stall detection.
    pub fn home(&mut self) -> Result<()> {
        self.require_control(&[MachineState::Idle, MachineState::Alarm], "home")?;
        self.send_control(HOME_COMMAND.to_string())?;
        tracing::info!("Homing");
        self.set_state(MachineState::Run);
        Ok(())
    }

    /// Relative jog in millimeters at `feed_rate` mm/min. Valid from `Idle`.
    pub fn jog(&mut self, dx: f64, dy: f64, feed_rate: f64) -> Result<()> {
        if !(dx.is_finite() && dy.is_finite()) || (dx == 0.0 && dy == 0.0) {
            return Err(Error::other(format!(
                "Jog distance must be finite and non-zero, got ({}, {})",
                dx, dy
            )));
        }
        if !(feed_rate.is_finite() && feed_rate > 0.0) {
            return Err(Error::other(format!(
                "Jog feed rate must be positive, got {}",
                feed_rate
            )));
        }
        self.require_control(&[MachineState::Idle], "jog")?;

        let mut command = format!("{}G91 G21", JOG_PREFIX);
        for (axis, distance) in [('X', dx), ('Y', dy)] {
            if distance != 0.0 {
                command.push_str(&format!(" {}{}", axis, format_number(distance)));
            }
        }
        command.push_str(&format!(" F{}", format_number(feed_rate)));

        self.send_control(command)?;
        self.set_state(MachineState::Jog);
        Ok(())
    }

    /// Ask for the firmware settings. Each `$n=value` line updates
    /// [`settings`](Self::settings) and emits [`ControllerEvent::Setting`].
    pub fn query_settings(&mut self) -> Result<()> {
        self.require_control(&[MachineState::Idle], "query settings")?;
        self.settings.clear();
        self.send_control(SETTINGS_COMMAND.to_string())
    }

    /// Run one loop iteration: read, stall check, send, status query.
    pub fn poll(&mut self) {
        if self.transport.is_none() {
            return;
        }
        self.read_phase();
        self.check_stall();
        self.pump();
        self.check_completion();
        self.query_status();
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    /// Body instructions sent over body instructions in the current or
    /// most recent job
    pub fn progress(&self) -> (usize, usize) {
        self.progress
    }

    pub fn outstanding_bytes(&self) -> usize {
        self.buffer.outstanding_bytes()
    }

    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_streaming(&self) -> bool {
        self.stream.is_some()
    }

    pub fn job_id(&self) -> Option<Uuid> {
        self.stream.as_ref().map(|s| s.job.id)
    }

    pub fn estop_latched(&self) -> bool {
        self.estop_latched
    }

    pub fn is_link_open(&self) -> bool {
        self.transport.as_ref().is_some_and(|t| t.is_open())
    }

    pub fn port_name(&self) -> Option<&str> {
        self.transport.as_ref().map(|t| t.port_name())
    }

    pub fn last_fault(&self) -> Option<&FaultReport> {
        self.last_fault.as_ref()
    }

    /// Firmware settings from the last `$$` dump
    pub fn settings(&self) -> &BTreeMap<u16, String> {
        &self.settings
    }

    pub fn last_status(&self) -> Option<&StatusReport> {
        self.last_status.as_ref()
    }

    pub fn machine_position(&self) -> Option<Position> {
        self.last_status.as_ref().and_then(|s| s.machine_position)
    }

    pub fn work_position(&self) -> Option<Position> {
        self.last_status.as_ref().and_then(|s| s.work_position)
    }

    /// Take every event emitted since the last call.
    pub fn drain_events(&mut self) -> Vec<ControllerEvent> {
        std::mem::take(&mut self.events)
    }

    fn read_phase(&mut self) {
        let timeout = self.config.read_timeout;
        let Some(transport) = self.transport.as_mut() else {
            return;
        };

        match transport.read_lines(timeout) {
            Ok(lines) => {
                for line in lines {
                    self.handle_line(&line);
                    if self.transport.is_none() {
                        break;
                    }
                }
            }
            Err(ConnectionError::Timeout { .. }) => {}
            Err(e) => self.link_failure(e),
        }
    }

    fn handle_line(&mut self, line: &str) {
        let Some(response) = self.parser.parse(line) else {
            return;
        };
        tracing::debug!("<< {}", line);

        match response {
            GrblResponse::Ok => self.handle_ack(None),
            GrblResponse::Error(code) => self.handle_ack(Some(code)),
            GrblResponse::Alarm(code) => self.handle_alarm(code),
            GrblResponse::Status(report) => self.handle_status(report),
            GrblResponse::Startup(banner) => self.handle_startup(banner),
            GrblResponse::Setting { number, value } => {
                self.settings.insert(number, value.clone());
                self.events.push(ControllerEvent::Setting { number, value });
            }
            GrblResponse::Message(_) => {
                self.events.push(ControllerEvent::Message(line.trim().to_string()))
            }
        }
    }

    fn handle_ack(&mut self, error: Option<u8>) {
        if self.stale_acks > 0 {
            self.stale_acks -= 1;
            tracing::debug!(
                "Dropped acknowledgment for a discarded command ({} more expected)",
                self.stale_acks
            );
            return;
        }

        let Some(command) = self.buffer.acknowledge() else {
            tracing::warn!("Acknowledgment received with no pending command");
            return;
        };
        self.last_ack = Instant::now();
        self.stall_reported = false;

        let is_unlock = self.unlock == Some(UnlockPhase::AwaitingAck)
            && command.instruction_index.is_none()
            && command.text == UNLOCK_COMMAND;
        let is_control = command.instruction_index.is_none() && is_control_command(&command.text);

        let Some(code) = error else {
            if is_unlock {
                self.unlock = None;
                self.estop_latched = false;
                tracing::info!("Alarm lock cleared");
                self.events.push(ControllerEvent::Unlocked);
            } else if is_control {
                tracing::info!("'{}' completed", command.text);
                self.events.push(ControllerEvent::CommandCompleted {
                    command: command.text,
                });
            }
            return;
        };

        let message = decode_error(code).to_string();
        tracing::warn!("'{}' rejected with error {}: {}", command.text, code, message);

        if is_unlock || is_control {
            if is_unlock {
                self.unlock = None;
            }
            self.record_fault(
                ControllerError::StreamingFault {
                    instruction_index: None,
                    code,
                    message,
                }
                .into(),
                None,
            );
        } else if self.stream.is_some() {
            self.abort_stream();
            self.set_state(MachineState::Alarm);
            self.record_fault(
                ControllerError::StreamingFault {
                    instruction_index: command.instruction_index,
                    code,
                    message,
                }
                .into(),
                command.instruction_index,
            );
        }
    }

    fn handle_alarm(&mut self, code: u8) {
        let message = decode_alarm(code).to_string();
        tracing::error!("Alarm {}: {}", code, message);
        self.events.push(ControllerEvent::Alarm {
            code,
            message: message.clone(),
        });

        let index = self.in_flight_index();
        self.abort_stream();
        self.set_state(MachineState::Alarm);
        self.record_fault(ControllerError::AlarmCondition { code, message }.into(), index);
    }

    fn handle_status(&mut self, report: StatusReport) {
        if let Some(state) = report.state {
            if state == MachineState::Alarm && self.stream.is_some() {
                let index = self.in_flight_index();
                self.abort_stream();
                self.set_state(state);
                self.record_fault(
                    ControllerError::AlarmCondition {
                        code: 0,
                        message: "Controller entered alarm state during stream".to_string(),
                    }
                    .into(),
                    index,
                );
            } else if self.hold
                && matches!(
                    state,
                    MachineState::Idle | MachineState::Run | MachineState::Jog
                )
            {
                // Report left the firmware before the feed hold landed.
                tracing::debug!("Ignoring {} report during feed hold", state);
            } else {
                self.set_state(state);
            }
        }
        self.last_status = Some(report.clone());
        self.events.push(ControllerEvent::Status(report));
    }

    fn handle_startup(&mut self, banner: String) {
        tracing::info!("Controller reset: {}", banner);
        let index = self.in_flight_index();
        self.buffer.clear();
        self.stale_acks = 0;
        self.stall_reported = false;

        if self.stream.is_some() {
            self.abort_stream();
            self.set_state(MachineState::Alarm);
            self.record_fault(
                ConnectionError::LinkError {
                    reason: "controller reset during stream".to_string(),
                }
                .into(),
                index,
            );
        }
        self.events.push(ControllerEvent::Message(banner));

        if self.unlock.is_some() {
            self.unlock = Some(UnlockPhase::AwaitingAck);
            self.send_line(PendingCommand::new(UNLOCK_COMMAND, None));
        }
    }

    fn check_stall(&mut self) {
        if self.transport.is_none() || self.stall_reported || self.is_held() {
            return;
        }
        let Some(front) = self.buffer.front() else {
            return;
        };
        if front.text == HOME_COMMAND {
            return;
        }

        let stalled = front.enqueued_at.max(self.last_ack).elapsed();
        if stalled < self.config.stall_timeout {
            return;
        }

        let index = front.instruction_index;
        let pending = self.buffer.len();
        self.stall_reported = true;
        self.abort_stream();
        self.set_state(MachineState::Alarm);
        self.record_fault(
            ConnectionError::LinkStall {
                pending,
                stalled_ms: stalled.as_millis() as u64,
            }
            .into(),
            index,
        );
    }

    /// Send stream lines while they fit in the budget.
    fn pump(&mut self) {
        if self.transport.is_none() || self.is_held() {
            return;
        }

        let mut progressed = false;
        loop {
            let line = match self.stream.as_ref() {
                Some(stream) if !stream.stopping => match stream.job.lines.get(stream.next_line) {
                    Some(line) => line.clone(),
                    None => break,
                },
                _ => break,
            };

            if !line.skip {
                if !self.buffer.has_room(line.bytes()) {
                    break;
                }
                if !self.send_line(PendingCommand::new(line.text, line.instruction_index)) {
                    break;
                }
            }

            if let Some(stream) = self.stream.as_mut() {
                stream.next_line += 1;
                if line.instruction_index.is_some() {
                    stream.instructions_sent += 1;
                    progressed = true;
                }
            }
        }

        if progressed {
            if let Some(stream) = self.stream.as_ref() {
                let (sent, total) = (stream.instructions_sent, stream.job.total_instructions);
                self.progress = (sent, total);
                self.events.push(ControllerEvent::Progress { sent, total });
            }
        }
    }

    fn check_completion(&mut self) {
        let Some(stream) = self.stream.as_ref() else {
            return;
        };
        let nothing_left = stream.stopping || stream.next_line >= stream.job.lines.len();
        if !nothing_left || !self.buffer.is_empty() {
            return;
        }

        let Some(stream) = self.stream.take() else {
            return;
        };
        let job_id = stream.job.id;
        if stream.stopping {
            tracing::info!("Stream {} stopped", job_id);
            self.events.push(ControllerEvent::StreamStopped { job_id });
        } else {
            tracing::info!(
                "Stream {} completed ({} instructions)",
                job_id,
                stream.instructions_sent
            );
            self.events.push(ControllerEvent::StreamCompleted {
                job_id,
                instructions: stream.instructions_sent,
            });
        }
    }

    fn query_status(&mut self) {
        if self.transport.is_none() || self.last_status_query.elapsed() < self.config.poll_interval
        {
            return;
        }
        self.last_status_query = Instant::now();
        if self.send_realtime(STATUS_QUERY).is_err() {
            return;
        }
        tracing::trace!("Status query sent");
    }

    /// Queue a manual command through the buffer budget.
    fn send_control(&mut self, command: String) -> Result<()> {
        let bytes = command.len() + 1;
        if !self.buffer.has_room(bytes) {
            return Err(Error::other(format!(
                "'{}' does not fit in the receive buffer ({} of {} bytes in use)",
                command,
                self.buffer.outstanding_bytes(),
                self.config.max_buffer_bytes
            )));
        }
        let text = command.clone();
        if !self.send_line(PendingCommand::new(command, None)) {
            return Err(ConnectionError::LinkError {
                reason: format!("failed to send '{}'", text),
            }
            .into());
        }
        Ok(())
    }

    /// Track and write one line. Returns false when nothing was sent.
    fn send_line(&mut self, command: PendingCommand) -> bool {
        if self.transport.is_none() {
            return false;
        }
        let wire = format!("{}\n", command.text);
        if self.buffer.push(command).is_err() {
            return false;
        }
        tracing::debug!(">> {}", wire.trim_end());

        let Some(transport) = self.transport.as_mut() else {
            return false;
        };
        match transport.send_raw(wire.as_bytes()) {
            Ok(()) => true,
            Err(e) => {
                self.link_failure(e);
                false
            }
        }
    }

    /// Write a real-time byte outside the buffer budget.
    fn send_realtime(&mut self, byte: u8) -> std::result::Result<(), ConnectionError> {
        let Some(transport) = self.transport.as_mut() else {
            return Err(ConnectionError::NotConnected);
        };
        if let Err(e) = transport.send_raw(&[byte]) {
            self.link_failure(e.clone());
            return Err(e);
        }
        Ok(())
    }

    fn link_failure(&mut self, error: ConnectionError) {
        tracing::error!("Link failure: {}", error);
        let index = self.in_flight_index();
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.abort_stream();
        self.reset_link_state();
        self.set_state(MachineState::Disconnected);
        self.events.push(ControllerEvent::Disconnected);
        self.record_fault(error.into(), index);
    }

    fn abort_stream(&mut self) {
        self.hold = false;
        if let Some(stream) = self.stream.take() {
            tracing::warn!(
                "Stream {} aborted after {} of {} instructions",
                stream.job.id,
                stream.instructions_sent,
                stream.job.total_instructions
            );
            self.events.push(ControllerEvent::StreamAborted {
                job_id: stream.job.id,
            });
        }
    }

    fn reset_link_state(&mut self) {
        self.buffer.clear();
        self.stale_acks = 0;
        self.unlock = None;
        self.hold = false;
        self.stall_reported = false;
    }

    fn record_fault(&mut self, fault: Fault, instruction_index: Option<usize>) {
        let report = FaultReport {
            fault,
            instruction_index,
            state: self.state,
            link_open: self.is_link_open(),
            timestamp: Utc::now(),
        };
        tracing::error!("{}", report);
        self.events.push(ControllerEvent::Fault(report.clone()));
        self.last_fault = Some(report);
    }

    fn set_state(&mut self, state: MachineState) {
        if self.state != state {
            tracing::debug!("State {} -> {}", self.state, state);
            self.events.push(ControllerEvent::StateChanged {
                from: self.state,
                to: state,
            });
            self.state = state;
        }
    }

    fn is_held(&self) -> bool {
        self.hold || self.state == MachineState::Hold
    }

    fn in_flight_index(&self) -> Option<usize> {
        self.buffer.front().and_then(|c| c.instruction_index)
    }

    fn require_link(&self) -> Result<()> {
        if self.transport.is_some() {
            Ok(())
        } else {
            Err(ConnectionError::NotConnected.into())
        }
    }

    /// Manual commands need a link, no stream and no latched emergency stop.
    fn require_control(&self, allowed: &[MachineState], operation: &str) -> Result<()> {
        self.require_link()?;
        if self.estop_latched {
            return Err(self.invalid_state(&format!("{} before reset and unlock", operation)));
        }
        if self.stream.is_some() || !allowed.contains(&self.state) {
            return Err(self.invalid_state(operation));
        }
        Ok(())
    }

    fn invalid_state(&self, operation: &str) -> Error {
        ControllerError::InvalidState {
            current: self.state,
            operation: operation.to_string(),
        }
        .into()
    }
}

fn is_control_command(text: &str) -> bool {
    text == HOME_COMMAND || text == SETTINGS_COMMAND || text.starts_with(JOG_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::mock::MockTransport;
    use g2burn_designer::{generate, GeneratorSettings, LineSegment, Point, Shape};

    fn line_program() -> MotionProgram {
        let shapes = vec![Shape::Line(LineSegment::new(
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
        ))];
        generate(&shapes, &GeneratorSettings::default()).unwrap()
    }

    #[test]
    fn test_job_from_program_frames_body() {
        let program = line_program();
        let job = StreamJob::from_program(&program);
        let framing = program.preamble().len() + program.postamble().len();
        assert_eq!(job.lines.len(), program.len() + framing);
        assert_eq!(job.total_instructions, program.len());
        assert_eq!(job.lines[0].instruction_index, None);
        assert_eq!(
            job.lines[program.preamble().len()].instruction_index,
            Some(0)
        );
    }

    #[test]
    fn test_comments_are_skipped_but_counted() {
        let job = StreamJob::from_instructions(&[
            MotionInstruction::Comment {
                text: "start".to_string(),
            },
            MotionInstruction::RapidMove { x: 1.0, y: 2.0 },
        ]);
        assert!(job.lines[0].skip);
        assert_eq!(job.lines[1].text, "G0 X1 Y2");
        assert_eq!(job.lines[1].bytes(), 9);

        let (mock, handle) = MockTransport::new("mock");
        let mut controller = StreamingController::default();
        controller.attach(mock).unwrap();
        controller.start_job(job).unwrap();
        assert_eq!(handle.sent_lines(), vec!["G0 X1 Y2"]);
        assert_eq!(controller.progress(), (2, 2));
    }

    #[test]
    fn test_requires_connection() {
        let mut controller = StreamingController::default();
        assert_eq!(controller.state(), MachineState::Disconnected);
        assert!(matches!(
            controller.start_stream(&line_program()),
            Err(Error::Connection(ConnectionError::NotConnected))
        ));
        assert!(controller.pause().is_err());
        assert!(controller.emergency_stop().is_err());
        controller.disconnect();
        assert!(controller.drain_events().is_empty());
    }

    #[test]
    fn test_oversized_line_is_rejected_before_sending() {
        let (mock, handle) = MockTransport::new("mock");
        let mut controller = StreamingController::new(StreamingConfig {
            max_buffer_bytes: 5,
            ..Default::default()
        });
        controller.attach(mock).unwrap();
        handle.clear_writes();

        let job = StreamJob::from_instructions(&[MotionInstruction::RapidMove { x: 10.0, y: 2.0 }]);
        assert!(controller.start_job(job).is_err());
        assert!(handle.writes().is_empty());
        assert_eq!(controller.state(), MachineState::Idle);
    }

    #[test]
    fn test_fault_report_display() {
        let report = FaultReport {
            fault: ConnectionError::LinkStall {
                pending: 2,
                stalled_ms: 10000,
            }
            .into(),
            instruction_index: Some(4),
            state: MachineState::Alarm,
            link_open: true,
            timestamp: Utc::now(),
        };
        assert_eq!(
            report.to_string(),
            "Link stalled: 2 command(s) unacknowledged for 10000ms (state Alarm, instruction 4, link open)"
        );
    }
}
