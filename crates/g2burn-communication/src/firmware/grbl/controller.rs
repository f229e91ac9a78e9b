//! GRBL Controller Implementation
//!
//! Runs a [`StreamingController`] on a dedicated tokio task that owns the
//! transport. Callers talk to it through an mpsc request channel, observe it
//! through an immutable [`ControllerSnapshot`] and subscribe to
//! [`ControllerEvent`]s over a broadcast channel.

use super::streamer::{ControllerEvent, FaultReport, StreamJob, StreamingConfig, StreamingController};
use super::wake_up;
use crate::communication::serial::SerialTransport;
use crate::communication::{ConnectionParams, Transport};
use g2burn_core::{ConnectionError, Error, MachineState, Position, Result};
use g2burn_designer::MotionProgram;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};
use uuid::Uuid;

/// Loop tick; each tick runs one poll of the streamer.
const LOOP_DELAY: Duration = Duration::from_millis(10);
const REQUEST_QUEUE: usize = 32;
const EVENT_QUEUE: usize = 1024;

/// Point-in-time view of the controller published after every loop
/// iteration
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ControllerSnapshot {
    pub state: MachineState,
    /// Body instructions sent and total for the current or last job
    pub progress: (usize, usize),
    pub outstanding_bytes: usize,
    pub pending_commands: usize,
    pub machine_position: Option<Position>,
    pub work_position: Option<Position>,
    pub link_open: bool,
    pub estop_latched: bool,
    pub streaming: bool,
    pub job_id: Option<Uuid>,
    pub last_fault: Option<FaultReport>,
}

impl ControllerSnapshot {
    fn capture(controller: &StreamingController) -> Self {
        Self {
            state: controller.state(),
            progress: controller.progress(),
            outstanding_bytes: controller.outstanding_bytes(),
            pending_commands: controller.pending_len(),
            machine_position: controller.machine_position(),
            work_position: controller.work_position(),
            link_open: controller.is_link_open(),
            estop_latched: controller.estop_latched(),
            streaming: controller.is_streaming(),
            job_id: controller.job_id(),
            last_fault: controller.last_fault().cloned(),
        }
    }
}

type Reply<T> = oneshot::Sender<Result<T>>;

enum Request {
    Attach(Box<dyn Transport>, Reply<()>),
    Disconnect(Reply<()>),
    Start(StreamJob, Reply<Uuid>),
    Pause(Reply<()>),
    Resume(Reply<()>),
    Stop(Reply<()>),
    EmergencyStop(Reply<()>),
    ResetAndUnlock(Reply<()>),
    Home(Reply<()>),
    Jog {
        dx: f64,
        dy: f64,
        feed_rate: f64,
        reply: Reply<()>,
    },
    QuerySettings(Reply<()>),
}

/// Shared outputs of the IO task
#[derive(Clone)]
struct Publisher {
    snapshot: Arc<RwLock<ControllerSnapshot>>,
    events: broadcast::Sender<ControllerEvent>,
}

impl Publisher {
    fn publish(&self, controller: &mut StreamingController) {
        *self.snapshot.write() = ControllerSnapshot::capture(controller);
        for event in controller.drain_events() {
            // No subscribers is not an error.
            let _ = self.events.send(event);
        }
    }

    /// Publish before replying so a caller sees the effect of its request
    /// as soon as the reply arrives.
    fn reply<T>(&self, controller: &mut StreamingController, reply: Reply<T>, result: Result<T>) {
        self.publish(controller);
        let _ = reply.send(result);
    }
}

/// Async GRBL controller handle
///
/// Must be created inside a tokio runtime. Dropping the handle stops the IO
/// task and closes the link.
pub struct GrblController {
    snapshot: Arc<RwLock<ControllerSnapshot>>,
    events: broadcast::Sender<ControllerEvent>,
    requests: mpsc::Sender<Request>,
    io_task: JoinHandle<()>,
}

impl GrblController {
    pub fn new(config: StreamingConfig) -> Self {
        let snapshot = Arc::new(RwLock::new(ControllerSnapshot::default()));
        let (events, _) = broadcast::channel(EVENT_QUEUE);
        let (requests, request_rx) = mpsc::channel(REQUEST_QUEUE);

        let publisher = Publisher {
            snapshot: snapshot.clone(),
            events: events.clone(),
        };
        let io_task = tokio::spawn(run_io_loop(
            StreamingController::new(config),
            request_rx,
            publisher,
        ));

        Self {
            snapshot,
            events,
            requests,
            io_task,
        }
    }

    /// Open a serial port and run the wake-up handshake on a blocking
    /// thread, then attach it.
    pub async fn connect(&self, params: ConnectionParams) -> Result<()> {
        let transport = tokio::task::spawn_blocking(
            move || -> std::result::Result<SerialTransport, ConnectionError> {
                let mut transport = SerialTransport::open(&params)?;
                if let Err(e) = wake_up(&mut transport, params.settle_delay()) {
                    transport.close();
                    return Err(e);
                }
                Ok(transport)
            },
        )
        .await
        .map_err(|e| Error::other(format!("Port open task failed: {}", e)))??;
        self.connect_with(transport).await
    }

    /// Attach an open transport that has already been woken up.
    pub async fn connect_with<T: Transport + 'static>(&self, transport: T) -> Result<()> {
        let transport: Box<dyn Transport> = Box::new(transport);
        self.request(|reply| Request::Attach(transport, reply)).await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.request(Request::Disconnect).await
    }

    pub async fn start_stream(&self, program: &MotionProgram) -> Result<Uuid> {
        self.start_job(StreamJob::from_program(program)).await
    }

    pub async fn start_job(&self, job: StreamJob) -> Result<Uuid> {
        self.request(|reply| Request::Start(job, reply)).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.request(Request::Pause).await
    }

    pub async fn resume(&self) -> Result<()> {
        self.request(Request::Resume).await
    }

    pub async fn stop_stream(&self) -> Result<()> {
        self.request(Request::Stop).await
    }

    pub async fn emergency_stop(&self) -> Result<()> {
        self.request(Request::EmergencyStop).await
    }

    pub async fn reset_and_unlock(&self) -> Result<()> {
        self.request(Request::ResetAndUnlock).await
    }

    /// Start the homing cycle. Completion is reported as
    /// [`ControllerEvent::CommandCompleted`].
    pub async fn home(&self) -> Result<()> {
        self.request(Request::Home).await
    }

    pub async fn jog(&self, dx: f64, dy: f64, feed_rate: f64) -> Result<()> {
        self.request(|reply| Request::Jog {
            dx,
            dy,
            feed_rate,
            reply,
        })
        .await
    }

    /// Request a settings dump, delivered as [`ControllerEvent::Setting`]
    /// events.
    pub async fn query_settings(&self) -> Result<()> {
        self.request(Request::QuerySettings).await
    }

    pub fn current_state(&self) -> MachineState {
        self.snapshot.read().state
    }

    pub fn progress(&self) -> (usize, usize) {
        self.snapshot.read().progress
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        self.snapshot.read().clone()
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Request) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(make(tx))
            .await
            .map_err(|_| Error::other("Controller task has stopped"))?;
        rx.await
            .map_err(|_| Error::other("Controller task dropped the request"))?
    }
}

impl Drop for GrblController {
    fn drop(&mut self) {
        self.io_task.abort();
    }
}

async fn run_io_loop(
    mut controller: StreamingController,
    mut requests: mpsc::Receiver<Request>,
    publisher: Publisher,
) {
    let mut ticker = tokio::time::interval(LOOP_DELAY);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            request = requests.recv() => match request {
                Some(request) => handle_request(&mut controller, request, &publisher),
                None => break,
            },
            _ = ticker.tick() => {
                controller.poll();
                publisher.publish(&mut controller);
            }
        }
    }

    controller.disconnect();
    publisher.publish(&mut controller);
    tracing::debug!("Controller IO loop exited");
}

fn handle_request(controller: &mut StreamingController, request: Request, publisher: &Publisher) {
    match request {
        Request::Attach(transport, reply) => {
            let result = controller.attach_boxed(transport);
            publisher.reply(controller, reply, result);
        }
        Request::Disconnect(reply) => {
            controller.disconnect();
            publisher.reply(controller, reply, Ok(()));
        }
        Request::Start(job, reply) => {
            let result = controller.start_job(job);
            publisher.reply(controller, reply, result);
        }
        Request::Pause(reply) => {
            let result = controller.pause();
            publisher.reply(controller, reply, result);
        }
        Request::Resume(reply) => {
            let result = controller.resume();
            publisher.reply(controller, reply, result);
        }
        Request::Stop(reply) => {
            let result = controller.stop_stream();
            publisher.reply(controller, reply, result);
        }
        Request::EmergencyStop(reply) => {
            let result = controller.emergency_stop();
            publisher.reply(controller, reply, result);
        }
        Request::ResetAndUnlock(reply) => {
            let result = controller.reset_and_unlock();
            publisher.reply(controller, reply, result);
        }
        Request::Home(reply) => {
            let result = controller.home();
            publisher.reply(controller, reply, result);
        }
        Request::Jog {
            dx,
            dy,
            feed_rate,
            reply,
        } => {
            let result = controller.jog(dx, dy, feed_rate);
            publisher.reply(controller, reply, result);
        }
        Request::QuerySettings(reply) => {
            let result = controller.query_settings();
            publisher.reply(controller, reply, result);
        }
    }
}
