use crate::config::ReceiverConfig;
use crate::models::*;
use crate::protocol::MarantzProtocol;
use crate::{serial, simulator};
use anyhow::Result;
use avhub_core::{
    Completion, DeviceError, DeviceHandle, DeviceResult, Engine, Next, Notifier, RateLimit,
    StatePublisher,
};
use std::pin::Pin;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Sleep};

/// Queries issued as soon as the link is up, to seed the state mirror.
const STARTUP_QUERIES: [Property; 3] = [Property::Volume, Property::Mute, Property::Source];

struct Submission {
    command: ReceiverCommand,
    notify: Option<Notifier<ReceiverState>>,
}

/// Handle to the receiver's command channel.
///
/// Commands are written over a persistent serial link, spaced by at least
/// the configured minimum delay. Notifications resolve on the next report
/// for the property a command touches, whether or not that report was
/// caused by the command.
#[derive(Clone)]
pub struct MarantzController {
    submissions: mpsc::UnboundedSender<Submission>,
    publisher: StatePublisher<ReceiverState>,
}

impl MarantzController {
    /// Open the configured link (serial port or simulator) and start the channel.
    pub fn open(config: &ReceiverConfig) -> Result<Self> {
        if config.simulate {
            tracing::info!("Receiver running against the simulator");
            return Ok(Self::spawn(simulator::spawn(), config));
        }

        let port = serial::open_port(config)?;
        Ok(Self::spawn(port, config))
    }

    /// Start the channel over an already open byte stream.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<T>(io: T, config: &ReceiverConfig) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(io);
        let (submissions, submission_rx) = mpsc::unbounded_channel();
        let (line_tx, line_rx) = mpsc::unbounded_channel();
        let publisher = StatePublisher::new(ReceiverState::default());

        let reader = tokio::spawn(read_lines(reader, line_tx));

        let mut engine = Engine::new(RateLimit::new(config.min_command_delay()), MarantzProtocol::new());
        for property in STARTUP_QUERIES {
            engine.submit(ReceiverCommand::Query(property), None);
        }

        let task = ReceiverTask {
            engine,
            writer,
            publisher: publisher.clone(),
            submissions: submission_rx,
            lines: line_rx,
            lines_open: true,
            reader,
            timer: Box::pin(tokio::time::sleep(std::time::Duration::ZERO)),
        };
        tokio::spawn(task.run());

        Self {
            submissions,
            publisher,
        }
    }

    /// Queue a command. Never blocks and never fails.
    ///
    /// Volume up/down at the corresponding limit issue nothing and resolve
    /// `notify` immediately with the current state.
    pub fn submit(&self, command: ReceiverCommand, notify: Option<Notifier<ReceiverState>>) {
        if self.submissions.send(Submission { command, notify }).is_err() {
            tracing::warn!("Receiver channel has shut down; dropping command");
        }
    }

    fn request(&self, command: ReceiverCommand) -> Completion<ReceiverState> {
        let (notify, completion) = Completion::pair();
        self.submit(command, Some(notify));
        completion
    }

    /// Ask the receiver to report `property`.
    pub fn query(&self, property: Property) -> Completion<ReceiverState> {
        self.request(ReceiverCommand::Query(property))
    }

    /// Select an input by its device token (e.g. "DVD").
    ///
    /// Tokens that are empty or not printable ASCII are rejected before
    /// anything is queued.
    pub fn set_input(&self, input: impl Into<String>) -> DeviceResult<Completion<ReceiverState>> {
        let input = input.into();
        if !is_valid_input(&input) {
            return Err(DeviceError::InvalidInput(input));
        }
        Ok(self.request(ReceiverCommand::SetInput(input)))
    }

    pub fn set_mute(&self, mute: bool) -> Completion<ReceiverState> {
        self.request(ReceiverCommand::SetMute(mute))
    }

    /// Set the volume from a level in [0.0, 1.0].
    ///
    /// Out-of-range levels are clamped; NaN and infinities are rejected
    /// before anything is queued.
    pub fn set_volume(&self, level: f64) -> DeviceResult<Completion<ReceiverState>> {
        let native = native_volume(level).ok_or(DeviceError::InvalidVolume(level))?;
        Ok(self.request(ReceiverCommand::SetVolume(native)))
    }

    pub fn volume_up(&self) -> Completion<ReceiverState> {
        self.request(ReceiverCommand::VolumeUp)
    }

    pub fn volume_down(&self) -> Completion<ReceiverState> {
        self.request(ReceiverCommand::VolumeDown)
    }

    /// Level the "default volume" preset corresponds to.
    pub fn default_volume() -> f64 {
        normalize_volume(DEFAULT_VOLUME_RAW)
    }
}

impl DeviceHandle for MarantzController {
    type State = ReceiverState;

    fn name(&self) -> &str {
        "receiver"
    }

    fn state(&self) -> ReceiverState {
        self.publisher.snapshot()
    }

    fn subscribe(&self) -> broadcast::Receiver<ReceiverState> {
        self.publisher.subscribe()
    }
}

enum Event {
    Submitted(Submission),
    Line(String),
    LinkClosed,
    TimerFired,
    Shutdown,
}

/// Owns everything the channel mutates. Runs until every handle is dropped.
struct ReceiverTask<W> {
    engine: Engine<RateLimit, MarantzProtocol>,
    writer: W,
    publisher: StatePublisher<ReceiverState>,
    submissions: mpsc::UnboundedReceiver<Submission>,
    lines: mpsc::UnboundedReceiver<String>,
    lines_open: bool,
    reader: JoinHandle<()>,
    timer: Pin<Box<Sleep>>,
}

impl<W: AsyncWrite + Unpin> ReceiverTask<W> {
    async fn run(mut self) {
        self.pump().await;

        loop {
            let timer_armed = self.engine.timer_armed();
            let event = tokio::select! {
                submission = self.submissions.recv() => match submission {
                    Some(submission) => Event::Submitted(submission),
                    None => Event::Shutdown,
                },
                line = self.lines.recv(), if self.lines_open => match line {
                    Some(line) => Event::Line(line),
                    None => Event::LinkClosed,
                },
                () = &mut self.timer, if timer_armed => Event::TimerFired,
            };

            match event {
                Event::Submitted(submission) => self.on_submit(submission),
                Event::Line(line) => self.on_line(&line),
                Event::LinkClosed => {
                    tracing::warn!("Receiver link closed; commands will no longer complete");
                    self.lines_open = false;
                }
                Event::TimerFired => self.engine.timer_fired(),
                Event::Shutdown => break,
            }

            self.pump().await;
        }

        self.reader.abort();
        tracing::debug!("Receiver channel stopped");
    }

    fn on_submit(&mut self, Submission { command, notify }: Submission) {
        if let ReceiverCommand::SetInput(input) = &command {
            if !is_valid_input(input) {
                tracing::warn!("Dropping input change to invalid name {:?}", input);
                return;
            }
        }

        let volume = self.engine.protocol().volume();
        let at_limit = match command {
            ReceiverCommand::VolumeUp => volume >= MAX_VOLUME,
            ReceiverCommand::VolumeDown => volume <= MIN_VOLUME,
            _ => false,
        };

        if at_limit {
            tracing::debug!("Volume already at limit ({}); not sending {:?}", volume, command);
            if let Some(notify) = notify {
                notify(self.engine.protocol().state());
            }
            return;
        }

        self.engine.submit(command, notify);
    }

    fn on_line(&mut self, line: &str) {
        let outcome = self.engine.on_inbound(line);
        if outcome.changed {
            self.publisher.publish(self.engine.protocol().state());
        }
    }

    /// Dispatch whatever the rate limit allows, arming the timer for the rest.
    async fn pump(&mut self) {
        loop {
            let now = Instant::now();
            match self.engine.poll(now) {
                Next::Idle => break,
                Next::ArmTimer(delay) => {
                    tracing::trace!("Waiting {:?} before next receiver command", delay);
                    self.timer.as_mut().reset(now + delay);
                    break;
                }
                Next::Ready => {
                    let Some(dispatch) = self.engine.dispatch(now) else {
                        break;
                    };
                    if let Err(e) = self.write(&dispatch.bytes).await {
                        tracing::warn!("Receiver write failed for request #{}: {}", dispatch.id, e);
                    }
                }
            }
        }
    }

    async fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await
    }
}

async fn read_lines<R: AsyncRead + Unpin>(reader: R, lines: mpsc::UnboundedSender<String>) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\r', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf).trim().to_string();
                if line.is_empty() {
                    continue;
                }
                if lines.send(line).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!("Receiver read error: {}", e);
                break;
            }
        }
    }
}
