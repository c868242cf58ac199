use crate::config::ProjectorConfig;
use crate::connection::TcpConnector;
use crate::models::*;
use crate::protocol::ChristieProtocol;
use crate::simulator;
use anyhow::Result;
use avhub_core::{
    Completion, Connector, DeviceHandle, Engine, Next, Notifier, RequestId, SingleFlight,
    StatePublisher,
};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Sleep};

struct Submission {
    command: ProjectorCommand,
    notify: Option<Notifier<ProjectorReply>>,
}

/// Handle to the projector's command channel.
///
/// Exactly one packet is outstanding at a time. The TCP connection is
/// opened when the first command needs it and dropped on any error or
/// remote close; the next submission reconnects.
#[derive(Clone)]
pub struct ChristieController {
    submissions: mpsc::UnboundedSender<Submission>,
    publisher: StatePublisher<ProjectorState>,
}

impl ChristieController {
    /// Start the channel for the configured projector (or the simulator).
    pub async fn open(config: &ProjectorConfig) -> Result<Self> {
        if config.simulate {
            let addr = simulator::spawn().await?;
            tracing::info!("Projector running against the simulator at {}", addr);
            let connector = TcpConnector::new(addr.ip().to_string(), addr.port());
            return Ok(Self::spawn(connector, config));
        }

        let connector = TcpConnector::new(config.address.clone(), config.port);
        Ok(Self::spawn(connector, config))
    }

    /// Start the channel with a custom connector. Nothing connects until the
    /// first command is submitted.
    pub fn spawn<C: Connector>(connector: C, config: &ProjectorConfig) -> Self {
        let (submissions, submission_rx) = mpsc::unbounded_channel();
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let publisher = StatePublisher::new(ProjectorState::default());

        let task = ProjectorTask {
            engine: Engine::new(SingleFlight, ChristieProtocol::new()),
            connector: Arc::new(connector),
            link: Link::Idle,
            generation: 0,
            link_tx,
            link_rx,
            submissions: submission_rx,
            publisher: publisher.clone(),
            response_timeout: config.response_timeout(),
            deadline: Box::pin(tokio::time::sleep(Duration::ZERO)),
            deadline_for: None,
        };
        tokio::spawn(task.run());

        Self {
            submissions,
            publisher,
        }
    }

    /// Queue a command. Never blocks and never fails.
    pub fn submit(&self, command: ProjectorCommand, notify: Option<Notifier<ProjectorReply>>) {
        if self.submissions.send(Submission { command, notify }).is_err() {
            tracing::warn!("Projector channel has shut down; dropping {:?}", command);
        }
    }

    /// Query the power state.
    pub fn update_power_status(&self) -> Completion<PowerState> {
        let (notify, completion) = Completion::pair_with(|reply: ProjectorReply| match reply {
            ProjectorReply::Power(power) => Some(power),
            ProjectorReply::Accepted(_) => None,
        });
        self.submit(ProjectorCommand::QueryPower, Some(notify));
        completion
    }

    /// Turn the projector on, then refresh the power state.
    ///
    /// Resolves with whether the projector acknowledged the command.
    pub fn turn_power_on(&self) -> Completion<bool> {
        self.set_power(ProjectorCommand::PowerOn)
    }

    /// Turn the projector off, then refresh the power state.
    pub fn turn_power_off(&self) -> Completion<bool> {
        self.set_power(ProjectorCommand::PowerOff)
    }

    fn set_power(&self, command: ProjectorCommand) -> Completion<bool> {
        let (notify, completion) = Completion::pair_with(|reply: ProjectorReply| match reply {
            ProjectorReply::Accepted(ok) => Some(ok),
            ProjectorReply::Power(_) => None,
        });
        self.submit(command, Some(notify));
        self.submit(ProjectorCommand::QueryPower, None);
        completion
    }
}

impl DeviceHandle for ChristieController {
    type State = ProjectorState;

    fn name(&self) -> &str {
        "projector"
    }

    fn state(&self) -> ProjectorState {
        self.publisher.snapshot()
    }

    fn subscribe(&self) -> broadcast::Receiver<ProjectorState> {
        self.publisher.subscribe()
    }
}

enum LinkEvent<S> {
    Connected { generation: u64, stream: S },
    ConnectFailed { generation: u64, error: std::io::Error },
    Frame { generation: u64, bytes: Vec<u8> },
    Closed { generation: u64, error: Option<std::io::Error> },
}

enum Link<S> {
    /// No connection; the next dispatch attempt opens one.
    Idle,
    Connecting,
    Up {
        writer: WriteHalf<S>,
        reader: JoinHandle<()>,
    },
    /// Torn down; stays down until the next submission.
    Lost,
}

enum Event<S> {
    Submitted(Submission),
    Link(LinkEvent<S>),
    Deadline,
    Shutdown,
}

struct ProjectorTask<C: Connector> {
    engine: Engine<SingleFlight, ChristieProtocol>,
    connector: Arc<C>,
    link: Link<C::Stream>,
    generation: u64,
    link_tx: mpsc::UnboundedSender<LinkEvent<C::Stream>>,
    link_rx: mpsc::UnboundedReceiver<LinkEvent<C::Stream>>,
    submissions: mpsc::UnboundedReceiver<Submission>,
    publisher: StatePublisher<ProjectorState>,
    response_timeout: Option<Duration>,
    deadline: Pin<Box<Sleep>>,
    deadline_for: Option<RequestId>,
}

impl<C: Connector> ProjectorTask<C> {
    async fn run(mut self) {
        loop {
            let deadline_armed = self.deadline_for.is_some();
            let event = tokio::select! {
                submission = self.submissions.recv() => match submission {
                    Some(submission) => Event::Submitted(submission),
                    None => Event::Shutdown,
                },
                Some(link) = self.link_rx.recv() => Event::Link(link),
                () = &mut self.deadline, if deadline_armed => Event::Deadline,
            };

            match event {
                Event::Submitted(Submission { command, notify }) => {
                    if matches!(self.link, Link::Lost) {
                        self.link = Link::Idle;
                    }
                    self.engine.submit(command, notify);
                }
                Event::Link(link) => self.on_link(link),
                Event::Deadline => self.on_deadline(),
                Event::Shutdown => break,
            }

            self.pump().await;
        }

        self.teardown();
        tracing::debug!("Projector channel stopped");
    }

    fn on_link(&mut self, event: LinkEvent<C::Stream>) {
        match event {
            LinkEvent::Connected { generation, stream } => {
                if generation != self.generation || !matches!(self.link, Link::Connecting) {
                    tracing::debug!("Discarding stale projector connection");
                    return;
                }
                tracing::info!("Projector connected at {}", self.connector.endpoint());
                let (reader, writer) = tokio::io::split(stream);
                let reader = tokio::spawn(read_frames(reader, generation, self.link_tx.clone()));
                self.link = Link::Up { writer, reader };
            }
            LinkEvent::ConnectFailed { generation, error } => {
                if generation == self.generation {
                    tracing::warn!(
                        "Failed to connect to projector at {}: {}",
                        self.connector.endpoint(),
                        error
                    );
                    self.link = Link::Lost;
                }
            }
            LinkEvent::Frame { generation, bytes } => {
                if generation != self.generation {
                    tracing::debug!("Dropping frame from a closed projector connection: {:02x?}", bytes);
                    return;
                }
                self.on_frame(&bytes);
            }
            LinkEvent::Closed { generation, error } => {
                if generation != self.generation {
                    return;
                }
                match error {
                    Some(e) => tracing::warn!("Projector socket error: {}", e),
                    None => tracing::info!("Projector connection closed"),
                }
                self.teardown();
            }
        }
    }

    fn on_frame(&mut self, bytes: &[u8]) {
        tracing::debug!("Projector response: {:02x?}", bytes);
        let outcome = self.engine.on_inbound(bytes);
        if outcome.settled.is_some() {
            self.deadline_for = None;
        }
        if outcome.changed {
            self.publisher.publish(self.engine.protocol().state());
        }
    }

    fn on_deadline(&mut self) {
        let Some(id) = self.deadline_for.take() else {
            return;
        };
        if self.engine.in_flight() == Some(id) {
            tracing::warn!("No response to projector request #{}; giving up on it", id);
            self.engine.abandon_in_flight();
            // A late reply on this connection would settle the next request
            self.teardown();
            self.link = Link::Idle;
        }
    }

    /// Dispatch the queue head if nothing is in flight, connecting first if needed.
    async fn pump(&mut self) {
        let now = Instant::now();
        if self.engine.poll(now) != Next::Ready {
            return;
        }

        let Link::Up { writer, .. } = &mut self.link else {
            if matches!(self.link, Link::Idle) {
                self.connect();
            }
            return;
        };

        let Some(dispatch) = self.engine.dispatch(now) else {
            return;
        };
        let result = write_packet(writer, &dispatch.bytes).await;

        if let Some(timeout) = self.response_timeout {
            self.deadline.as_mut().reset(now + timeout);
            self.deadline_for = Some(dispatch.id);
        }

        if let Err(e) = result {
            tracing::warn!("Failed to write projector request #{}: {}", dispatch.id, e);
            self.teardown();
        }
    }

    fn connect(&mut self) {
        self.generation += 1;
        self.link = Link::Connecting;

        let generation = self.generation;
        let connector = self.connector.clone();
        let events = self.link_tx.clone();
        tracing::info!("Connecting to projector at {}", connector.endpoint());

        tokio::spawn(async move {
            let event = match connector.connect().await {
                Ok(stream) => LinkEvent::Connected { generation, stream },
                Err(error) => LinkEvent::ConnectFailed { generation, error },
            };
            let _ = events.send(event);
        });
    }

    /// Drop the connection. Events still queued from it become stale.
    fn teardown(&mut self) {
        self.generation += 1;
        if let Link::Up { reader, .. } = std::mem::replace(&mut self.link, Link::Lost) {
            reader.abort();
        }
    }
}

async fn write_packet<W: AsyncWrite + Unpin>(writer: &mut W, bytes: &[u8]) -> std::io::Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await
}

/// Forward each read as one response frame until the socket closes.
async fn read_frames<R, S>(mut reader: R, generation: u64, events: mpsc::UnboundedSender<LinkEvent<S>>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 256];
    let error = loop {
        match reader.read(&mut buf).await {
            Ok(0) => break None,
            Ok(n) => {
                let frame = LinkEvent::Frame {
                    generation,
                    bytes: buf[..n].to_vec(),
                };
                if events.send(frame).is_err() {
                    return;
                }
            }
            Err(e) => break Some(e),
        }
    };
    let _ = events.send(LinkEvent::Closed { generation, error });
}
