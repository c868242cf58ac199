/// Route handlers for the Control API
use super::types::*;
use avhub_core::{Completion, DeviceHandle};
use avhub_device_christie::ChristieController;
use avhub_device_marantz::MarantzController;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use futures_util::{Sink, SinkExt, StreamExt};
use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub receiver: MarantzController,
    pub projector: ChristieController,
    /// Number of WebSocket clients currently connected
    pub clients: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(receiver: MarantzController, projector: ChristieController) -> Self {
        Self {
            receiver,
            projector,
            clients: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.load(Ordering::SeqCst)
    }
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/v1/receiver", get(get_receiver))
        .route("/v1/projector", get(get_projector))
        .route("/v1/health", get(health_check))
        .with_state(state)
}

/// GET /v1/receiver - Current receiver snapshot
async fn get_receiver(State(state): State<AppState>) -> Response {
    debug!("GET /v1/receiver");
    Json(state.receiver.state()).into_response()
}

/// GET /v1/projector - Current projector snapshot
async fn get_projector(State(state): State<AppState>) -> Response {
    debug!("GET /v1/projector");
    Json(state.projector.state()).into_response()
}

/// GET /v1/health - Health check
async fn health_check(State(state): State<AppState>) -> Response {
    Json(HealthResponse {
        status: "ok".to_string(),
        clients: state.client_count(),
    })
    .into_response()
}

/// GET /ws - Upgrade to the state relay
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| client_session(socket, state))
}

async fn client_session(socket: WebSocket, state: AppState) {
    let connected = state.clients.fetch_add(1, Ordering::SeqCst) + 1;
    info!("Client connected ({} total)", connected);
    if connected == 1 {
        info!("First client connected, checking projector status");
        log_completion("projector status", state.projector.update_power_status());
    }

    // Subscribe before taking snapshots so no change slips between them
    let mut receiver_events = state.receiver.subscribe();
    let mut projector_events = state.projector.subscribe();
    let snapshots = [
        ServerMessage::State(state.receiver.state()),
        ServerMessage::ProjectorState(state.projector.state()),
    ];

    let (mut sender, mut inbound) = socket.split();
    let receiver = state.receiver.clone();
    let projector = state.projector.clone();

    let mut send_task = tokio::spawn(async move {
        for message in snapshots {
            if send_message(&mut sender, &message).await.is_err() {
                return;
            }
        }

        loop {
            let message = tokio::select! {
                event = receiver_events.recv() => match event {
                    Ok(s) => ServerMessage::State(s),
                    Err(RecvError::Lagged(n)) => {
                        warn!("Client lagged behind by {} receiver events", n);
                        ServerMessage::State(receiver.state())
                    }
                    Err(RecvError::Closed) => break,
                },
                event = projector_events.recv() => match event {
                    Ok(s) => ServerMessage::ProjectorState(s),
                    Err(RecvError::Lagged(n)) => {
                        warn!("Client lagged behind by {} projector events", n);
                        ServerMessage::ProjectorState(projector.state())
                    }
                    Err(RecvError::Closed) => break,
                },
            };

            if send_message(&mut sender, &message).await.is_err() {
                break;
            }
        }
    });

    let commands = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = inbound.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(message) => handle_message(&commands, message),
                    Err(e) => warn!("Ignoring malformed client message {:?}: {}", text, e),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    let remaining = state.clients.fetch_sub(1, Ordering::SeqCst) - 1;
    info!("Client disconnected ({} remaining)", remaining);
}

async fn send_message<S>(sender: &mut S, message: &ServerMessage) -> Result<(), ()>
where
    S: Sink<Message> + Unpin,
{
    let text = match serde_json::to_string(message) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to encode {:?}: {}", message, e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text)).await.map_err(|_| ())
}

/// Translate a client message into device commands.
pub fn handle_message(state: &AppState, message: ClientMessage) {
    debug!("Client message: {:?}", message);
    match message {
        ClientMessage::Source { input } => match state.receiver.set_input(input) {
            Ok(completion) => log_completion("input change", completion),
            Err(e) => warn!("Rejected input change: {}", e),
        },
        ClientMessage::Mute => {
            let mute = !state.receiver.state().mute;
            log_completion("mute change", state.receiver.set_mute(mute));
        }
        ClientMessage::VolumeDefault => match state.receiver.set_volume(DEFAULT_UI_VOLUME) {
            Ok(completion) => log_completion("volume change", completion),
            Err(e) => warn!("Could not set default volume: {}", e),
        },
        ClientMessage::VolumeUp => log_completion("volume up", state.receiver.volume_up()),
        ClientMessage::VolumeDown => log_completion("volume down", state.receiver.volume_down()),
        ClientMessage::ProjectorOn => {
            log_completion("projector power on", state.projector.turn_power_on());
        }
        ClientMessage::ProjectorOff => {
            log_completion("projector power off", state.projector.turn_power_off());
        }
    }
}

/// Log the outcome of a command once the device answers it.
fn log_completion<T>(what: &'static str, completion: Completion<T>)
where
    T: Debug + Send + 'static,
{
    tokio::spawn(async move {
        match completion.await {
            Ok(result) => debug!("{} completed: {:?}", what, result),
            Err(e) => debug!("{} did not complete: {}", what, e),
        }
    });
}
