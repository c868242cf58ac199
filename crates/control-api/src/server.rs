/// Control API Server implementation
use super::routes::{create_router, AppState};
use anyhow::Result;
use avhub_core::DeviceHandle;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// HTTP and WebSocket Control API Server
pub struct ControlServer {
    addr: SocketAddr,
    state: AppState,
    server_handle: Option<JoinHandle<()>>,
}

impl ControlServer {
    /// Create a new control server
    ///
    /// # Arguments
    /// * `addr` - Address to bind to (e.g., "0.0.0.0:3000")
    /// * `state` - Device handles shared with every client session
    pub fn new(addr: SocketAddr, state: AppState) -> Self {
        Self {
            addr,
            state,
            server_handle: None,
        }
    }

    /// Start the control server, returning the address actually bound
    pub async fn start(&mut self) -> Result<SocketAddr> {
        info!("Starting Control API server on {}", self.addr);

        let app = create_router(self.state.clone());

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        self.addr = listener.local_addr()?;
        info!("Control API listening on {}", self.addr);

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("Control API server error: {}", e);
            }
        });

        self.server_handle = Some(handle);

        Ok(self.addr)
    }

    /// Stop the control server
    pub async fn stop(&mut self) {
        if let Some(handle) = self.server_handle.take() {
            info!("Stopping Control API server");
            handle.abort();
        }
    }

    /// Get the server address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        if let Some(handle) = self.server_handle.take() {
            handle.abort();
        }
    }
}

/// Query projector power every `every` while at least one client is connected.
pub fn spawn_projector_poll(state: AppState, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; the connect hook covers that case
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let clients = state.client_count();
            if clients == 0 {
                continue;
            }
            debug!(
                "{} client(s) connected, checking {} status",
                clients,
                state.projector.name()
            );
            // Only the published state matters here
            drop(state.projector.update_power_status());
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use avhub_device_christie::{ChristieController, ProjectorConfig, TcpConnector};
    use avhub_device_marantz::{MarantzController, ReceiverConfig};

    fn test_state() -> (AppState, tokio::io::DuplexStream) {
        let (device, host) = tokio::io::duplex(256);
        let receiver = MarantzController::spawn(host, &ReceiverConfig::default());
        let projector = ChristieController::spawn(
            TcpConnector::new("127.0.0.1", 9),
            &ProjectorConfig::default(),
        );
        (AppState::new(receiver, projector), device)
    }

    #[tokio::test]
    async fn test_control_server_creation() {
        let (state, _device) = test_state();
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let server = ControlServer::new(addr, state.clone());

        assert_eq!(server.addr(), addr);
        assert_eq!(state.client_count(), 0);
    }

    #[tokio::test]
    async fn test_start_binds_ephemeral_port() {
        let (state, _device) = test_state();
        let mut server = ControlServer::new("127.0.0.1:0".parse().unwrap(), state);

        let bound = server.start().await.unwrap();
        assert_ne!(bound.port(), 0);
        assert_eq!(server.addr(), bound);

        server.stop().await;
    }
}
