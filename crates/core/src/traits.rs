use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;

/// Read side shared by every device orchestrator handle.
pub trait DeviceHandle: Send + Sync {
    /// Device state snapshot carried by events.
    type State: Clone + Send + 'static;

    /// Short name used in logs and by the dispatcher (e.g. "receiver").
    fn name(&self) -> &str;

    /// Last state confirmed by the device.
    fn state(&self) -> Self::State;

    /// Subscribe to state-change events.
    fn subscribe(&self) -> broadcast::Receiver<Self::State>;
}

/// Opens a byte stream to a device on demand.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Human-readable endpoint, for logs.
    fn endpoint(&self) -> String;

    async fn connect(&self) -> std::io::Result<Self::Stream>;
}
