use async_trait::async_trait;
use avhub_core::Connector;
use tokio::net::TcpStream;

/// Plain TCP connection to the projector's control port.
#[derive(Clone, Debug)]
pub struct TcpConnector {
    address: String,
    port: u16,
}

impl TcpConnector {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Stream = TcpStream;

    fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    async fn connect(&self) -> std::io::Result<TcpStream> {
        let stream = TcpStream::connect((self.address.as_str(), self.port)).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}
