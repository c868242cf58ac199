use crate::config::ReceiverConfig;
use anyhow::{Context, Result};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

/// Open the receiver's serial port (8N1, no flow control).
pub fn open_port(config: &ReceiverConfig) -> Result<SerialStream> {
    tracing::info!("Opening receiver serial port {} at {} baud", config.port, config.baud_rate);

    let stream = tokio_serial::new(&config.port, config.baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()
        .with_context(|| format!("Failed to open serial port {}", config.port))?;

    tracing::info!("Receiver serial port is open");
    Ok(stream)
}
