//! Serial I/O for one device.
//!
//! A reactor task owns the serial port. It feeds every chunk it reads into the device's session and
//! carries out the writes and RTS changes the session asks for through its [`ChannelTransport`].
//! Losing the port ends the task; nothing here reconnects.

use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{debug, info};

use crate::config::DeviceConfig;
use crate::session::Session;
use crate::transport::{ChannelTransport, TransportOp};

const READ_BUFFER_SIZE: usize = 1024;

pub type SharedSession<T> = Arc<Mutex<Session<T>>>;

#[derive(Debug, Error)]
pub enum ReactorError {
    #[error("failed to open serial port {port}: {source}")]
    Open {
        port: String,
        source: tokio_serial::Error,
    },
    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to set RTS: {0}")]
    FlowControl(#[from] tokio_serial::Error),
    #[error("serial port closed by device")]
    Closed,
    #[error("session dropped its transport")]
    TransportDropped,
}

/// A byte stream with an RTS line.
pub trait SerialLink: AsyncRead + AsyncWrite + Unpin + Send {
    fn set_request_to_send(&mut self, level: bool) -> Result<(), ReactorError>;
}

impl SerialLink for SerialStream {
    fn set_request_to_send(&mut self, level: bool) -> Result<(), ReactorError> {
        self.write_request_to_send(level)?;
        Ok(())
    }
}

/// The reactor's half of a device connection: the port and the session's pending operations.
pub struct DeviceLink<P = SerialStream> {
    pub port: P,
    pub ops: mpsc::UnboundedReceiver<TransportOp>,
}

/// Open the configured port and return it with a session wired to write through it.
pub fn open(
    device: &DeviceConfig,
    current_time: u64,
) -> Result<(Session<ChannelTransport>, DeviceLink), ReactorError> {
    let port = tokio_serial::new(&device.port, device.baud_rate)
        .open_native_async()
        .map_err(|source| ReactorError::Open {
            port: device.port.clone(),
            source,
        })?;
    info!(
        "Opened serial port {} at {} baud for {}",
        device.port, device.baud_rate, device.name
    );

    let (transport, ops) = ChannelTransport::new();
    let session = Session::new(device.name.clone(), transport, current_time);
    Ok((session, DeviceLink { port, ops }))
}

/// Drive one device until its port fails.
///
/// Runs the startup handshake, then alternates between delivering received chunks to the session
/// and applying the session's transport operations to the port. Always returns an error, since the
/// only way out is losing the link.
pub async fn run<P: SerialLink>(
    link: DeviceLink<P>,
    session: SharedSession<ChannelTransport>,
) -> ReactorError {
    let DeviceLink { mut port, mut ops } = link;
    session.lock().await.connection_made();

    let mut buf = [0u8; READ_BUFFER_SIZE];
    let result = loop {
        tokio::select! {
            read = port.read(&mut buf) => {
                match read {
                    Ok(0) => break ReactorError::Closed,
                    Ok(n) => session.lock().await.data_received(&buf[..n]),
                    Err(e) => break ReactorError::Io(e),
                }
            }
            op = ops.recv() => {
                match op {
                    Some(op) => {
                        if let Err(e) = apply(&mut port, op).await {
                            break e;
                        }
                    }
                    None => break ReactorError::TransportDropped,
                }
            }
        }
    };

    let io_error = match &result {
        ReactorError::Io(e) => Some(e),
        _ => None,
    };
    session.lock().await.connection_lost(io_error);
    result
}

async fn apply<P: SerialLink>(port: &mut P, op: TransportOp) -> Result<(), ReactorError> {
    match op {
        TransportOp::Write(bytes) => {
            port.write_all(&bytes).await?;
            debug!("Wrote {} bytes to serial port", bytes.len());
        }
        TransportOp::SetRequestToSend(level) => {
            port.set_request_to_send(level)?;
            debug!("Set RTS to {}", level);
        }
    }
    Ok(())
}
