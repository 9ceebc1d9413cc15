use tokio::sync::mpsc;
use tracing::error;

/// The write side of the device link, as seen by a session.
///
/// Writes are fire-and-forget. An implementation that cannot deliver bytes is responsible for
/// tearing the connection down itself; failures never flow back into the command queue.
pub trait Transport {
    fn write(&mut self, bytes: &[u8]);

    /// Drive the RTS line. The device stops accepting input while it is asserted.
    fn set_request_to_send(&mut self, level: bool);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportOp {
    Write(Vec<u8>),
    SetRequestToSend(bool),
}

/// Hands operations to the task that owns the serial port.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<TransportOp>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransportOp>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, op: TransportOp) {
        if self.tx.send(op).is_err() {
            error!("Serial writer has shut down, dropping transport operation");
        }
    }
}

impl Transport for ChannelTransport {
    fn write(&mut self, bytes: &[u8]) {
        self.send(TransportOp::Write(bytes.to_vec()));
    }

    fn set_request_to_send(&mut self, level: bool) {
        self.send(TransportOp::SetRequestToSend(level));
    }
}

/// Keeps every operation in memory. Used by tests and by tools that replay captured traffic.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    pub ops: Vec<TransportOp>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Written lines, terminators stripped, in write order.
    pub fn written_lines(&self) -> Vec<String> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                TransportOp::Write(bytes) => Some(
                    String::from_utf8_lossy(bytes)
                        .trim_end_matches("\r\n")
                        .to_string(),
                ),
                TransportOp::SetRequestToSend(_) => None,
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }
}

impl Transport for RecordingTransport {
    fn write(&mut self, bytes: &[u8]) {
        self.ops.push(TransportOp::Write(bytes.to_vec()));
    }

    fn set_request_to_send(&mut self, level: bool) {
        self.ops.push(TransportOp::SetRequestToSend(level));
    }
}
