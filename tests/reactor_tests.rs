use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::sync::{mpsc, Mutex};
use wabatar::reactor::{self, DeviceLink, ReactorError, SerialLink, SharedSession};
use wabatar::session::Session;
use wabatar::transport::{ChannelTransport, TransportOp};

const TIMEOUT: Duration = Duration::from_secs(5);

/// In-memory serial port that remembers every RTS level it was given.
struct TestPort {
    io: DuplexStream,
    rts: Arc<std::sync::Mutex<Vec<bool>>>,
}

impl AsyncRead for TestPort {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_read(cx, buf)
    }
}

impl AsyncWrite for TestPort {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.io).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_shutdown(cx)
    }
}

impl SerialLink for TestPort {
    fn set_request_to_send(&mut self, level: bool) -> Result<(), ReactorError> {
        self.rts.lock().unwrap().push(level);
        Ok(())
    }
}

/// Port whose reads always fail, as after the adapter is unplugged.
struct UnpluggedPort;

impl AsyncRead for UnpluggedPort {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged")))
    }
}

impl AsyncWrite for UnpluggedPort {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl SerialLink for UnpluggedPort {
    fn set_request_to_send(&mut self, _level: bool) -> Result<(), ReactorError> {
        Ok(())
    }
}

fn session() -> (
    SharedSession<ChannelTransport>,
    mpsc::UnboundedReceiver<TransportOp>,
) {
    let (transport, ops) = ChannelTransport::new();
    let session = Session::new("avatar", transport, 0);
    (Arc::new(Mutex::new(session)), ops)
}

async fn read_line(device: &mut DuplexStream, expected: &[u8]) {
    let mut buf = vec![0u8; expected.len()];
    tokio::time::timeout(TIMEOUT, device.read_exact(&mut buf))
        .await
        .expect("timed out waiting for the reactor to write")
        .unwrap();
    assert_eq!(buf, expected, "{:?}", String::from_utf8_lossy(&buf));
}

#[tokio::test]
async fn test_handshake_and_acknowledgements_on_the_wire() {
    let (session, ops) = session();
    let (port_io, mut device) = tokio::io::duplex(1024);
    let rts = Arc::new(std::sync::Mutex::new(Vec::new()));
    let port = TestPort {
        io: port_io,
        rts: Arc::clone(&rts),
    };

    let reactor = tokio::spawn(reactor::run(DeviceLink { port, ops }, Arc::clone(&session)));

    // RTS is dropped before the first command goes out.
    read_line(&mut device, b"DE=7\r\n").await;
    assert_eq!(*rts.lock().unwrap(), vec![false]);
    assert!(session.lock().await.is_connected());

    // Each echo releases exactly the next queued command.
    device.write_all(b"DE0=7-\r\n").await.unwrap();
    read_line(&mut device, b"SP0\r\n").await;

    device.write_all(b"SP0=21.5\r\n").await.unwrap();
    read_line(&mut device, b"SP2\r\n").await;
    assert_eq!(session.lock().await.status().setpoints.values[0], 21.5);

    // Peer closes the line.
    drop(device);
    let error = tokio::time::timeout(TIMEOUT, reactor).await.unwrap().unwrap();

    assert!(matches!(error, ReactorError::Closed));
    assert!(!session.lock().await.is_connected());
}

#[tokio::test]
async fn test_read_error_disconnects_session() {
    let (session, ops) = session();

    let error = tokio::time::timeout(
        TIMEOUT,
        reactor::run(
            DeviceLink {
                port: UnpluggedPort,
                ops,
            },
            Arc::clone(&session),
        ),
    )
    .await
    .unwrap();

    assert!(matches!(error, ReactorError::Io(ref e) if e.kind() == io::ErrorKind::BrokenPipe));
    assert!(!session.lock().await.is_connected());
}
