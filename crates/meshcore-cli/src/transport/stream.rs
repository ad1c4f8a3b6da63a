//! Byte-stream transports: TCP and USB serial.
//!
//! The link runs as a task on a tokio runtime owned by the caller. The
//! executor stays synchronous and talks to the task over a channel, the
//! same split the simulator's UART bridge uses.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use meshcore_companion_protocol::FrameCodec;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_serial::SerialPortBuilderExt;

use super::{Connector, FrameSink, Target, Transport};
use crate::error::{ConnectError, LinkError};

/// Outbound frames queued ahead of the writer.
const SEND_QUEUE_DEPTH: usize = 16;

/// How the pump loop ended without an I/O error.
enum Closed {
    ByPeer,
    ByHost,
}

// ============================================================================
// Connector
// ============================================================================

/// Opens TCP or serial links on a tokio runtime.
pub struct StreamConnector {
    target: Target,
    runtime: tokio::runtime::Handle,
    connect_timeout: Duration,
}

impl StreamConnector {
    /// Create a connector for `target`.
    pub fn new(target: Target, runtime: tokio::runtime::Handle, connect_timeout: Duration) -> Self {
        StreamConnector {
            target,
            runtime,
            connect_timeout,
        }
    }

    fn open_error(&self, reason: impl ToString) -> ConnectError {
        ConnectError::Open {
            target: self.target.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl Connector for StreamConnector {
    fn connect(&mut self, sink: Arc<dyn FrameSink>) -> Result<Box<dyn Transport>, ConnectError> {
        match &self.target {
            Target::Tcp { host, port } => {
                let addr = format!("{}:{}", host, port);
                let stream = self
                    .runtime
                    .block_on(async {
                        tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr)).await
                    })
                    .map_err(|_| self.open_error("connection timed out"))?
                    .map_err(|e| self.open_error(e))?;
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!("set_nodelay failed: {}", e);
                }
                tracing::info!("connected to {}", addr);
                Ok(Box::new(StreamTransport::spawn(
                    &self.runtime,
                    stream,
                    sink,
                    addr,
                )))
            }
            Target::Serial { path, baud } => {
                // Opening a native async port registers it with the reactor.
                let _guard = self.runtime.enter();
                let port = tokio_serial::new(path.as_str(), *baud)
                    .open_native_async()
                    .map_err(|e| self.open_error(e))?;
                tracing::info!("opened {} at {} baud", path, baud);
                Ok(Box::new(StreamTransport::spawn(
                    &self.runtime,
                    port,
                    sink,
                    path.clone(),
                )))
            }
            Target::Ble(address) => Err(ConnectError::Unsupported(format!(
                "BLE address {} given, but this build only connects over TCP or serial",
                address
            ))),
        }
    }

    fn describe(&self) -> String {
        self.target.to_string()
    }
}

// ============================================================================
// Transport
// ============================================================================

/// A running TCP or serial link.
pub struct StreamTransport {
    tx: Option<mpsc::Sender<Vec<u8>>>,
    connected: Arc<AtomicBool>,
    task: JoinHandle<()>,
    description: String,
}

impl StreamTransport {
    /// Start pumping `stream` on `runtime`.
    pub fn spawn<S>(
        runtime: &tokio::runtime::Handle,
        stream: S,
        sink: Arc<dyn FrameSink>,
        description: String,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(SEND_QUEUE_DEPTH);
        let connected = Arc::new(AtomicBool::new(true));
        let flag = connected.clone();
        let name = description.clone();

        let task = runtime.spawn(async move {
            let result = pump(stream, rx, sink.as_ref()).await;
            flag.store(false, Ordering::SeqCst);
            match result {
                Ok(Closed::ByHost) => tracing::debug!("{} closed", name),
                Ok(Closed::ByPeer) => sink.on_closed("connection closed by device"),
                Err(e) => sink.on_closed(&e.to_string()),
            }
        });

        StreamTransport {
            tx: Some(tx),
            connected,
            task,
            description,
        }
    }
}

impl Transport for StreamTransport {
    fn send(&mut self, payload: &[u8]) -> Result<(), LinkError> {
        if !self.is_connected() {
            return Err(LinkError::Closed);
        }
        let tx = self.tx.as_ref().ok_or(LinkError::Closed)?;
        tracing::trace!(bytes = %hex::encode(payload), "tx");
        tx.blocking_send(FrameCodec::encode(payload))
            .map_err(|_| LinkError::Write("writer task is gone".to_string()))
    }

    fn is_connected(&self) -> bool {
        self.tx.is_some() && self.connected.load(Ordering::SeqCst)
    }

    fn close(&mut self) {
        if self.tx.take().is_some() {
            self.connected.store(false, Ordering::SeqCst);
            self.task.abort();
        }
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Move bytes both ways until either side closes.
async fn pump<S>(
    stream: S,
    mut outbound: mpsc::Receiver<Vec<u8>>,
    sink: &dyn FrameSink,
) -> io::Result<Closed>
where
    S: AsyncRead + AsyncWrite,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut codec = FrameCodec::new();
    let mut read_buf = [0u8; 1024];

    loop {
        tokio::select! {
            // Radio -> frames -> router
            result = reader.read(&mut read_buf) => {
                let n = result?;
                if n == 0 {
                    return Ok(Closed::ByPeer);
                }
                codec.push(&read_buf[..n]);
                loop {
                    match codec.decode() {
                        Ok(Some(frame)) => {
                            tracing::trace!(bytes = %hex::encode(&frame), "rx");
                            sink.on_frame(&frame);
                        }
                        Ok(None) => break,
                        Err(e) => tracing::warn!("resynchronising: {}", e),
                    }
                }
            }

            // Executor -> radio
            data = outbound.recv() => {
                let Some(data) = data else {
                    return Ok(Closed::ByHost);
                };
                writer.write_all(&data).await?;
                writer.flush().await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Collect {
        frames: Mutex<Vec<Vec<u8>>>,
        closed: Mutex<Option<String>>,
    }

    impl FrameSink for Collect {
        fn on_frame(&self, frame: &[u8]) {
            self.frames.lock().push(frame.to_vec());
        }

        fn on_closed(&self, reason: &str) {
            *self.closed.lock() = Some(reason.to_string());
        }
    }

    #[test]
    fn test_pump_frames_both_ways() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let (ours, mut theirs) = tokio::io::duplex(256);
        let sink = Arc::new(Collect::default());
        let mut transport =
            StreamTransport::spawn(runtime.handle(), ours, sink.clone(), "duplex".into());

        transport.send(&[22, 3]).unwrap();
        let written = runtime.block_on(async {
            let mut buf = [0u8; 5];
            theirs.read_exact(&mut buf).await.map(|_| buf)
        });
        assert_eq!(written.unwrap(), [b'<', 2, 0, 22, 3]);

        runtime
            .block_on(theirs.write_all(&[0xAA, b'>', 1, 0, 0x83, b'>', 1]))
            .unwrap();
        runtime.block_on(theirs.write_all(&[0, 0])).unwrap();
        drop(theirs);
        runtime.block_on(async {
            for _ in 0..100 {
                if sink.closed.lock().is_some() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        assert_eq!(*sink.frames.lock(), vec![vec![0x83], vec![0]]);
        assert!(sink.closed.lock().is_some());
        assert!(!transport.is_connected());
        assert!(matches!(transport.send(&[1]), Err(LinkError::Closed)));
    }

    #[test]
    fn test_local_close_is_silent() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let (ours, _theirs) = tokio::io::duplex(64);
        let sink = Arc::new(Collect::default());
        let mut transport =
            StreamTransport::spawn(runtime.handle(), ours, sink.clone(), "duplex".into());
        transport.close();
        transport.close();
        assert!(!transport.is_connected());
        assert!(sink.closed.lock().is_none());
    }

    #[test]
    fn test_ble_is_unsupported() {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let mut connector = StreamConnector::new(
            Target::Ble("C2:2B:A1:D5:3E:B6".into()),
            runtime.handle().clone(),
            Duration::from_secs(1),
        );
        let sink: Arc<dyn FrameSink> = Arc::new(Collect::default());
        assert!(matches!(connector.connect(sink), Err(ConnectError::Unsupported(_))));
    }
}
