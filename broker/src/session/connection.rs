//! Individual client session handling

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use things_live_shared::{
    codec::{self, FrameDecoder},
    envelope::Payload,
    Envelope,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Handle to send messages to a specific client
#[derive(Clone)]
pub struct SessionHandle {
    pub client_id: String,
    pub addr: SocketAddr,
    outbound: mpsc::Sender<Envelope>,
    pub connected_at: Instant,
    last_heartbeat: Arc<Mutex<Instant>>,
    subscribed: Arc<AtomicBool>,
}

impl SessionHandle {
    /// Create a handle whose outbound envelopes land on the returned receiver
    pub fn detached(client_id: impl Into<String>, addr: SocketAddr) -> (Self, mpsc::Receiver<Envelope>) {
        let (outbound, rx) = mpsc::channel(256);
        let now = Instant::now();
        let handle = Self {
            client_id: client_id.into(),
            addr,
            outbound,
            connected_at: now,
            last_heartbeat: Arc::new(Mutex::new(now)),
            subscribed: Arc::new(AtomicBool::new(false)),
        };
        (handle, rx)
    }

    /// Queue an envelope for this client
    pub async fn send(&self, envelope: &Envelope) -> Result<()> {
        self.outbound
            .send(envelope.clone())
            .await
            .map_err(|_| anyhow::anyhow!("Session writer closed: {}", self.client_id))
    }

    /// Check if the session is still alive (heartbeat not timed out)
    pub async fn is_alive(&self, timeout: Duration) -> bool {
        self.last_heartbeat.lock().await.elapsed() < timeout
    }

    pub async fn update_heartbeat(&self) {
        *self.last_heartbeat.lock().await = Instant::now();
    }

    /// Whether live commands and events are delivered to this client
    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::SeqCst)
    }

    pub fn set_subscribed(&self, subscribed: bool) {
        self.subscribed.store(subscribed, Ordering::SeqCst);
    }

    /// Same underlying connection
    pub fn same_session(&self, other: &SessionHandle) -> bool {
        Arc::ptr_eq(&self.subscribed, &other.subscribed)
    }
}

/// Active client session
pub struct LiveSession {
    pub handle: SessionHandle,
    reader: OwnedReadHalf,
    decoder: FrameDecoder,
    read_buf: Vec<u8>,
}

impl LiveSession {
    /// Create a new session from a TCP stream and start its writer task
    pub fn new(stream: TcpStream, addr: SocketAddr) -> Self {
        let (reader, writer) = stream.into_split();
        // Client ID is set on the first message
        let (handle, outbound_rx) = SessionHandle::detached(String::new(), addr);
        tokio::spawn(write_loop(writer, outbound_rx, addr));

        Self {
            handle,
            reader,
            decoder: FrameDecoder::new(),
            read_buf: vec![0u8; 4096],
        }
    }

    /// Read the next envelope from this session
    /// Returns None if the connection is closed
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            match self.decoder.decode_next() {
                Ok(Some(envelope)) => {
                    if self.handle.client_id.is_empty() {
                        self.handle.client_id = envelope.client_id().to_string();
                    }

                    // Any inbound traffic counts as liveness
                    self.handle.update_heartbeat().await;
                    if let Some(Payload::Heartbeat(_)) = &envelope.payload {
                        debug!("Heartbeat from {}", self.handle.client_id);
                    }

                    return Some(envelope);
                }
                Ok(None) => {
                    // Need more data
                }
                Err(e) => {
                    warn!("Decode error from {}: {}", self.handle.addr, e);
                    return None;
                }
            }

            match self.reader.read(&mut self.read_buf).await {
                Ok(0) => return None,
                Ok(n) => {
                    self.decoder.extend(&self.read_buf[..n]);
                }
                Err(e) => {
                    warn!("Read error from {}: {}", self.handle.addr, e);
                    return None;
                }
            }
        }
    }

    /// Client ID (empty until the first message is received)
    pub fn client_id(&self) -> &str {
        &self.handle.client_id
    }
}

async fn write_loop(mut writer: OwnedWriteHalf, mut outbound_rx: mpsc::Receiver<Envelope>, addr: SocketAddr) {
    while let Some(envelope) = outbound_rx.recv().await {
        let encoded = match codec::encode(&envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to encode envelope for {}: {}", addr, e);
                continue;
            }
        };
        if let Err(e) = writer.write_all(&encoded).await {
            warn!("Write error to {}: {}", addr, e);
            break;
        }
    }
    debug!("Writer for {} stopped", addr);
}
