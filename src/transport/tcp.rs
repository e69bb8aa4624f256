//! TCP transport to the live broker
//!
//! A background connection loop keeps the broker connection alive with
//! automatic reconnection and heartbeats. Subscribe/unsubscribe requests are
//! acknowledged by the broker; acks are matched by request id.

use super::traits::{LiveTransport, TransportEvent, TransportEvents};
use crate::error::TransportError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use things_live_shared::{
    codec::{self, FrameDecoder},
    envelope::Payload,
    live, Envelope, Heartbeat, Subscribe, SubscriptionAck, Unsubscribe,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{interval, timeout, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

type AckTable = Arc<Mutex<HashMap<String, oneshot::Sender<SubscriptionAck>>>>;

/// Configuration for the TCP transport
#[derive(Debug, Clone)]
pub struct TcpTransportConfig {
    /// Client ID stamped on transport-level messages
    pub client_id: String,
    /// Live broker address
    pub broker_addr: String,
    /// Reconnection delay (initial)
    pub reconnect_delay: Duration,
    /// Maximum reconnection delay
    pub max_reconnect_delay: Duration,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Silence after which the connection is considered dead (> heartbeat interval)
    pub read_timeout: Duration,
    /// How long to wait for a subscription acknowledgement
    pub ack_timeout: Duration,
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self {
            client_id: "things-live-client".into(),
            broker_addr: "127.0.0.1:8080".into(),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_millis(live::HEARTBEAT_TIMEOUT_MS),
            ack_timeout: Duration::from_millis(live::SUBSCRIPTION_ACK_TIMEOUT_MS),
        }
    }
}

#[derive(Default)]
struct LinkState {
    connected: AtomicBool,
    subscribed: AtomicBool,
}

/// Persistent connection to the live broker
pub struct TcpTransport {
    config: TcpTransportConfig,
    sequence_id: Arc<AtomicU64>,
    outbound_tx: mpsc::Sender<Envelope>,
    acks: AckTable,
    link: Arc<LinkState>,
}

impl TcpTransport {
    /// Create the transport and start its connection loop
    pub fn connect(config: TcpTransportConfig) -> (Self, TransportEvents) {
        let (outbound_tx, outbound_rx) = mpsc::channel::<Envelope>(100);
        let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(100);
        let sequence_id = Arc::new(AtomicU64::new(0));
        let acks: AckTable = Arc::new(Mutex::new(HashMap::new()));
        let link = Arc::new(LinkState::default());

        tokio::spawn(connection_loop(
            config.clone(),
            sequence_id.clone(),
            outbound_rx,
            event_tx,
            acks.clone(),
            link.clone(),
        ));

        let transport = Self {
            config,
            sequence_id,
            outbound_tx,
            acks,
            link,
        };
        (transport, event_rx)
    }

    pub fn is_connected(&self) -> bool {
        self.link.connected.load(Ordering::SeqCst)
    }

    pub fn is_subscribed(&self) -> bool {
        self.link.subscribed.load(Ordering::SeqCst)
    }

    fn wrap(&self, payload: Payload) -> Envelope {
        let seq = self.sequence_id.fetch_add(1, Ordering::SeqCst) + 1;
        Envelope::wrap(self.config.client_id.as_str(), seq, payload)
    }

    /// Send a subscription request and wait for the broker's verdict
    async fn request_subscription(
        &self,
        build: impl FnOnce(String) -> Payload,
    ) -> Result<SubscriptionAck, TransportError> {
        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.acks.lock().await.insert(request_id.clone(), tx);

        let envelope = self.wrap(build(request_id.clone()));
        if let Err(e) = self.publish(envelope).await {
            self.acks.lock().await.remove(&request_id);
            return Err(e);
        }

        match timeout(self.config.ack_timeout, rx).await {
            Ok(Ok(ack)) => Ok(ack),
            // Sender dropped: the connection went away before the ack arrived
            Ok(Err(_)) => Err(TransportError::NotConnected),
            Err(_) => {
                self.acks.lock().await.remove(&request_id);
                Err(TransportError::AckTimeout(self.config.ack_timeout))
            }
        }
    }
}

#[async_trait]
impl LiveTransport for TcpTransport {
    async fn publish(&self, envelope: Envelope) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.outbound_tx
            .send(envelope)
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn subscribe(&self) -> Result<(), TransportError> {
        let ack = self
            .request_subscription(|request_id| Payload::Subscribe(Subscribe { request_id }))
            .await?;
        if !ack.active {
            return Err(TransportError::Rejected(ack.message));
        }
        self.link.subscribed.store(true, Ordering::SeqCst);
        info!("Subscribed for live commands at {}", self.config.broker_addr);
        Ok(())
    }

    async fn unsubscribe(&self) -> Result<(), TransportError> {
        let ack = self
            .request_subscription(|request_id| Payload::Unsubscribe(Unsubscribe { request_id }))
            .await?;
        if ack.active {
            return Err(TransportError::Rejected(ack.message));
        }
        self.link.subscribed.store(false, Ordering::SeqCst);
        info!("Unsubscribed from live commands at {}", self.config.broker_addr);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "TCP"
    }
}

/// Main connection loop with reconnection logic
async fn connection_loop(
    config: TcpTransportConfig,
    sequence_id: Arc<AtomicU64>,
    mut outbound_rx: mpsc::Receiver<Envelope>,
    event_tx: mpsc::Sender<TransportEvent>,
    acks: AckTable,
    link: Arc<LinkState>,
) {
    let mut reconnect_delay = config.reconnect_delay;

    loop {
        if event_tx.is_closed() {
            break;
        }

        match timeout(config.connect_timeout, TcpStream::connect(&config.broker_addr)).await {
            Ok(Ok(stream)) => {
                reconnect_delay = config.reconnect_delay;
                link.connected.store(true, Ordering::SeqCst);
                info!("Connected to live broker at {}", config.broker_addr);
                let _ = event_tx.send(TransportEvent::Connected { transport: "TCP" }).await;

                let outcome = handle_connection(
                    stream,
                    &config,
                    &sequence_id,
                    &mut outbound_rx,
                    &event_tx,
                    &acks,
                    &link,
                )
                .await;

                link.connected.store(false, Ordering::SeqCst);
                link.subscribed.store(false, Ordering::SeqCst);
                // Outstanding subscription requests fail with NotConnected
                acks.lock().await.clear();

                match outcome {
                    Ok(()) => {
                        debug!("Transport dropped, connection loop exiting");
                        break;
                    }
                    Err(reason) => {
                        warn!("Disconnected from live broker: {}", reason);
                        let _ = event_tx
                            .send(TransportEvent::Disconnected {
                                reason: reason.to_string(),
                            })
                            .await;
                    }
                }
            }
            Ok(Err(e)) => {
                warn!("Connecting to {} failed: {}", config.broker_addr, e);
            }
            Err(_) => {
                warn!("Connecting to {} timed out", config.broker_addr);
            }
        }

        tokio::time::sleep(reconnect_delay).await;

        // Exponential backoff
        reconnect_delay = std::cmp::min(reconnect_delay * 2, config.max_reconnect_delay);
    }
}

/// Handle an active connection
///
/// Returns `Ok(())` when the owning transport was dropped, `Err` on connection loss
/// or a frame that cannot be decoded.
async fn handle_connection(
    stream: TcpStream,
    config: &TcpTransportConfig,
    sequence_id: &Arc<AtomicU64>,
    outbound_rx: &mut mpsc::Receiver<Envelope>,
    event_tx: &mpsc::Sender<TransportEvent>,
    acks: &AckTable,
    link: &LinkState,
) -> Result<(), TransportError> {
    let (mut reader, mut writer) = stream.into_split();

    let mut decoder = FrameDecoder::new();
    let mut read_buf = vec![0u8; 4096];

    let mut heartbeat_interval = interval(Duration::from_millis(live::HEARTBEAT_INTERVAL_MS));
    let start_time = Instant::now();
    let mut last_inbound = Instant::now();

    loop {
        tokio::select! {
            _ = heartbeat_interval.tick() => {
                if last_inbound.elapsed() > config.read_timeout {
                    return Err(TransportError::Io(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("no data from broker for {:?}", config.read_timeout),
                    )));
                }

                let seq = sequence_id.fetch_add(1, Ordering::SeqCst) + 1;
                let uptime_ms = start_time.elapsed().as_millis() as u64;
                let heartbeat = Heartbeat::new(uptime_ms, link.subscribed.load(Ordering::SeqCst));
                let envelope = Envelope::wrap(config.client_id.as_str(), seq, Payload::Heartbeat(heartbeat));

                writer.write_all(&codec::encode(&envelope)?).await?;
            }

            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(envelope) => writer.write_all(&codec::encode(&envelope)?).await?,
                    None => {
                        let _ = writer.shutdown().await;
                        return Ok(());
                    }
                }
            }

            result = reader.read(&mut read_buf) => {
                match result {
                    Ok(0) => {
                        return Err(TransportError::Io(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "broker closed connection",
                        )))
                    }
                    Ok(n) => {
                        last_inbound = Instant::now();
                        decoder.extend(&read_buf[..n]);

                        // Process all complete frames
                        while let Some(envelope) = decoder.decode_next()? {
                            dispatch_inbound(envelope, event_tx, acks).await;
                        }
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
    }
}

async fn dispatch_inbound(
    envelope: Envelope,
    event_tx: &mpsc::Sender<TransportEvent>,
    acks: &AckTable,
) {
    match envelope.payload {
        Some(Payload::SubscriptionAck(ack)) => match acks.lock().await.remove(&ack.request_id) {
            Some(waiter) => {
                let _ = waiter.send(ack);
            }
            None => debug!("Unexpected subscription ack {}", ack.request_id),
        },
        Some(Payload::Heartbeat(_)) => {}
        _ => {
            let _ = event_tx.send(TransportEvent::Received(envelope)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use bytes::{BufMut, BytesMut};
    use things_live_shared::{CommandType, LiveCommand};
    use tokio::net::TcpListener;

    /// Accepts one connection, acks subscriptions and echoes commands back
    async fn fake_broker(listener: TcpListener) -> Result<()> {
        let (mut socket, _) = listener.accept().await?;
        let mut decoder = FrameDecoder::new();
        let mut buf = vec![0u8; 4096];
        let mut out = BytesMut::new();

        loop {
            let n = socket.read(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }
            decoder.extend(&buf[..n]);
            while let Some(envelope) = decoder.decode_next()? {
                let reply = match envelope.payload {
                    Some(Payload::Subscribe(s)) => {
                        Payload::SubscriptionAck(SubscriptionAck::accepted(s.request_id, true))
                    }
                    Some(Payload::Unsubscribe(u)) => {
                        Payload::SubscriptionAck(SubscriptionAck::accepted(u.request_id, false))
                    }
                    Some(Payload::Command(cmd)) => Payload::Command(cmd),
                    _ => continue,
                };
                codec::encode_into(&Envelope::wrap("broker", 1, reply), &mut out)?;
                socket.write_all(&out.split()).await?;
            }
        }
    }

    #[tokio::test]
    async fn test_subscribe_and_publish_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(fake_broker(listener));

        let (transport, mut events) = TcpTransport::connect(TcpTransportConfig {
            client_id: "device".into(),
            broker_addr: addr.to_string(),
            ..Default::default()
        });

        assert!(matches!(
            events.recv().await,
            Some(TransportEvent::Connected { .. })
        ));

        transport.subscribe().await.expect("subscribe acked");
        assert!(transport.is_subscribed());

        let cmd = LiveCommand {
            correlation_id: "c-1".into(),
            cmd_type: CommandType::CmdModifyThing.into(),
            entity_id: "thing-1".into(),
            ..Default::default()
        };
        transport
            .publish(Envelope::wrap("device", 1, Payload::Command(cmd)))
            .await
            .unwrap();

        match events.recv().await {
            Some(TransportEvent::Received(env)) => match env.payload {
                Some(Payload::Command(echo)) => assert_eq!(echo.correlation_id, "c-1"),
                other => panic!("unexpected payload {:?}", other),
            },
            other => panic!("unexpected event {:?}", other),
        }

        transport.unsubscribe().await.expect("unsubscribe acked");
        assert!(!transport.is_subscribed());
    }

    #[tokio::test]
    async fn test_publish_while_disconnected_fails_fast() {
        let (transport, _events) = TcpTransport::connect(TcpTransportConfig {
            broker_addr: "127.0.0.1:1".into(),
            connect_timeout: Duration::from_millis(100),
            ..Default::default()
        });

        let result = transport
            .publish(Envelope::wrap("c", 1, Payload::Heartbeat(Heartbeat::new(0, false))))
            .await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }
    #[tokio::test]
    async fn test_broker_closing_reports_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await?;
            socket.shutdown().await?;
            tokio::time::sleep(Duration::from_secs(5)).await;
            Result::<()>::Ok(())
        });

        let (_transport, mut events) = TcpTransport::connect(TcpTransportConfig {
            broker_addr: addr.to_string(),
            ..Default::default()
        });

        assert!(matches!(events.recv().await, Some(TransportEvent::Connected { .. })));
        match events.recv().await {
            Some(TransportEvent::Disconnected { reason }) => {
                assert!(reason.contains("broker closed connection"), "{reason}")
            }
            other => panic!("expected disconnect, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_oversized_frame_drops_connection_with_codec_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await?;
            let mut frame = BytesMut::new();
            frame.put_u32(codec::MAX_FRAME_SIZE + 1);
            socket.write_all(&frame).await?;
            // Keep the socket open so only the bad frame can end the connection
            tokio::time::sleep(Duration::from_secs(5)).await;
            Result::<()>::Ok(())
        });

        let (_transport, mut events) = TcpTransport::connect(TcpTransportConfig {
            broker_addr: addr.to_string(),
            ..Default::default()
        });

        assert!(matches!(events.recv().await, Some(TransportEvent::Connected { .. })));
        match events.recv().await {
            Some(TransportEvent::Disconnected { reason }) => {
                assert!(reason.starts_with("Codec error"), "{reason}")
            }
            other => panic!("expected disconnect, got {:?}", other),
        }
    }
}
