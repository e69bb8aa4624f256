//! In-process transport
//!
//! `MemoryTransport` hands published envelopes to a [`MemoryPeer`] and lets
//! the peer inject inbound events. Used to wire clients together inside one
//! process and as the transport double in tests.

use super::traits::{LiveTransport, TransportEvent, TransportEvents};
use crate::error::TransportError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use things_live_shared::Envelope;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Default)]
struct SharedState {
    subscribe_calls: AtomicUsize,
    unsubscribe_calls: AtomicUsize,
    subscribed: AtomicBool,
    failing: AtomicBool,
}

/// Client-side half of an in-memory link
pub struct MemoryTransport {
    published_tx: mpsc::UnboundedSender<Envelope>,
    state: Arc<SharedState>,
}

/// Peer-side half: observes what the client published and feeds it events
pub struct MemoryPeer {
    inbound_tx: mpsc::Sender<TransportEvent>,
    published_rx: mpsc::UnboundedReceiver<Envelope>,
    state: Arc<SharedState>,
}

impl MemoryTransport {
    /// Create a connected transport, its inbound event stream and the peer
    pub fn pair() -> (Self, TransportEvents, MemoryPeer) {
        let (published_tx, published_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(256);
        let state = Arc::new(SharedState::default());

        let transport = Self {
            published_tx,
            state: state.clone(),
        };
        let peer = MemoryPeer {
            inbound_tx,
            published_rx,
            state,
        };
        (transport, inbound_rx, peer)
    }

    fn check_failing(&self) -> Result<(), TransportError> {
        if self.state.failing.load(Ordering::SeqCst) {
            Err(TransportError::NotConnected)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LiveTransport for MemoryTransport {
    async fn publish(&self, envelope: Envelope) -> Result<(), TransportError> {
        self.check_failing()?;
        self.published_tx
            .send(envelope)
            .map_err(|_| TransportError::Closed)
    }

    async fn subscribe(&self) -> Result<(), TransportError> {
        self.check_failing()?;
        // Let concurrent callers interleave the way a network round trip would
        tokio::task::yield_now().await;
        self.state.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        self.state.subscribed.store(true, Ordering::SeqCst);
        debug!("memory transport subscribed");
        Ok(())
    }

    async fn unsubscribe(&self) -> Result<(), TransportError> {
        self.check_failing()?;
        tokio::task::yield_now().await;
        self.state.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
        self.state.subscribed.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Memory"
    }
}

impl MemoryPeer {
    /// Deliver an envelope to the client as if it arrived from the network
    pub async fn deliver(&self, envelope: Envelope) -> Result<(), TransportError> {
        self.inbound_tx
            .send(TransportEvent::Received(envelope))
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Simulate a connection loss; publishes fail until `set_failing(false)`
    pub async fn disconnect(&self, reason: impl Into<String>) -> Result<(), TransportError> {
        self.set_failing(true);
        self.state.subscribed.store(false, Ordering::SeqCst);
        self.inbound_tx
            .send(TransportEvent::Disconnected {
                reason: reason.into(),
            })
            .await
            .map_err(|_| TransportError::Closed)
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.failing.store(failing, Ordering::SeqCst);
    }

    /// Next envelope the client published, waiting if none is queued
    pub async fn next_published(&mut self) -> Option<Envelope> {
        self.published_rx.recv().await
    }

    /// Next envelope the client published, if one is already queued
    pub fn try_next_published(&mut self) -> Option<Envelope> {
        self.published_rx.try_recv().ok()
    }

    /// Split into an inbound injector and the published stream
    pub fn split(self) -> (MemoryInjector, mpsc::UnboundedReceiver<Envelope>) {
        (
            MemoryInjector {
                inbound_tx: self.inbound_tx,
                state: self.state,
            },
            self.published_rx,
        )
    }

    pub fn subscribe_calls(&self) -> usize {
        self.state.subscribe_calls.load(Ordering::SeqCst)
    }

    pub fn unsubscribe_calls(&self) -> usize {
        self.state.unsubscribe_calls.load(Ordering::SeqCst)
    }

    pub fn is_subscribed(&self) -> bool {
        self.state.subscribed.load(Ordering::SeqCst)
    }
}

/// Inbound half of a split [`MemoryPeer`]
#[derive(Clone)]
pub struct MemoryInjector {
    inbound_tx: mpsc::Sender<TransportEvent>,
    state: Arc<SharedState>,
}

impl MemoryInjector {
    pub async fn deliver(&self, envelope: Envelope) -> Result<(), TransportError> {
        self.inbound_tx
            .send(TransportEvent::Received(envelope))
            .await
            .map_err(|_| TransportError::Closed)
    }

    pub fn is_subscribed(&self) -> bool {
        self.state.subscribed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use things_live_shared::{envelope::Payload, Heartbeat};

    #[tokio::test]
    async fn test_publish_reaches_peer_and_deliver_reaches_client() {
        let (transport, mut events, mut peer) = MemoryTransport::pair();
        let hb = Envelope::wrap("c", 1, Payload::Heartbeat(Heartbeat::new(5, false)));

        transport.publish(hb.clone()).await.unwrap();
        assert_eq!(peer.next_published().await, Some(hb.clone()));

        peer.deliver(hb.clone()).await.unwrap();
        match events.recv().await {
            Some(TransportEvent::Received(env)) => assert_eq!(env, hb),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disconnect_fails_publishes() {
        let (transport, mut events, peer) = MemoryTransport::pair();
        transport.subscribe().await.unwrap();
        assert!(peer.is_subscribed());

        peer.disconnect("link down").await.unwrap();
        assert!(matches!(
            events.recv().await,
            Some(TransportEvent::Disconnected { .. })
        ));
        assert!(!peer.is_subscribed());
        assert!(transport.subscribe().await.is_err());
        assert_eq!(peer.subscribe_calls(), 1);
    }
}
