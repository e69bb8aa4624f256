//! Transport trait abstraction for pluggable live-channel backends

use crate::error::TransportError;
use async_trait::async_trait;
use things_live_shared::Envelope;
use tokio::sync::mpsc;

/// Inbound notifications from a transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Connection (re-)established
    Connected { transport: &'static str },
    /// An envelope arrived from the peer
    Received(Envelope),
    /// Connection lost; broker-side subscriptions are gone
    Disconnected { reason: String },
}

/// Receiving side of a transport's inbound events
pub type TransportEvents = mpsc::Receiver<TransportEvent>;

/// Outbound half of a live-channel connection
#[async_trait]
pub trait LiveTransport: Send + Sync + 'static {
    /// Send one envelope to the peer
    async fn publish(&self, envelope: Envelope) -> Result<(), TransportError>;

    /// Ask the peer to start delivering live commands and events
    ///
    /// Resolves once the peer acknowledged the subscription.
    async fn subscribe(&self) -> Result<(), TransportError>;

    /// Ask the peer to stop delivering live commands and events
    async fn unsubscribe(&self) -> Result<(), TransportError>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}
