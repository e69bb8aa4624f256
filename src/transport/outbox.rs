//! Header stamping for outbound envelopes

use super::traits::LiveTransport;
use crate::error::TransportError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use things_live_shared::{envelope::Payload, Envelope};

/// Wraps payloads into envelopes for one client and publishes them
///
/// Clones share the sequence counter, so every envelope a client sends gets a
/// unique, increasing sequence id.
#[derive(Clone)]
pub struct Outbox {
    client_id: Arc<str>,
    sequence_id: Arc<AtomicU64>,
    transport: Arc<dyn LiveTransport>,
}

impl Outbox {
    pub fn new(client_id: impl Into<String>, transport: Arc<dyn LiveTransport>) -> Self {
        Self {
            client_id: Arc::from(client_id.into()),
            sequence_id: Arc::new(AtomicU64::new(0)),
            transport,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Get the next sequence ID
    pub fn next_sequence_id(&self) -> u64 {
        self.sequence_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub async fn send(&self, payload: Payload) -> Result<(), TransportError> {
        let envelope = Envelope::wrap(self.client_id.as_ref(), self.next_sequence_id(), payload);
        self.transport.publish(envelope).await
    }
}
