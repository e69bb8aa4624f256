//! Client configuration

use std::time::Duration;
use things_live_shared::live;

/// Configuration for a [`crate::LiveClient`]
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Client ID stamped on every envelope and used as reply-to address
    pub client_id: String,
    /// Response timeout for `send` calls that do not pass their own
    pub default_timeout: Duration,
    /// Maximum number of handlers running at the same time
    pub worker_pool_size: usize,
    /// Settled correlation ids remembered for late-response diagnostics
    pub settled_history: usize,
    /// How often abandoned requests are swept
    pub sweep_interval: Duration,
    /// Capacity of the inbound live event broadcast
    pub event_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_id: "things-live-client".into(),
            default_timeout: Duration::from_millis(live::DEFAULT_RESPONSE_TIMEOUT_MS),
            worker_pool_size: live::DEFAULT_WORKER_POOL_SIZE,
            settled_history: live::SETTLED_HISTORY_CAPACITY,
            sweep_interval: Duration::from_millis(500),
            event_buffer: 256,
        }
    }
}

impl ClientConfig {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Default::default()
        }
    }
}
