//! Broker configuration

use std::time::Duration;
use things_live_shared::live;

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Address the TCP listener binds to
    pub bind_addr: String,
    /// Client ID the broker stamps on envelopes it originates
    pub broker_id: String,
    /// Sessions silent for longer than this are dropped
    pub heartbeat_timeout: Duration,
    /// Forwarded commands without their own expiry are forgotten after this
    pub command_max_age: Duration,
    pub sweep_interval: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".into(),
            broker_id: "things-live-broker".into(),
            heartbeat_timeout: Duration::from_millis(live::HEARTBEAT_TIMEOUT_MS),
            command_max_age: Duration::from_millis(live::COMMAND_MAX_AGE_MS),
            sweep_interval: Duration::from_millis(1000),
        }
    }
}

impl BrokerConfig {
    /// Defaults, with the bind address overridable through `THINGS_LIVE_BIND`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(bind) = std::env::var("THINGS_LIVE_BIND") {
            config.bind_addr = bind;
        }
        config
    }
}
