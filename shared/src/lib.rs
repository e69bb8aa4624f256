//! Things Live Shared Protocol Types
//!
//! This crate provides the wire messages and the frame codec used between
//! live clients and the live broker.

pub mod codec;
pub mod proto;

use std::time::{SystemTime, UNIX_EPOCH};

// Re-export commonly used types at crate root
pub use proto::*;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Live channel timing and sizing parameters
pub mod live {
    /// Heartbeat interval in milliseconds
    pub const HEARTBEAT_INTERVAL_MS: u64 = 1000;

    /// Heartbeat timeout - the broker drops sessions silent for this long
    pub const HEARTBEAT_TIMEOUT_MS: u64 = 10000;

    /// Default time a caller waits for a command response
    pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 10000;

    /// Time to wait for the broker to acknowledge subscribe/unsubscribe
    pub const SUBSCRIPTION_ACK_TIMEOUT_MS: u64 = 5000;

    /// Maximum age of a forwarded command before the broker forgets its origin
    pub const COMMAND_MAX_AGE_MS: u64 = 30000;

    /// Default number of handlers allowed to run at the same time
    pub const DEFAULT_WORKER_POOL_SIZE: usize = 8;

    /// Number of settled correlation ids remembered for late-arrival checks
    pub const SETTLED_HISTORY_CAPACITY: usize = 1024;
}

/// Response status codes (HTTP semantics)
pub mod status {
    pub const OK: u32 = 200;
    pub const CREATED: u32 = 201;
    pub const NO_CONTENT: u32 = 204;
    pub const BAD_REQUEST: u32 = 400;
    pub const NOT_FOUND: u32 = 404;
    pub const HANDLER_ERROR: u32 = 500;

    /// Error code attached to responses synthesized for failing handlers
    pub const HANDLER_ERROR_CODE: &str = "live.handler.error";

    pub fn is_success(status: u32) -> bool {
        (200..300).contains(&status)
    }
}

impl Header {
    /// Create a new header with the given client ID and message type
    pub fn new(client_id: impl Into<String>, msg_type: MessageType, sequence_id: u64) -> Self {
        Self {
            client_id: client_id.into(),
            sequence_id,
            timestamp_ms: now_ms(),
            msg_type: msg_type.into(),
        }
    }
}

impl envelope::Payload {
    /// Message type matching this payload variant
    pub fn message_type(&self) -> MessageType {
        match self {
            envelope::Payload::Command(_) => MessageType::MsgCommand,
            envelope::Payload::Response(_) => MessageType::MsgResponse,
            envelope::Payload::Event(_) => MessageType::MsgEvent,
            envelope::Payload::Subscribe(_) => MessageType::MsgSubscribe,
            envelope::Payload::Unsubscribe(_) => MessageType::MsgUnsubscribe,
            envelope::Payload::SubscriptionAck(_) => MessageType::MsgSubscriptionAck,
            envelope::Payload::Heartbeat(_) => MessageType::MsgHeartbeat,
        }
    }
}

impl Envelope {
    /// Wrap a payload with a header stamped for the sending client
    pub fn wrap(client_id: impl Into<String>, sequence_id: u64, payload: envelope::Payload) -> Self {
        Self {
            header: Some(Header::new(client_id, payload.message_type(), sequence_id)),
            payload: Some(payload),
        }
    }

    /// Client ID of the sender, empty if the header is missing
    pub fn client_id(&self) -> &str {
        self.header
            .as_ref()
            .map(|h| h.client_id.as_str())
            .unwrap_or_default()
    }
}

impl Heartbeat {
    /// Create a new heartbeat message
    pub fn new(uptime_ms: u64, subscribed: bool) -> Self {
        Self {
            uptime_ms,
            subscribed,
        }
    }
}

impl SubscriptionAck {
    pub fn accepted(request_id: impl Into<String>, active: bool) -> Self {
        Self {
            request_id: request_id.into(),
            active,
            message: String::new(),
        }
    }
}

impl LiveCommand {
    /// Check if this command has expired
    pub fn is_expired(&self) -> bool {
        if self.expires_at_ms == 0 {
            return false; // No expiry set
        }
        now_ms() > self.expires_at_ms
    }
}

impl CommandType {
    /// Whether commands of this type address a feature rather than the entity
    pub fn is_feature_scoped(&self) -> bool {
        matches!(
            self,
            CommandType::CmdModifyFeature
                | CommandType::CmdDeleteFeature
                | CommandType::CmdModifyFeatureProperty
                | CommandType::CmdDeleteFeatureProperty
                | CommandType::CmdRetrieveFeatureProperty
        )
    }

    /// Short name used in logs, e.g. `modifyFeatureProperty`
    pub fn label(&self) -> &'static str {
        match self {
            CommandType::CmdUnknown => "unknown",
            CommandType::CmdCreateThing => "createThing",
            CommandType::CmdModifyThing => "modifyThing",
            CommandType::CmdDeleteThing => "deleteThing",
            CommandType::CmdRetrieveThing => "retrieveThing",
            CommandType::CmdModifyAttribute => "modifyAttribute",
            CommandType::CmdDeleteAttribute => "deleteAttribute",
            CommandType::CmdModifyFeature => "modifyFeature",
            CommandType::CmdDeleteFeature => "deleteFeature",
            CommandType::CmdModifyFeatureProperty => "modifyFeatureProperty",
            CommandType::CmdDeleteFeatureProperty => "deleteFeatureProperty",
            CommandType::CmdRetrieveFeatureProperty => "retrieveFeatureProperty",
        }
    }
}
