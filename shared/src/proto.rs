//! Live-channel wire messages
//!
//! Field tags are part of the wire contract between clients and the broker.
//! Add new fields with fresh tags; never renumber.

/// Kind of message carried by an [`Envelope`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum MessageType {
    MsgUnknown = 0,
    MsgCommand = 1,
    MsgResponse = 2,
    MsgEvent = 3,
    MsgSubscribe = 4,
    MsgUnsubscribe = 5,
    MsgSubscriptionAck = 6,
    MsgHeartbeat = 7,
}

/// Live command types understood by the live channel
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum CommandType {
    CmdUnknown = 0,
    CmdCreateThing = 1,
    CmdModifyThing = 2,
    CmdDeleteThing = 3,
    CmdRetrieveThing = 4,
    CmdModifyAttribute = 5,
    CmdDeleteAttribute = 6,
    CmdModifyFeature = 7,
    CmdDeleteFeature = 8,
    CmdModifyFeatureProperty = 9,
    CmdDeleteFeatureProperty = 10,
    CmdRetrieveFeatureProperty = 11,
}

/// Live event types published as side effects of commands
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum EventType {
    EvtUnknown = 0,
    EvtThingCreated = 1,
    EvtThingModified = 2,
    EvtThingDeleted = 3,
    EvtAttributeModified = 4,
    EvtAttributeDeleted = 5,
    EvtFeatureModified = 6,
    EvtFeatureDeleted = 7,
    EvtFeaturePropertyCreated = 8,
    EvtFeaturePropertyModified = 9,
    EvtFeaturePropertyDeleted = 10,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Header {
    #[prost(string, tag = "1")]
    pub client_id: String,
    #[prost(uint64, tag = "2")]
    pub sequence_id: u64,
    #[prost(uint64, tag = "3")]
    pub timestamp_ms: u64,
    #[prost(enumeration = "MessageType", tag = "4")]
    pub msg_type: i32,
}

/// A live command addressed to an entity (and optionally one of its features)
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LiveCommand {
    #[prost(string, tag = "1")]
    pub correlation_id: String,
    #[prost(enumeration = "CommandType", tag = "2")]
    pub cmd_type: i32,
    #[prost(string, tag = "3")]
    pub entity_id: String,
    /// Empty when the command targets the entity itself
    #[prost(string, tag = "4")]
    pub feature_id: String,
    #[prost(string, tag = "5")]
    pub pointer: String,
    /// JSON encoded value, empty when the command carries no value
    #[prost(string, tag = "6")]
    pub value_json: String,
    #[prost(string, tag = "7")]
    pub reply_to: String,
    #[prost(uint64, tag = "8")]
    pub expires_at_ms: u64,
}

/// Response to a [`LiveCommand`], matched by correlation id
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CommandResponse {
    #[prost(string, tag = "1")]
    pub correlation_id: String,
    #[prost(enumeration = "CommandType", tag = "2")]
    pub cmd_type: i32,
    #[prost(string, tag = "3")]
    pub entity_id: String,
    #[prost(string, tag = "4")]
    pub feature_id: String,
    #[prost(uint32, tag = "5")]
    pub status: u32,
    #[prost(string, tag = "6")]
    pub payload_json: String,
    #[prost(string, tag = "7")]
    pub error_code: String,
    #[prost(string, tag = "8")]
    pub message: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LiveEvent {
    #[prost(string, tag = "1")]
    pub correlation_id: String,
    #[prost(enumeration = "EventType", tag = "2")]
    pub event_type: i32,
    #[prost(string, tag = "3")]
    pub entity_id: String,
    #[prost(string, tag = "4")]
    pub feature_id: String,
    #[prost(string, tag = "5")]
    pub pointer: String,
    #[prost(string, tag = "6")]
    pub value_json: String,
    #[prost(uint64, tag = "7")]
    pub timestamp_ms: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Subscribe {
    #[prost(string, tag = "1")]
    pub request_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Unsubscribe {
    #[prost(string, tag = "1")]
    pub request_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubscriptionAck {
    #[prost(string, tag = "1")]
    pub request_id: String,
    /// Subscription state after the request was applied
    #[prost(bool, tag = "2")]
    pub active: bool,
    #[prost(string, tag = "3")]
    pub message: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Heartbeat {
    #[prost(uint64, tag = "1")]
    pub uptime_ms: u64,
    #[prost(bool, tag = "2")]
    pub subscribed: bool,
}

/// Top-level frame exchanged over every transport
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Envelope {
    #[prost(message, optional, tag = "1")]
    pub header: Option<Header>,
    #[prost(oneof = "envelope::Payload", tags = "2, 3, 4, 5, 6, 7, 8")]
    pub payload: Option<envelope::Payload>,
}

pub mod envelope {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "2")]
        Command(super::LiveCommand),
        #[prost(message, tag = "3")]
        Response(super::CommandResponse),
        #[prost(message, tag = "4")]
        Event(super::LiveEvent),
        #[prost(message, tag = "5")]
        Subscribe(super::Subscribe),
        #[prost(message, tag = "6")]
        Unsubscribe(super::Unsubscribe),
        #[prost(message, tag = "7")]
        SubscriptionAck(super::SubscriptionAck),
        #[prost(message, tag = "8")]
        Heartbeat(super::Heartbeat),
    }
}
