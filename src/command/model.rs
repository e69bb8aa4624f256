//! Live command, response and event values
//!
//! These are the decoded, validated forms of the wire messages. They are
//! immutable once built; the `with_*` methods consume and return `self`.

use crate::command::answer::AnswerBuilder;
use crate::error::CommandError;
use serde_json::Value;
use things_live_shared::{
    now_ms, status, CommandResponse, CommandType, EventType, LiveCommand, LiveEvent,
};

/// Normalize a property path into a JSON pointer (`temperature` -> `/temperature`)
pub(crate) fn to_pointer(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn parse_json(raw: &str) -> Result<Option<Value>, CommandError> {
    if raw.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(raw)
        .map(Some)
        .map_err(|e| CommandError::InvalidValue(e.to_string()))
}

fn render_json(value: &Option<Value>) -> String {
    value.as_ref().map(Value::to_string).unwrap_or_default()
}

/// An inbound or outbound live command
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    correlation_id: String,
    command_type: CommandType,
    entity_id: String,
    feature_id: Option<String>,
    pointer: String,
    value: Option<Value>,
    reply_to: String,
    expires_at_ms: u64,
}

impl Command {
    pub fn new(command_type: CommandType, entity_id: impl Into<String>) -> Self {
        Self {
            correlation_id: String::new(),
            command_type,
            entity_id: entity_id.into(),
            feature_id: None,
            pointer: "/".into(),
            value: None,
            reply_to: String::new(),
            expires_at_ms: 0,
        }
    }

    pub fn with_feature(mut self, feature_id: impl Into<String>) -> Self {
        self.feature_id = Some(feature_id.into());
        self
    }

    pub fn with_pointer(mut self, path: &str) -> Self {
        self.pointer = to_pointer(path);
        self
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    pub fn with_reply_to(mut self, client_id: impl Into<String>) -> Self {
        self.reply_to = client_id.into();
        self
    }

    pub fn with_expiry(mut self, expires_at_ms: u64) -> Self {
        self.expires_at_ms = expires_at_ms;
        self
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn command_type(&self) -> CommandType {
        self.command_type
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn feature_id(&self) -> Option<&str> {
        self.feature_id.as_deref()
    }

    pub fn property_pointer(&self) -> &str {
        &self.pointer
    }

    pub fn property_value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn reply_to(&self) -> &str {
        &self.reply_to
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at_ms > 0 && now_ms() > self.expires_at_ms
    }

    /// Start building the answer a handler returns for this command
    pub fn answer(&self) -> AnswerBuilder {
        AnswerBuilder::new(self.clone())
    }

    pub fn to_wire(&self) -> LiveCommand {
        LiveCommand {
            correlation_id: self.correlation_id.clone(),
            cmd_type: self.command_type.into(),
            entity_id: self.entity_id.clone(),
            feature_id: self.feature_id.clone().unwrap_or_default(),
            pointer: self.pointer.clone(),
            value_json: render_json(&self.value),
            reply_to: self.reply_to.clone(),
            expires_at_ms: self.expires_at_ms,
        }
    }
}

impl TryFrom<LiveCommand> for Command {
    type Error = CommandError;

    fn try_from(wire: LiveCommand) -> Result<Self, Self::Error> {
        let command_type = match CommandType::try_from(wire.cmd_type) {
            Ok(CommandType::CmdUnknown) | Err(_) => {
                return Err(CommandError::UnknownType(wire.cmd_type))
            }
            Ok(t) => t,
        };
        if wire.entity_id.is_empty() {
            return Err(CommandError::MissingEntity);
        }
        if command_type.is_feature_scoped() && wire.feature_id.is_empty() {
            return Err(CommandError::MissingFeature(command_type.label()));
        }

        Ok(Self {
            value: parse_json(&wire.value_json)?,
            correlation_id: wire.correlation_id,
            command_type,
            entity_id: wire.entity_id,
            feature_id: non_empty(wire.feature_id),
            pointer: if wire.pointer.is_empty() {
                "/".into()
            } else {
                to_pointer(&wire.pointer)
            },
            reply_to: wire.reply_to,
            expires_at_ms: wire.expires_at_ms,
        })
    }
}

/// Response to a live command
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    correlation_id: String,
    command_type: CommandType,
    entity_id: String,
    feature_id: Option<String>,
    status: u32,
    payload: Option<Value>,
    error_code: Option<String>,
    message: String,
}

impl Response {
    /// Response addressed to the requester of `command`
    pub fn for_command(command: &Command, status: u32) -> Self {
        Self {
            correlation_id: command.correlation_id.clone(),
            command_type: command.command_type,
            entity_id: command.entity_id.clone(),
            feature_id: command.feature_id.clone(),
            status,
            payload: None,
            error_code: None,
            message: String::new(),
        }
    }

    /// Error response used when a handler fails
    pub fn handler_error(command: &Command, message: impl Into<String>) -> Self {
        Self {
            error_code: Some(status::HANDLER_ERROR_CODE.into()),
            message: message.into(),
            ..Self::for_command(command, status::HANDLER_ERROR)
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_error(mut self, error_code: impl Into<String>, message: impl Into<String>) -> Self {
        self.error_code = Some(error_code.into());
        self.message = message.into();
        self
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn command_type(&self) -> CommandType {
        self.command_type
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn feature_id(&self) -> Option<&str> {
        self.feature_id.as_deref()
    }

    pub fn status(&self) -> u32 {
        self.status
    }

    pub fn is_success(&self) -> bool {
        status::is_success(self.status)
    }

    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    pub fn error_code(&self) -> Option<&str> {
        self.error_code.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn to_wire(&self) -> CommandResponse {
        CommandResponse {
            correlation_id: self.correlation_id.clone(),
            cmd_type: self.command_type.into(),
            entity_id: self.entity_id.clone(),
            feature_id: self.feature_id.clone().unwrap_or_default(),
            status: self.status,
            payload_json: render_json(&self.payload),
            error_code: self.error_code.clone().unwrap_or_default(),
            message: self.message.clone(),
        }
    }
}

impl TryFrom<CommandResponse> for Response {
    type Error = CommandError;

    fn try_from(wire: CommandResponse) -> Result<Self, Self::Error> {
        Ok(Self {
            payload: parse_json(&wire.payload_json)?,
            correlation_id: wire.correlation_id,
            command_type: CommandType::try_from(wire.cmd_type).unwrap_or(CommandType::CmdUnknown),
            entity_id: wire.entity_id,
            feature_id: non_empty(wire.feature_id),
            status: wire.status,
            error_code: non_empty(wire.error_code),
            message: wire.message,
        })
    }
}

/// Event published as a side effect of a handled command
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    correlation_id: String,
    event_type: EventType,
    entity_id: String,
    feature_id: Option<String>,
    pointer: String,
    value: Option<Value>,
    timestamp_ms: u64,
}

impl Event {
    /// Event describing the effect of `command`, carrying its pointer and value
    pub fn for_command(command: &Command, event_type: EventType) -> Self {
        Self {
            correlation_id: command.correlation_id.clone(),
            event_type,
            entity_id: command.entity_id.clone(),
            feature_id: command.feature_id.clone(),
            pointer: command.pointer.clone(),
            value: command.value.clone(),
            timestamp_ms: now_ms(),
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn feature_id(&self) -> Option<&str> {
        self.feature_id.as_deref()
    }

    pub fn pointer(&self) -> &str {
        &self.pointer
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    pub fn to_wire(&self) -> LiveEvent {
        LiveEvent {
            correlation_id: self.correlation_id.clone(),
            event_type: self.event_type.into(),
            entity_id: self.entity_id.clone(),
            feature_id: self.feature_id.clone().unwrap_or_default(),
            pointer: self.pointer.clone(),
            value_json: render_json(&self.value),
            timestamp_ms: self.timestamp_ms,
        }
    }
}

impl TryFrom<LiveEvent> for Event {
    type Error = CommandError;

    fn try_from(wire: LiveEvent) -> Result<Self, Self::Error> {
        Ok(Self {
            value: parse_json(&wire.value_json)?,
            correlation_id: wire.correlation_id,
            event_type: EventType::try_from(wire.event_type).unwrap_or(EventType::EvtUnknown),
            entity_id: wire.entity_id,
            feature_id: non_empty(wire.feature_id),
            pointer: wire.pointer,
            timestamp_ms: wire.timestamp_ms,
        })
    }
}
