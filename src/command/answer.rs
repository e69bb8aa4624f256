//! Declarative handler answers
//!
//! A handler returns an [`Answer`] describing what the router should emit:
//!
//! ```ignore
//! command
//!     .answer()
//!     .with_response(ResponseFactory::modified)
//!     .with_event(EventFactory::modified)
//! ```

use super::model::{Command, Event, Response};
use serde_json::Value;
use things_live_shared::{status, CommandType, EventType};

/// What the router emits for one handled command
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Answer {
    response: Option<Response>,
    event: Option<Event>,
}

impl Answer {
    /// Answer that emits nothing
    pub fn none() -> Self {
        Self::default()
    }

    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    pub fn event(&self) -> Option<&Event> {
        self.event.as_ref()
    }

    pub fn into_parts(self) -> (Option<Response>, Option<Event>) {
        (self.response, self.event)
    }
}

/// Builds an [`Answer`] for one command
pub struct AnswerBuilder {
    command: Command,
    response: Option<Response>,
    event: Option<Event>,
}

impl AnswerBuilder {
    pub(crate) fn new(command: Command) -> Self {
        Self {
            command,
            response: None,
            event: None,
        }
    }

    pub fn with_response<F>(mut self, build: F) -> Self
    where
        F: FnOnce(&ResponseFactory) -> Response,
    {
        self.response = Some(build(&ResponseFactory {
            command: self.command.clone(),
        }));
        self
    }

    pub fn with_event<F>(mut self, build: F) -> Self
    where
        F: FnOnce(&EventFactory) -> Event,
    {
        self.event = Some(build(&EventFactory {
            command: self.command.clone(),
        }));
        self
    }

    pub fn build(self) -> Answer {
        Answer {
            response: self.response,
            event: self.event,
        }
    }
}

impl From<AnswerBuilder> for Answer {
    fn from(builder: AnswerBuilder) -> Self {
        builder.build()
    }
}

/// Creates responses bound to the command being answered
pub struct ResponseFactory {
    command: Command,
}

impl ResponseFactory {
    pub fn modified(&self) -> Response {
        Response::for_command(&self.command, status::NO_CONTENT)
    }

    /// Created response echoing the command's value
    pub fn created(&self) -> Response {
        let resp = Response::for_command(&self.command, status::CREATED);
        match self.command.property_value() {
            Some(v) => resp.with_payload(v.clone()),
            None => resp,
        }
    }

    pub fn retrieved(&self, value: Value) -> Response {
        Response::for_command(&self.command, status::OK).with_payload(value)
    }

    pub fn deleted(&self) -> Response {
        Response::for_command(&self.command, status::NO_CONTENT)
    }

    pub fn not_found(&self, message: impl Into<String>) -> Response {
        Response::for_command(&self.command, status::NOT_FOUND)
            .with_error("live.entity.notfound", message)
    }

    pub fn error(&self, status: u32, message: impl Into<String>) -> Response {
        Response::for_command(&self.command, status).with_error("live.command.failed", message)
    }
}

/// Creates events bound to the command being answered
pub struct EventFactory {
    command: Command,
}

impl EventFactory {
    pub fn modified(&self) -> Event {
        Event::for_command(&self.command, modified_event(self.command.command_type()))
    }

    pub fn created(&self) -> Event {
        Event::for_command(&self.command, created_event(self.command.command_type()))
    }

    pub fn deleted(&self) -> Event {
        Event::for_command(&self.command, deleted_event(self.command.command_type()))
    }
}

fn modified_event(cmd: CommandType) -> EventType {
    match cmd {
        CommandType::CmdModifyThing => EventType::EvtThingModified,
        CommandType::CmdModifyAttribute => EventType::EvtAttributeModified,
        CommandType::CmdModifyFeature => EventType::EvtFeatureModified,
        CommandType::CmdModifyFeatureProperty => EventType::EvtFeaturePropertyModified,
        other => deleted_event(other),
    }
}

fn created_event(cmd: CommandType) -> EventType {
    match cmd {
        CommandType::CmdCreateThing => EventType::EvtThingCreated,
        CommandType::CmdModifyFeatureProperty => EventType::EvtFeaturePropertyCreated,
        other => modified_event(other),
    }
}

fn deleted_event(cmd: CommandType) -> EventType {
    match cmd {
        CommandType::CmdDeleteThing => EventType::EvtThingDeleted,
        CommandType::CmdDeleteAttribute => EventType::EvtAttributeDeleted,
        CommandType::CmdDeleteFeature => EventType::EvtFeatureDeleted,
        CommandType::CmdDeleteFeatureProperty => EventType::EvtFeaturePropertyDeleted,
        _ => EventType::EvtUnknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn put_temperature() -> Command {
        Command::new(CommandType::CmdModifyFeatureProperty, "org.example:thing-1")
            .with_feature("temp-sensor")
            .with_pointer("temperature")
            .with_value(json!(23.21))
            .with_correlation_id("c-7")
    }

    #[test]
    fn test_modified_answer_has_response_and_event() {
        let answer = put_temperature()
            .answer()
            .with_response(ResponseFactory::modified)
            .with_event(EventFactory::modified)
            .build();

        let resp = answer.response().expect("response");
        assert_eq!(resp.status(), status::NO_CONTENT);
        assert_eq!(resp.correlation_id(), "c-7");

        let event = answer.event().expect("event");
        assert_eq!(event.event_type(), EventType::EvtFeaturePropertyModified);
        assert_eq!(event.pointer(), "/temperature");
        assert_eq!(event.value(), Some(&json!(23.21)));
    }

    #[test]
    fn test_response_without_event() {
        let answer: Answer = put_temperature()
            .answer()
            .with_response(|f| f.retrieved(json!({"temperature": 23.21})))
            .into();
        assert!(answer.event().is_none());
        assert_eq!(answer.response().unwrap().status(), status::OK);
    }

    #[test]
    fn test_event_type_mapping_for_deletes() {
        let cmd = Command::new(CommandType::CmdDeleteFeature, "t").with_feature("f");
        let answer = cmd.answer().with_event(EventFactory::deleted).build();
        assert_eq!(
            answer.event().unwrap().event_type(),
            EventType::EvtFeatureDeleted
        );
        assert!(answer.response().is_none());
    }
}
