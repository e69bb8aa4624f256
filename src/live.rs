//! Fluent per-thing and per-feature live handles

use crate::client::LiveClient;
use crate::command::{Command, HandlerKey, LiveCommandHandler, RegistrationHandle};
use crate::correlation::ResponseHandle;
use serde_json::Value;
use std::time::Duration;
use things_live_shared::CommandType;

/// Live operations scoped to one thing
#[derive(Clone)]
pub struct ThingLive {
    client: LiveClient,
    thing_id: String,
}

impl ThingLive {
    pub(crate) fn new(client: LiveClient, thing_id: String) -> Self {
        Self { client, thing_id }
    }

    pub fn thing_id(&self) -> &str {
        &self.thing_id
    }

    pub fn for_feature(&self, feature_id: impl Into<String>) -> FeatureLive {
        FeatureLive::new(self.client.clone(), self.thing_id.clone(), feature_id.into())
    }

    /// Handle `command_type` commands addressed to this thing, whatever feature they name
    pub async fn handle_commands<H: LiveCommandHandler>(
        &self,
        command_type: CommandType,
        handler: H,
    ) -> RegistrationHandle {
        let key = HandlerKey::for_entity(self.thing_id.clone(), command_type);
        self.client.register_handler(key, handler).await
    }

    pub async fn handle_modify_thing_commands<H: LiveCommandHandler>(&self, handler: H) -> RegistrationHandle {
        self.handle_commands(CommandType::CmdModifyThing, handler).await
    }

    pub async fn handle_delete_thing_commands<H: LiveCommandHandler>(&self, handler: H) -> RegistrationHandle {
        self.handle_commands(CommandType::CmdDeleteThing, handler).await
    }

    pub async fn handle_retrieve_thing_commands<H: LiveCommandHandler>(&self, handler: H) -> RegistrationHandle {
        self.handle_commands(CommandType::CmdRetrieveThing, handler).await
    }

    pub async fn handle_modify_attribute_commands<H: LiveCommandHandler>(
        &self,
        handler: H,
    ) -> RegistrationHandle {
        self.handle_commands(CommandType::CmdModifyAttribute, handler).await
    }

    pub async fn modify_attribute(&self, path: &str, value: Value) -> ResponseHandle {
        let command = Command::new(CommandType::CmdModifyAttribute, self.thing_id.clone())
            .with_pointer(path)
            .with_value(value);
        self.client.send(command, None).await
    }

    pub async fn delete_attribute(&self, path: &str) -> ResponseHandle {
        let command = Command::new(CommandType::CmdDeleteAttribute, self.thing_id.clone()).with_pointer(path);
        self.client.send(command, None).await
    }

    pub async fn retrieve(&self) -> ResponseHandle {
        let command = Command::new(CommandType::CmdRetrieveThing, self.thing_id.clone());
        self.client.send(command, None).await
    }
}

/// Live operations scoped to one feature of a thing
#[derive(Clone)]
pub struct FeatureLive {
    client: LiveClient,
    thing_id: String,
    feature_id: String,
}

impl FeatureLive {
    pub(crate) fn new(client: LiveClient, thing_id: String, feature_id: String) -> Self {
        Self {
            client,
            thing_id,
            feature_id,
        }
    }

    pub fn thing_id(&self) -> &str {
        &self.thing_id
    }

    pub fn feature_id(&self) -> &str {
        &self.feature_id
    }

    fn command(&self, command_type: CommandType) -> Command {
        Command::new(command_type, self.thing_id.clone()).with_feature(self.feature_id.clone())
    }

    pub async fn handle_commands<H: LiveCommandHandler>(
        &self,
        command_type: CommandType,
        handler: H,
    ) -> RegistrationHandle {
        let key = HandlerKey::for_feature(self.thing_id.clone(), self.feature_id.clone(), command_type);
        self.client.register_handler(key, handler).await
    }

    pub async fn handle_modify_feature_property_commands<H: LiveCommandHandler>(
        &self,
        handler: H,
    ) -> RegistrationHandle {
        self.handle_commands(CommandType::CmdModifyFeatureProperty, handler)
            .await
    }

    pub async fn handle_delete_feature_property_commands<H: LiveCommandHandler>(
        &self,
        handler: H,
    ) -> RegistrationHandle {
        self.handle_commands(CommandType::CmdDeleteFeatureProperty, handler)
            .await
    }

    pub async fn handle_retrieve_feature_property_commands<H: LiveCommandHandler>(
        &self,
        handler: H,
    ) -> RegistrationHandle {
        self.handle_commands(CommandType::CmdRetrieveFeatureProperty, handler)
            .await
    }

    pub async fn handle_modify_feature_commands<H: LiveCommandHandler>(
        &self,
        handler: H,
    ) -> RegistrationHandle {
        self.handle_commands(CommandType::CmdModifyFeature, handler).await
    }

    /// Ask the device to set `path` to `value`, using the client's default timeout
    pub async fn put_property(&self, path: &str, value: Value) -> ResponseHandle {
        self.put_property_with_timeout(path, value, None).await
    }

    pub async fn put_property_with_timeout(
        &self,
        path: &str,
        value: Value,
        timeout: Option<Duration>,
    ) -> ResponseHandle {
        let command = self
            .command(CommandType::CmdModifyFeatureProperty)
            .with_pointer(path)
            .with_value(value);
        self.client.send(command, timeout).await
    }

    pub async fn delete_property(&self, path: &str) -> ResponseHandle {
        let command = self.command(CommandType::CmdDeleteFeatureProperty).with_pointer(path);
        self.client.send(command, None).await
    }

    pub async fn retrieve_property(&self, path: &str) -> ResponseHandle {
        let command = self.command(CommandType::CmdRetrieveFeatureProperty).with_pointer(path);
        self.client.send(command, None).await
    }

    /// Replace the whole feature with `properties`
    pub async fn modify_feature(&self, properties: Value) -> ResponseHandle {
        let command = self.command(CommandType::CmdModifyFeature).with_value(properties);
        self.client.send(command, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, HandlerResult, ResponseFactory};
    use crate::config::ClientConfig;
    use crate::transport::MemoryTransport;
    use serde_json::json;
    use things_live_shared::envelope::Payload;

    #[tokio::test]
    async fn test_put_property_builds_feature_command() {
        let (transport, events, mut peer) = MemoryTransport::pair();
        let client = LiveClient::new(ClientConfig::new("backend"), transport, events);

        let handle = client
            .for_id("org.example:thing")
            .for_feature("temp-sensor")
            .put_property("temperature", json!(23.21))
            .await;

        let cmd = match peer.next_published().await.and_then(|e| e.payload) {
            Some(Payload::Command(cmd)) => cmd,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(cmd.correlation_id, handle.correlation_id());
        assert_eq!(cmd.cmd_type, CommandType::CmdModifyFeatureProperty as i32);
        assert_eq!(cmd.entity_id, "org.example:thing");
        assert_eq!(cmd.feature_id, "temp-sensor");
        assert_eq!(cmd.pointer, "/temperature");
        assert_eq!(cmd.reply_to, "backend");
        assert_eq!(cmd.value_json, "23.21");
    }

    #[tokio::test]
    async fn test_thing_and_feature_handlers_use_separate_keys() {
        let (transport, events, _peer) = MemoryTransport::pair();
        let client = LiveClient::new(ClientConfig::new("device"), transport, events);
        let thing = client.for_id("org.example:thing");

        let answer = |cmd: Command| -> HandlerResult {
            Ok(cmd.answer().with_response(ResponseFactory::modified).build())
        };
        let on_thing = thing.handle_modify_attribute_commands(answer).await;
        let on_feature = thing
            .for_feature("lamp")
            .handle_modify_feature_property_commands(answer)
            .await;

        assert_eq!(on_thing.key().feature_id, None);
        assert_eq!(on_feature.key().feature_id.as_deref(), Some("lamp"));
        assert!(client.unregister_handler(&on_thing).await);
        assert!(!client.unregister_handler(&on_thing).await);
    }
}
