//! Registry of live command handlers

use super::handler::LiveCommandHandler;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use things_live_shared::CommandType;
use tokio::sync::RwLock;
use tracing::debug;

/// Identifies one registration slot
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerKey {
    pub entity_id: String,
    /// `None` matches commands for any feature of the entity
    pub feature_id: Option<String>,
    pub command_type: CommandType,
}

impl HandlerKey {
    pub fn new(
        entity_id: impl Into<String>,
        feature_id: Option<String>,
        command_type: CommandType,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            feature_id,
            command_type,
        }
    }

    pub fn for_entity(entity_id: impl Into<String>, command_type: CommandType) -> Self {
        Self::new(entity_id, None, command_type)
    }

    pub fn for_feature(
        entity_id: impl Into<String>,
        feature_id: impl Into<String>,
        command_type: CommandType,
    ) -> Self {
        Self::new(entity_id, Some(feature_id.into()), command_type)
    }
}

impl fmt::Display for HandlerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.feature_id {
            Some(feature) => write!(
                f,
                "{}/{}:{}",
                self.entity_id,
                feature,
                self.command_type.label()
            ),
            None => write!(f, "{}/*:{}", self.entity_id, self.command_type.label()),
        }
    }
}

/// Returned by `register`; pass back to `unregister`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationHandle {
    id: u64,
    key: HandlerKey,
}

impl RegistrationHandle {
    pub fn key(&self) -> &HandlerKey {
        &self.key
    }
}

struct Registration {
    id: u64,
    handler: Arc<dyn LiveCommandHandler>,
}

/// Maps handler keys to the currently registered handler
pub struct CommandRegistry {
    next_id: AtomicU64,
    entries: RwLock<HashMap<HandlerKey, Registration>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Register `handler` for `key`, replacing any previous handler for the same key
    pub async fn register(
        &self,
        key: HandlerKey,
        handler: Arc<dyn LiveCommandHandler>,
    ) -> RegistrationHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let previous = self
            .entries
            .write()
            .await
            .insert(key.clone(), Registration { id, handler });

        if let Some(prev) = previous {
            debug!("Handler for {} replaced (registration {} -> {})", key, prev.id, id);
        } else {
            debug!("Handler registered for {} (registration {})", key, id);
        }

        RegistrationHandle { id, key }
    }

    /// Remove the registration behind `handle`
    ///
    /// Returns false if the slot is empty or was re-registered since.
    pub async fn unregister(&self, handle: &RegistrationHandle) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get(&handle.key) {
            Some(reg) if reg.id == handle.id => {
                entries.remove(&handle.key);
                debug!("Handler for {} unregistered", handle.key);
                true
            }
            _ => false,
        }
    }

    /// Resolve the handler for a command
    ///
    /// An exact entity+feature+type match wins over a feature-agnostic one.
    pub async fn lookup(
        &self,
        entity_id: &str,
        feature_id: Option<&str>,
        command_type: CommandType,
    ) -> Option<(HandlerKey, Arc<dyn LiveCommandHandler>)> {
        let entries = self.entries.read().await;

        if let Some(feature) = feature_id {
            let exact = HandlerKey::for_feature(entity_id, feature, command_type);
            if let Some(reg) = entries.get(&exact) {
                return Some((exact, reg.handler.clone()));
            }
        }

        let any_feature = HandlerKey::for_entity(entity_id, command_type);
        entries
            .get(&any_feature)
            .map(|reg| (any_feature, reg.handler.clone()))
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Answer, Command, HandlerResult};

    fn noop() -> Arc<dyn LiveCommandHandler> {
        Arc::new(|_cmd: Command| -> HandlerResult { Ok(Answer::none()) })
    }

    const THING: &str = "org.example:thing-1";

    #[tokio::test]
    async fn test_exact_match_wins_over_feature_agnostic() {
        let registry = CommandRegistry::new();
        let ty = CommandType::CmdModifyFeatureProperty;
        registry.register(HandlerKey::for_entity(THING, ty), noop()).await;
        registry
            .register(HandlerKey::for_feature(THING, "temp-sensor", ty), noop())
            .await;

        let (key, _) = registry.lookup(THING, Some("temp-sensor"), ty).await.unwrap();
        assert_eq!(key.feature_id.as_deref(), Some("temp-sensor"));

        let (key, _) = registry.lookup(THING, Some("humidity"), ty).await.unwrap();
        assert_eq!(key.feature_id, None);
    }

    #[tokio::test]
    async fn test_lookup_miss() {
        let registry = CommandRegistry::new();
        registry
            .register(
                HandlerKey::for_feature(THING, "temp-sensor", CommandType::CmdModifyFeatureProperty),
                noop(),
            )
            .await;

        assert!(registry
            .lookup(THING, Some("temp-sensor"), CommandType::CmdDeleteFeatureProperty)
            .await
            .is_none());
        assert!(registry
            .lookup("other", Some("temp-sensor"), CommandType::CmdModifyFeatureProperty)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_reregistration_replaces_and_stale_handle_is_ignored() {
        let registry = CommandRegistry::new();
        let key = HandlerKey::for_entity(THING, CommandType::CmdModifyThing);

        let first = registry.register(key.clone(), noop()).await;
        let second = registry.register(key.clone(), noop()).await;
        assert_eq!(registry.len().await, 1);

        assert!(!registry.unregister(&first).await);
        assert_eq!(registry.len().await, 1);

        assert!(registry.unregister(&second).await);
        assert!(registry.is_empty().await);
    }

    #[test]
    fn test_key_display() {
        let key = HandlerKey::for_feature(THING, "temp-sensor", CommandType::CmdModifyFeatureProperty);
        assert_eq!(key.to_string(), "org.example:thing-1/temp-sensor:modifyFeatureProperty");
    }
}
