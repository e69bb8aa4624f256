//! Session manager for tracking all connected clients

use super::connection::SessionHandle;
use std::collections::HashMap;
use std::time::Duration;
use things_live_shared::Envelope;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Manages all active client sessions
pub struct SessionManager {
    /// Map of client_id -> session handle
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a session; a reconnecting client replaces its old session
    pub async fn register(&self, handle: SessionHandle) {
        if handle.client_id.is_empty() {
            return; // Can't register without client ID
        }

        let mut sessions = self.sessions.write().await;
        if let Some(old) = sessions.insert(handle.client_id.clone(), handle) {
            info!("Client {} reconnected, replacing session from {}", old.client_id, old.addr);
        }
    }

    /// Unregister a session if it is still the current one for its client
    pub async fn unregister(&self, handle: &SessionHandle) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(&handle.client_id) {
            Some(current) if current.same_session(handle) => {
                sessions.remove(&handle.client_id);
                true
            }
            _ => false,
        }
    }

    pub async fn get(&self, client_id: &str) -> Option<SessionHandle> {
        self.sessions.read().await.get(client_id).cloned()
    }

    /// Send a message to a specific client
    pub async fn send_to(&self, client_id: &str, envelope: &Envelope) -> anyhow::Result<()> {
        let handle = self
            .get(client_id)
            .await
            .ok_or_else(|| anyhow::anyhow!("Client not connected: {}", client_id))?;
        handle.send(envelope).await
    }

    /// Subscribed sessions other than `except`
    pub async fn subscribed_except(&self, except: &str) -> Vec<SessionHandle> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|h| h.client_id != except && h.is_subscribed())
            .cloned()
            .collect()
    }

    /// Send to every subscribed client except `except`; returns the number reached
    pub async fn broadcast_subscribed(&self, except: &str, envelope: &Envelope) -> usize {
        Self::send_each(self.subscribed_except(except).await, envelope).await
    }

    /// Send to each of `targets`; returns the number reached
    pub async fn send_each(targets: Vec<SessionHandle>, envelope: &Envelope) -> usize {
        let mut delivered = 0;
        for handle in targets {
            match handle.send(envelope).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!("Failed to send to {}: {}", handle.client_id, e),
            }
        }
        delivered
    }

    /// Remove sessions whose heartbeat is older than `timeout` and return their IDs
    pub async fn remove_dead_sessions(&self, timeout: Duration) -> Vec<String> {
        let mut dead = Vec::new();
        for (id, handle) in self.sessions.read().await.iter() {
            if !handle.is_alive(timeout).await {
                dead.push(id.clone());
            }
        }

        if !dead.is_empty() {
            let mut sessions = self.sessions.write().await;
            for id in &dead {
                sessions.remove(id);
            }
        }
        dead
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
