//! Live message dispatcher
//!
//! Forwards commands to subscribed clients, routes the first response for
//! each command back to its origin and fans out events.

use crate::session::{SessionHandle, SessionManager};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use things_live_shared::{
    envelope::Payload, now_ms, CommandResponse, CommandType, Envelope, Heartbeat, LiveCommand,
    LiveEvent, SubscriptionAck,
};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// A forwarded command awaiting its first response
#[derive(Debug, Clone)]
pub struct PendingCommand {
    pub correlation_id: String,
    /// Client the response goes back to
    pub origin: String,
    pub cmd_type: CommandType,
    /// Clients the command was forwarded to; only they may answer it
    pub recipients: HashSet<String>,
    pub received_at: u64,
    pub expires_at: u64,
}

impl PendingCommand {
    /// Check if this command has expired (no response will be routed any more)
    pub fn is_expired(&self) -> bool {
        now_ms() > self.expires_at
    }
}

pub struct CommandDispatcher {
    broker_id: String,
    session_manager: Arc<SessionManager>,
    sequence_id: AtomicU64,
    started_at: Instant,
    command_max_age: Duration,
    /// Pending commands by correlation_id
    pending: RwLock<HashMap<String, PendingCommand>>,
}

impl CommandDispatcher {
    pub fn new(broker_id: impl Into<String>, session_manager: Arc<SessionManager>, command_max_age: Duration) -> Self {
        Self {
            broker_id: broker_id.into(),
            session_manager,
            sequence_id: AtomicU64::new(0),
            started_at: Instant::now(),
            command_max_age,
            pending: RwLock::new(HashMap::new()),
        }
    }

    pub fn next_sequence_id(&self) -> u64 {
        self.sequence_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn wrap(&self, payload: Payload) -> Envelope {
        Envelope::wrap(self.broker_id.as_str(), self.next_sequence_id(), payload)
    }

    /// Handle one envelope received from `session`
    pub async fn handle_envelope(&self, session: &SessionHandle, envelope: Envelope) {
        let from = session.client_id.as_str();

        match envelope.payload {
            Some(Payload::Command(cmd)) => {
                self.forward_command(from, cmd).await;
            }
            Some(Payload::Response(resp)) => {
                self.forward_response(from, resp).await;
            }
            Some(Payload::Event(evt)) => {
                self.broadcast_event(from, evt).await;
            }
            Some(Payload::Subscribe(sub)) => {
                session.set_subscribed(true);
                info!("{} subscribed for live messages", from);
                self.reply(session, Payload::SubscriptionAck(SubscriptionAck::accepted(sub.request_id, true)))
                    .await;
            }
            Some(Payload::Unsubscribe(unsub)) => {
                session.set_subscribed(false);
                info!("{} unsubscribed from live messages", from);
                self.reply(session, Payload::SubscriptionAck(SubscriptionAck::accepted(unsub.request_id, false)))
                    .await;
            }
            Some(Payload::Heartbeat(_)) => {
                let uptime_ms = self.started_at.elapsed().as_millis() as u64;
                self.reply(session, Payload::Heartbeat(Heartbeat::new(uptime_ms, session.is_subscribed())))
                    .await;
            }
            Some(Payload::SubscriptionAck(_)) => {
                debug!("Ignoring subscription ack from {}", from);
            }
            None => {
                debug!("Envelope without payload from {}", from);
            }
        }
    }

    async fn reply(&self, session: &SessionHandle, payload: Payload) {
        if let Err(e) = session.send(&self.wrap(payload)).await {
            warn!("Failed to reply to {}: {}", session.client_id, e);
        }
    }

    /// Record `command` and forward it to every other subscribed client
    pub async fn forward_command(&self, origin: &str, command: LiveCommand) -> usize {
        let cmd_type = CommandType::try_from(command.cmd_type).unwrap_or(CommandType::CmdUnknown);

        if command.correlation_id.is_empty() {
            warn!("Dropping {} command from {} without correlation id", cmd_type.label(), origin);
            return 0;
        }
        if command.is_expired() {
            debug!("Dropping expired command {} from {}", command.correlation_id, origin);
            return 0;
        }

        let received_at = now_ms();
        let expires_at = if command.expires_at_ms > 0 {
            command.expires_at_ms
        } else {
            received_at + self.command_max_age.as_millis() as u64
        };

        let targets = self.session_manager.subscribed_except(origin).await;
        {
            let mut pending = self.pending.write().await;
            if pending.contains_key(&command.correlation_id) {
                warn!("Duplicate command {} from {}, dropped", command.correlation_id, origin);
                return 0;
            }
            if !targets.is_empty() {
                pending.insert(
                    command.correlation_id.clone(),
                    PendingCommand {
                        correlation_id: command.correlation_id.clone(),
                        origin: origin.to_string(),
                        cmd_type,
                        recipients: targets.iter().map(|h| h.client_id.clone()).collect(),
                        received_at,
                        expires_at,
                    },
                );
            }
        }

        let correlation_id = command.correlation_id.clone();
        let envelope = self.wrap(Payload::Command(command));
        let delivered = SessionManager::send_each(targets, &envelope).await;

        if delivered == 0 {
            self.pending.write().await.remove(&correlation_id);
            warn!(
                "No subscriber for {} command {} from {}",
                cmd_type.label(),
                correlation_id,
                origin
            );
        } else {
            info!(
                ">>> Forwarded {} command {} from {} to {} client(s)",
                cmd_type.label(),
                correlation_id,
                origin,
                delivered
            );
        }
        delivered
    }

    /// Route the first response for a pending command back to its origin
    ///
    /// Only a client the command was forwarded to can answer it.
    pub async fn forward_response(&self, from: &str, response: CommandResponse) -> bool {
        let pending = {
            let mut table = self.pending.write().await;
            match table.get(&response.correlation_id) {
                Some(p) if !p.recipients.contains(from) => {
                    warn!(
                        "<<< Response {} from {} ignored, command was not forwarded there",
                        response.correlation_id, from
                    );
                    return false;
                }
                Some(_) => table.remove(&response.correlation_id),
                None => None,
            }
        };
        let Some(pending) = pending else {
            debug!(
                "<<< Response {} from {} has no pending command (late or duplicate)",
                response.correlation_id, from
            );
            return false;
        };

        info!(
            "<<< Response {} ({}) from {} to {} after {}ms",
            response.correlation_id,
            response.status,
            from,
            pending.origin,
            now_ms().saturating_sub(pending.received_at)
        );

        let envelope = self.wrap(Payload::Response(response));
        match self.session_manager.send_to(&pending.origin, &envelope).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to return response to {}: {}", pending.origin, e);
                false
            }
        }
    }

    /// Fan an event out to every other subscribed client
    pub async fn broadcast_event(&self, from: &str, event: LiveEvent) -> usize {
        let envelope = self.wrap(Payload::Event(event));
        let delivered = self.session_manager.broadcast_subscribed(from, &envelope).await;
        debug!("Event from {} delivered to {} client(s)", from, delivered);
        delivered
    }

    /// Remove expired commands
    pub async fn cleanup_expired(&self) -> Vec<String> {
        let mut pending = self.pending.write().await;
        let expired: Vec<String> = pending
            .iter()
            .filter(|(_, c)| c.is_expired())
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            if let Some(cmd) = pending.remove(id) {
                debug!(
                    "Command {} ({}) from {} expired and removed",
                    cmd.correlation_id,
                    cmd.cmd_type.label(),
                    cmd.origin
                );
            }
        }

        expired
    }

    /// Forget commands whose origin has gone away
    pub async fn drop_origin(&self, client_id: &str) -> usize {
        let mut pending = self.pending.write().await;
        let before = pending.len();
        pending.retain(|_, c| c.origin != client_id);
        before - pending.len()
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.read().await.len()
    }
}
