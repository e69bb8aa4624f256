//! Timeout tracking for pending commands and sessions

use super::dispatcher::CommandDispatcher;
use crate::session::SessionManager;
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

/// Expires unanswered commands and drops sessions whose heartbeat stopped
pub struct TimeoutTracker {
    dispatcher: Arc<CommandDispatcher>,
    sessions: Arc<SessionManager>,
    check_interval: Duration,
    heartbeat_timeout: Duration,
}

impl TimeoutTracker {
    pub fn new(
        dispatcher: Arc<CommandDispatcher>,
        sessions: Arc<SessionManager>,
        check_interval: Duration,
        heartbeat_timeout: Duration,
    ) -> Self {
        Self {
            dispatcher,
            sessions,
            check_interval,
            heartbeat_timeout,
        }
    }

    /// Start the timeout monitoring loop
    pub async fn run(&self) {
        let mut ticker = interval(self.check_interval);

        loop {
            ticker.tick().await;
            self.sweep().await;
        }
    }

    /// One pass over pending commands and sessions
    pub async fn sweep(&self) {
        let expired = self.dispatcher.cleanup_expired().await;
        if !expired.is_empty() {
            info!("Cleaned up {} expired commands", expired.len());
        }

        for client_id in self.sessions.remove_dead_sessions(self.heartbeat_timeout).await {
            let orphaned = self.dispatcher.drop_origin(&client_id).await;
            warn!(
                "Session {} timed out without heartbeat ({} pending commands dropped)",
                client_id, orphaned
            );
        }

        debug!(
            "{} sessions, {} pending commands",
            self.sessions.count().await,
            self.dispatcher.pending_count().await
        );
    }
}
