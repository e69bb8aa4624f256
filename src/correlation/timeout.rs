//! Background expiry of requests nobody is waiting on

use super::tracker::CorrelationTracker;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::debug;

/// Periodically times out overdue requests
///
/// `ResponseHandle::wait` enforces its own deadline; the sweeper covers
/// handles that were dropped or are never awaited.
pub struct TimeoutSweeper {
    tracker: Arc<CorrelationTracker>,
    check_interval: Duration,
}

impl TimeoutSweeper {
    pub fn new(tracker: Arc<CorrelationTracker>, check_interval: Duration) -> Self {
        Self {
            tracker,
            check_interval,
        }
    }

    /// Run the sweep loop; never returns, abort the task to stop it
    pub async fn run(&self) {
        let mut ticker = interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let expired = self.tracker.expire_overdue().await;
            if !expired.is_empty() {
                debug!("Swept {} overdue request(s)", expired.len());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use crate::correlation::RequestState;
    use crate::transport::{MemoryTransport, Outbox};
    use things_live_shared::CommandType;

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_expires_dropped_handles() {
        let (transport, _events, _peer) = MemoryTransport::pair();
        let outbox = Outbox::new("backend", Arc::new(transport));
        let tracker = Arc::new(CorrelationTracker::new(outbox, Duration::from_secs(1), 8));

        let handle = tracker
            .send(Command::new(CommandType::CmdRetrieveThing, "thing-1"), None)
            .await;
        let id = handle.correlation_id().to_string();
        drop(handle);

        let sweeper = TimeoutSweeper::new(tracker.clone(), Duration::from_millis(100));
        let task = tokio::spawn(async move { sweeper.run().await });

        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(tracker.state_of(&id).await, Some(RequestState::TimedOut));
        assert_eq!(tracker.pending_count().await, 0);
        task.abort();
    }
}
