//! Correlation of outbound commands with their responses

use crate::command::{Command, Response};
use crate::error::LiveError;
use crate::transport::Outbox;
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use things_live_shared::envelope::Payload;
use tokio::sync::{oneshot, Mutex};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Lifecycle of one outbound request
///
/// Everything but `Pending` is terminal; the first transition wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Pending,
    Fulfilled,
    TimedOut,
    Failed,
    Cancelled,
}

type Completion = Result<Response, LiveError>;

/// A sent command waiting for its response
struct PendingRequest {
    /// Tells apart requests that reused the same correlation id
    serial: u64,
    timeout: Duration,
    deadline: Instant,
    slot: oneshot::Sender<Completion>,
}

struct Table {
    pending: HashMap<String, PendingRequest>,
    /// Terminal states of recently settled ids, for late-arrival diagnostics
    settled: LruCache<String, RequestState>,
}

/// Matches responses to outbound commands and enforces deadlines
pub struct CorrelationTracker {
    outbox: Outbox,
    default_timeout: Duration,
    next_serial: AtomicU64,
    table: Mutex<Table>,
}

impl CorrelationTracker {
    pub fn new(outbox: Outbox, default_timeout: Duration, history: usize) -> Self {
        let capacity = NonZeroUsize::new(history).unwrap_or(NonZeroUsize::MIN);
        Self {
            outbox,
            default_timeout,
            next_serial: AtomicU64::new(0),
            table: Mutex::new(Table {
                pending: HashMap::new(),
                settled: LruCache::new(capacity),
            }),
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Publish `command` and return a handle resolving to its response
    ///
    /// A correlation id is generated if the command has none. `timeout`
    /// falls back to the tracker's default.
    pub async fn send(self: &Arc<Self>, command: Command, timeout: Option<Duration>) -> ResponseHandle {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let correlation_id = if command.correlation_id().is_empty() {
            Uuid::new_v4().to_string()
        } else {
            command.correlation_id().to_string()
        };
        let command = command
            .with_correlation_id(correlation_id.clone())
            .with_reply_to(self.outbox.client_id());

        let (slot, rx) = oneshot::channel();
        let serial = self.next_serial.fetch_add(1, Ordering::SeqCst) + 1;
        let deadline = Instant::now() + timeout;
        {
            let mut table = self.table.lock().await;
            if let Some(prev) = table.pending.insert(
                correlation_id.clone(),
                PendingRequest {
                    serial,
                    timeout,
                    deadline,
                    slot,
                },
            ) {
                // Reused id: the older caller loses
                let _ = prev.slot.send(Err(LiveError::Cancelled(correlation_id.clone())));
            }
        }

        debug!(
            "Sending {} command {} to {} (timeout {:?})",
            command.command_type().label(),
            correlation_id,
            command.entity_id(),
            timeout
        );

        if let Err(e) = self.outbox.send(Payload::Command(command.to_wire())).await {
            warn!("Failed to send command {}: {}", correlation_id, e);
            self.settle(
                &correlation_id,
                Some(serial),
                RequestState::Failed,
                LiveError::TransportFailure(e.to_string()),
            )
            .await;
        }

        ResponseHandle {
            correlation_id,
            serial,
            deadline,
            timeout,
            rx,
            tracker: self.clone(),
        }
    }

    /// Fulfil the pending request matching `response`
    ///
    /// Returns false if the id is unknown or already settled; the response is dropped.
    pub async fn complete(&self, response: Response) -> bool {
        let id = response.correlation_id().to_string();
        let pending = {
            let mut table = self.table.lock().await;
            match table.pending.remove(&id) {
                Some(p) => {
                    table.settled.put(id.clone(), RequestState::Fulfilled);
                    Some(p)
                }
                None => {
                    let state = table.settled.peek(&id).copied();
                    drop(table);
                    match state {
                        Some(state) => debug!("Ignoring late response for {} (already {:?})", id, state),
                        None => warn!("Ignoring response for unknown correlation id {}", id),
                    }
                    None
                }
            }
        };

        match pending {
            Some(p) => {
                debug!("Response {} for {}", response.status(), id);
                let _ = p.slot.send(Ok(response));
                true
            }
            None => false,
        }
    }

    /// Time out `id` if it is still pending
    pub async fn expire(&self, id: &str) -> bool {
        self.expire_request(id, None).await
    }

    async fn expire_request(&self, id: &str, serial: Option<u64>) -> bool {
        let timeout = {
            let table = self.table.lock().await;
            match table.pending.get(id) {
                Some(p) if serial.map_or(true, |s| s == p.serial) => p.timeout,
                _ => return false,
            }
        };
        self.settle(
            id,
            serial,
            RequestState::TimedOut,
            LiveError::Timeout {
                correlation_id: id.to_string(),
                after: timeout,
            },
        )
        .await
    }

    /// Time out every pending request whose deadline has passed
    pub async fn expire_overdue(&self) -> Vec<String> {
        let now = Instant::now();
        let overdue: Vec<String> = {
            let table = self.table.lock().await;
            table
                .pending
                .iter()
                .filter(|(_, p)| p.deadline <= now)
                .map(|(id, _)| id.clone())
                .collect()
        };

        let mut expired = Vec::with_capacity(overdue.len());
        for id in overdue {
            if self.expire(&id).await {
                expired.push(id);
            }
        }
        expired
    }

    /// Release a pending request without waiting for its response
    pub async fn cancel(&self, id: &str) -> bool {
        self.settle(id, None, RequestState::Cancelled, LiveError::Cancelled(id.to_string()))
            .await
    }

    /// Fail every pending request, e.g. after the connection dropped
    pub async fn fail_all(&self, reason: &str) -> usize {
        let drained: Vec<(String, PendingRequest)> = {
            let mut table = self.table.lock().await;
            let drained: Vec<_> = table.pending.drain().collect();
            for (id, _) in &drained {
                table.settled.put(id.clone(), RequestState::Failed);
            }
            drained
        };

        let count = drained.len();
        for (_, p) in drained {
            let _ = p
                .slot
                .send(Err(LiveError::TransportFailure(reason.to_string())));
        }
        if count > 0 {
            warn!("Failed {} pending request(s): {}", count, reason);
        }
        count
    }

    pub async fn state_of(&self, id: &str) -> Option<RequestState> {
        let table = self.table.lock().await;
        if table.pending.contains_key(id) {
            return Some(RequestState::Pending);
        }
        table.settled.peek(id).copied()
    }

    pub async fn pending_count(&self) -> usize {
        self.table.lock().await.pending.len()
    }

    /// Move `id` from pending to `state`, handing `error` to the waiter
    ///
    /// With a `serial`, only the request that was sent under it is settled.
    async fn settle(&self, id: &str, serial: Option<u64>, state: RequestState, error: LiveError) -> bool {
        let pending = {
            let mut table = self.table.lock().await;
            match table.pending.get(id) {
                Some(p) if serial.map_or(true, |s| s == p.serial) => {}
                _ => return false,
            }
            let pending = table.pending.remove(id);
            if pending.is_some() {
                table.settled.put(id.to_string(), state);
            }
            pending
        };

        match pending {
            Some(p) => {
                debug!("Request {} -> {:?}", id, state);
                let _ = p.slot.send(Err(error));
                true
            }
            None => false,
        }
    }
}

/// Awaitable, cancellable handle for one outbound request
pub struct ResponseHandle {
    correlation_id: String,
    serial: u64,
    deadline: Instant,
    timeout: Duration,
    rx: oneshot::Receiver<Completion>,
    tracker: Arc<CorrelationTracker>,
}

impl ResponseHandle {
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Wait for the response, a timeout, or a transport failure
    pub async fn wait(mut self) -> Result<Response, LiveError> {
        match tokio::time::timeout_at(self.deadline, &mut self.rx).await {
            Ok(Ok(completion)) => completion,
            Ok(Err(_)) => Err(LiveError::Cancelled(self.correlation_id)),
            Err(_) => {
                // Either this expires the entry, or a settlement already raced in
                self.tracker
                    .expire_request(&self.correlation_id, Some(self.serial))
                    .await;
                match self.rx.await {
                    Ok(completion) => completion,
                    Err(_) => Err(LiveError::Timeout {
                        correlation_id: self.correlation_id,
                        after: self.timeout,
                    }),
                }
            }
        }
    }

    /// Give up on the response; a handler already running remotely is not stopped
    pub async fn cancel(self) -> bool {
        let id = self.correlation_id;
        self.tracker
            .settle(&id, Some(self.serial), RequestState::Cancelled, LiveError::Cancelled(id.clone()))
            .await
    }
}
