//! Command router - resolves handlers and turns their answers into messages
//!
//! Each handler key gets a lane: a FIFO drained by one task, so commands for
//! the same key are handled in arrival order. Lanes run independently and
//! share a bounded pool of worker permits; the handler itself runs on the
//! blocking pool so a slow handler never stalls inbound delivery.

use super::handler::LiveCommandHandler;
use super::model::{Command, Response};
use super::registry::{CommandRegistry, HandlerKey};
use super::answer::Answer;
use crate::error::LiveError;
use crate::transport::Outbox;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use things_live_shared::envelope::Payload;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What `route` did with a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Queued on the lane of the matching registration
    Dispatched(HandlerKey),
    /// No registration matched; the command was dropped
    NoHandler,
    /// The command's expiry passed before it could be routed
    Expired,
    /// The router was drained and has not been reopened
    Closed,
}

/// Router counters
#[derive(Debug, Default)]
pub struct RouterStats {
    routed: AtomicU64,
    no_handler: AtomicU64,
    expired: AtomicU64,
    handler_errors: AtomicU64,
    responses_sent: AtomicU64,
    events_sent: AtomicU64,
}

/// Point-in-time copy of [`RouterStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStatsSnapshot {
    pub routed: u64,
    pub no_handler: u64,
    pub expired: u64,
    pub handler_errors: u64,
    pub responses_sent: u64,
    pub events_sent: u64,
}

impl RouterStats {
    pub fn snapshot(&self) -> RouterStatsSnapshot {
        RouterStatsSnapshot {
            routed: self.routed.load(Ordering::SeqCst),
            no_handler: self.no_handler.load(Ordering::SeqCst),
            expired: self.expired.load(Ordering::SeqCst),
            handler_errors: self.handler_errors.load(Ordering::SeqCst),
            responses_sent: self.responses_sent.load(Ordering::SeqCst),
            events_sent: self.events_sent.load(Ordering::SeqCst),
        }
    }
}

struct Job {
    command: Command,
    handler: Arc<dyn LiveCommandHandler>,
}

struct Lane {
    tx: mpsc::UnboundedSender<Job>,
    task: JoinHandle<()>,
}

/// Lane bookkeeping, guarded by one lock so routing and draining never interleave
struct LaneTable {
    active: HashMap<HandlerKey, Lane>,
    /// Released lanes that may still be working through their backlog
    retired: HashMap<HandlerKey, JoinHandle<()>>,
    /// Set by `drain`; commands routed while closed are dropped
    closed: bool,
}

/// Routes inbound live commands to registered handlers
pub struct CommandRouter {
    registry: Arc<CommandRegistry>,
    outbox: Outbox,
    workers: Arc<Semaphore>,
    lanes: Mutex<LaneTable>,
    stats: Arc<RouterStats>,
}

impl CommandRouter {
    /// Create a router allowing at most `worker_pool_size` concurrent handlers
    pub fn new(registry: Arc<CommandRegistry>, outbox: Outbox, worker_pool_size: usize) -> Self {
        Self {
            registry,
            outbox,
            workers: Arc::new(Semaphore::new(worker_pool_size.max(1))),
            lanes: Mutex::new(LaneTable {
                active: HashMap::new(),
                retired: HashMap::new(),
                closed: false,
            }),
            stats: Arc::new(RouterStats::default()),
        }
    }

    pub fn stats(&self) -> RouterStatsSnapshot {
        self.stats.snapshot()
    }

    /// Route one inbound command
    ///
    /// Returns once the command is queued; the handler runs on a worker.
    pub async fn route(&self, command: Command) -> RouteOutcome {
        if command.is_expired() {
            self.stats.expired.fetch_add(1, Ordering::SeqCst);
            debug!(
                "Dropping expired {} command {}",
                command.command_type().label(),
                command.correlation_id()
            );
            return RouteOutcome::Expired;
        }

        let resolved = self
            .registry
            .lookup(
                command.entity_id(),
                command.feature_id(),
                command.command_type(),
            )
            .await;

        let (key, handler) = match resolved {
            Some(found) => found,
            None => {
                self.stats.no_handler.fetch_add(1, Ordering::SeqCst);
                let err = LiveError::NoHandlerFound(format!(
                    "{} command on {}/{}",
                    command.command_type().label(),
                    command.entity_id(),
                    command.feature_id().unwrap_or("-")
                ));
                warn!("{} (correlation {}), dropping", err, command.correlation_id());
                return RouteOutcome::NoHandler;
            }
        };

        let mut job = Job { command, handler };
        let mut guard = self.lanes.lock().await;
        let table = &mut *guard;
        if table.closed {
            debug!(
                "Router closed, dropping command {}",
                job.command.correlation_id()
            );
            return RouteOutcome::Closed;
        }

        loop {
            let lane = table
                .active
                .entry(key.clone())
                .or_insert_with(|| self.spawn_lane(key.clone(), table.retired.remove(&key)));
            match lane.tx.send(job) {
                Ok(()) => break,
                Err(mpsc::error::SendError(returned)) => {
                    // Lane task is gone; its successor starts after it has fully ended
                    if let Some(dead) = table.active.remove(&key) {
                        table.retired.insert(key.clone(), dead.task);
                    }
                    job = returned;
                }
            }
        }
        drop(guard);

        self.stats.routed.fetch_add(1, Ordering::SeqCst);
        RouteOutcome::Dispatched(key)
    }

    /// Close the lane for `key` once its queued commands are handled
    ///
    /// A lane later opened for the same key waits for this backlog first.
    pub async fn release(&self, key: &HandlerKey) {
        let mut table = self.lanes.lock().await;
        if let Some(lane) = table.active.remove(key) {
            // Dropping the sender lets the lane task finish its queue and exit
            drop(lane.tx);
            table.retired.insert(key.clone(), lane.task);
        }
    }

    /// Stop accepting commands, close all lanes and wait for in-flight handlers
    pub async fn drain(&self) {
        let tasks: Vec<JoinHandle<()>> = {
            let mut table = self.lanes.lock().await;
            table.closed = true;
            let mut tasks: Vec<JoinHandle<()>> = table.active.drain().map(|(_, lane)| lane.task).collect();
            tasks.extend(table.retired.drain().map(|(_, task)| task));
            tasks
        };
        if tasks.is_empty() {
            return;
        }

        let count = tasks.len();
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                warn!("Lane task ended abnormally: {}", e);
            }
        }
        info!("Router drained {} lane(s)", count);
    }

    /// Accept commands again after a `drain`
    pub async fn reopen(&self) {
        self.lanes.lock().await.closed = false;
    }

    pub async fn lane_count(&self) -> usize {
        self.lanes.lock().await.active.len()
    }

    fn spawn_lane(&self, key: HandlerKey, predecessor: Option<JoinHandle<()>>) -> Lane {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_lane(
            key,
            rx,
            predecessor,
            self.workers.clone(),
            self.outbox.clone(),
            self.stats.clone(),
        ));
        Lane { tx, task }
    }
}

async fn run_lane(
    key: HandlerKey,
    mut rx: mpsc::UnboundedReceiver<Job>,
    predecessor: Option<JoinHandle<()>>,
    workers: Arc<Semaphore>,
    outbox: Outbox,
    stats: Arc<RouterStats>,
) {
    if let Some(previous) = predecessor {
        // Backlog of a released lane for this key goes first
        let _ = previous.await;
    }
    debug!("Lane {} started", key);

    while let Some(Job { command, handler }) = rx.recv().await {
        let permit = match workers.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break, // pool closed
        };

        let invoked = command.clone();
        let result = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            handler.handle(invoked)
        })
        .await;

        let outcome = match result {
            Ok(Ok(answer)) => Ok(answer),
            Ok(Err(e)) => Err(LiveError::HandlerError(format!("{e:#}"))),
            Err(e) => Err(LiveError::HandlerError(format!("handler panicked: {e}"))),
        };
        emit(&outbox, &stats, &command, outcome).await;
    }

    debug!("Lane {} closed", key);
}

/// Publish the messages an answer asks for, or an error response on failure
async fn emit(outbox: &Outbox, stats: &RouterStats, command: &Command, outcome: Result<Answer, LiveError>) {
    let answer = match outcome {
        Ok(answer) => answer,
        Err(err) => {
            stats.handler_errors.fetch_add(1, Ordering::SeqCst);
            warn!(
                "{} command {}: {}",
                command.command_type().label(),
                command.correlation_id(),
                err
            );
            let message = match err {
                LiveError::HandlerError(message) => message,
                other => other.to_string(),
            };
            let response = Response::handler_error(command, message);
            send_response(outbox, stats, response).await;
            return;
        }
    };

    let (response, event) = answer.into_parts();
    if let Some(response) = response {
        send_response(outbox, stats, response).await;
    }
    if let Some(event) = event {
        match outbox.send(Payload::Event(event.to_wire())).await {
            Ok(()) => {
                stats.events_sent.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => warn!("Failed to publish event for {}: {}", command.correlation_id(), e),
        }
    }
}

async fn send_response(outbox: &Outbox, stats: &RouterStats, response: Response) {
    let correlation_id = response.correlation_id().to_string();
    match outbox.send(Payload::Response(response.to_wire())).await {
        Ok(()) => {
            stats.responses_sent.fetch_add(1, Ordering::SeqCst);
            debug!("Response sent for {}", correlation_id);
        }
        Err(e) => warn!("Failed to send response for {}: {}", correlation_id, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{EventFactory, HandlerResult, ResponseFactory};
    use crate::transport::{MemoryPeer, MemoryTransport};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::time::Duration;
    use things_live_shared::{status, CommandType, Envelope, EventType};

    const THING: &str = "org.example:thing-1";

    fn setup(pool: usize) -> (Arc<CommandRegistry>, CommandRouter, MemoryPeer) {
        let (transport, _events, peer) = MemoryTransport::pair();
        let registry = Arc::new(CommandRegistry::new());
        let outbox = Outbox::new("device", Arc::new(transport));
        let router = CommandRouter::new(registry.clone(), outbox, pool);
        (registry, router, peer)
    }

    fn put_property(feature: &str, value: serde_json::Value, correlation: &str) -> Command {
        Command::new(CommandType::CmdModifyFeatureProperty, THING)
            .with_feature(feature)
            .with_pointer("temperature")
            .with_value(value)
            .with_correlation_id(correlation)
            .with_reply_to("backend")
    }

    async fn next(peer: &mut MemoryPeer) -> Envelope {
        tokio::time::timeout(Duration::from_secs(5), peer.next_published())
            .await
            .expect("nothing published in time")
            .expect("transport closed")
    }

    #[tokio::test]
    async fn test_unmatched_command_is_dropped_once() {
        let (_registry, router, mut peer) = setup(2);

        let outcome = router.route(put_property("temp-sensor", json!(1), "c-1")).await;
        assert_eq!(outcome, RouteOutcome::NoHandler);
        router.drain().await;

        assert_eq!(router.stats().no_handler, 1);
        assert!(peer.try_next_published().is_none());
    }

    #[tokio::test]
    async fn test_temperature_scenario_emits_response_and_event() {
        let (registry, router, mut peer) = setup(2);
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();

        let key = HandlerKey::for_feature(THING, "temp-sensor", CommandType::CmdModifyFeatureProperty);
        registry
            .register(
                key.clone(),
                Arc::new(move |cmd: Command| -> HandlerResult {
                    seen.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(cmd.property_pointer(), "/temperature");
                    Ok(cmd
                        .answer()
                        .with_response(ResponseFactory::modified)
                        .with_event(EventFactory::modified)
                        .build())
                }),
            )
            .await;

        let outcome = router.route(put_property("temp-sensor", json!(23.21), "c-42")).await;
        assert_eq!(outcome, RouteOutcome::Dispatched(key));

        match next(&mut peer).await.payload {
            Some(Payload::Response(resp)) => {
                assert_eq!(resp.correlation_id, "c-42");
                assert_eq!(resp.status, status::NO_CONTENT);
            }
            other => panic!("expected response, got {:?}", other),
        }
        match next(&mut peer).await.payload {
            Some(Payload::Event(event)) => {
                assert_eq!(event.event_type, i32::from(EventType::EvtFeaturePropertyModified));
                assert_eq!(event.pointer, "/temperature");
                assert_eq!(event.value_json, "23.21");
            }
            other => panic!("expected event, got {:?}", other),
        }

        router.drain().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(router.stats().responses_sent, 1);
        assert_eq!(router.stats().events_sent, 1);
    }

    #[tokio::test]
    async fn test_failing_handler_yields_error_response_without_event() {
        let (registry, router, mut peer) = setup(2);
        registry
            .register(
                HandlerKey::for_entity(THING, CommandType::CmdModifyFeatureProperty),
                Arc::new(|_cmd: Command| -> HandlerResult { anyhow::bail!("sensor offline") }),
            )
            .await;

        router.route(put_property("temp-sensor", json!(1), "c-err")).await;
        match next(&mut peer).await.payload {
            Some(Payload::Response(resp)) => {
                assert_eq!(resp.status, status::HANDLER_ERROR);
                assert_eq!(resp.error_code, status::HANDLER_ERROR_CODE);
                assert!(resp.message.contains("sensor offline"));
            }
            other => panic!("expected error response, got {:?}", other),
        }

        router.drain().await;
        assert!(peer.try_next_published().is_none());
        assert_eq!(router.stats().handler_errors, 1);
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_take_down_router() {
        let (registry, router, mut peer) = setup(1);
        registry
            .register(
                HandlerKey::for_entity(THING, CommandType::CmdModifyFeatureProperty),
                Arc::new(|cmd: Command| -> HandlerResult {
                    if cmd.correlation_id() == "boom" {
                        panic!("handler bug");
                    }
                    Ok(cmd.answer().with_response(ResponseFactory::modified).build())
                }),
            )
            .await;

        router.route(put_property("f", json!(1), "boom")).await;
        router.route(put_property("f", json!(2), "fine")).await;

        let first = next(&mut peer).await;
        let second = next(&mut peer).await;
        match (first.payload, second.payload) {
            (Some(Payload::Response(a)), Some(Payload::Response(b))) => {
                assert_eq!(a.status, status::HANDLER_ERROR);
                assert_eq!(b.correlation_id, "fine");
                assert_eq!(b.status, status::NO_CONTENT);
            }
            other => panic!("unexpected payloads: {:?}", other),
        }
        router.drain().await;
    }

    #[tokio::test]
    async fn test_same_key_commands_complete_in_submission_order() {
        let (registry, router, mut peer) = setup(4);
        registry
            .register(
                HandlerKey::for_feature(THING, "temp-sensor", CommandType::CmdModifyFeatureProperty),
                Arc::new(|cmd: Command| -> HandlerResult {
                    // Earlier commands sleep longer; order must still hold
                    let n = cmd.property_value().and_then(|v| v.as_u64()).unwrap_or(0);
                    std::thread::sleep(Duration::from_millis(20u64.saturating_sub(n * 2)));
                    Ok(cmd.answer().with_response(ResponseFactory::modified).build())
                }),
            )
            .await;

        for i in 0..8u64 {
            router
                .route(put_property("temp-sensor", json!(i), &format!("c-{i}")))
                .await;
        }

        for i in 0..8u64 {
            match next(&mut peer).await.payload {
                Some(Payload::Response(resp)) => assert_eq!(resp.correlation_id, format!("c-{i}")),
                other => panic!("expected response, got {:?}", other),
            }
        }
        router.drain().await;
    }

    #[tokio::test]
    async fn test_different_keys_run_concurrently() {
        let (registry, router, mut peer) = setup(2);
        // Both handlers must be inside `wait` at the same time to get through
        let barrier = Arc::new(Barrier::new(2));

        for feature in ["a", "b"] {
            let barrier = barrier.clone();
            registry
                .register(
                    HandlerKey::for_feature(THING, feature, CommandType::CmdModifyFeatureProperty),
                    Arc::new(move |cmd: Command| -> HandlerResult {
                        barrier.wait();
                        Ok(cmd.answer().with_response(ResponseFactory::modified).build())
                    }),
                )
                .await;
        }

        router.route(put_property("a", json!(1), "c-a")).await;
        router.route(put_property("b", json!(2), "c-b")).await;

        let mut ids = vec![];
        for _ in 0..2 {
            if let Some(Payload::Response(resp)) = next(&mut peer).await.payload {
                ids.push(resp.correlation_id);
            }
        }
        ids.sort();
        assert_eq!(ids, vec!["c-a".to_string(), "c-b".to_string()]);
        router.drain().await;
    }

    #[tokio::test]
    async fn test_expired_command_is_not_dispatched() {
        let (registry, router, _peer) = setup(1);
        registry
            .register(
                HandlerKey::for_entity(THING, CommandType::CmdModifyFeatureProperty),
                Arc::new(|_cmd: Command| -> HandlerResult { Ok(Answer::none()) }),
            )
            .await;

        let cmd = put_property("f", json!(1), "old").with_expiry(1);
        assert_eq!(router.route(cmd).await, RouteOutcome::Expired);
        assert_eq!(router.stats().expired, 1);
        assert_eq!(router.lane_count().await, 0);
    }
    #[tokio::test]
    async fn test_reregistered_key_handles_released_backlog_first() {
        let (registry, router, mut peer) = setup(4);
        let key = HandlerKey::for_entity(THING, CommandType::CmdModifyThing);
        let slow = |cmd: Command| -> HandlerResult {
            std::thread::sleep(Duration::from_millis(100));
            Ok(cmd.answer().with_response(ResponseFactory::modified).build())
        };
        fn modify(correlation: &str) -> Command {
            Command::new(CommandType::CmdModifyThing, THING)
                .with_value(json!({"on": true}))
                .with_correlation_id(correlation)
                .with_reply_to("backend")
        }

        let first = registry.register(key.clone(), Arc::new(slow)).await;
        for i in 0..3 {
            router.route(modify(&format!("c-{i}"))).await;
        }

        assert!(registry.unregister(&first).await);
        router.release(&key).await;
        assert_eq!(router.route(modify("c-gap")).await, RouteOutcome::NoHandler);

        registry.register(key.clone(), Arc::new(slow)).await;
        assert_eq!(router.route(modify("c-3")).await, RouteOutcome::Dispatched(key));

        let mut order = vec![];
        for _ in 0..4 {
            match next(&mut peer).await.payload {
                Some(Payload::Response(resp)) => order.push(resp.correlation_id),
                other => panic!("expected response, got {:?}", other),
            }
        }
        assert_eq!(order, vec!["c-0", "c-1", "c-2", "c-3"]);

        router.drain().await;
        assert!(peer.try_next_published().is_none());
        assert_eq!(router.stats().responses_sent, 4);
    }

    #[tokio::test]
    async fn test_worker_pool_bounds_concurrent_handlers() {
        let (registry, router, mut peer) = setup(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for i in 0..6 {
            let running = running.clone();
            let peak = peak.clone();
            registry
                .register(
                    HandlerKey::for_feature(THING, format!("f{i}"), CommandType::CmdModifyFeatureProperty),
                    Arc::new(move |cmd: Command| -> HandlerResult {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(30));
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok(cmd.answer().with_response(ResponseFactory::modified).build())
                    }),
                )
                .await;
        }

        for i in 0..6 {
            router.route(put_property(&format!("f{i}"), json!(i), &format!("c-{i}"))).await;
        }
        assert_eq!(router.lane_count().await, 6);

        for _ in 0..6 {
            assert!(matches!(next(&mut peer).await.payload, Some(Payload::Response(_))));
        }
        router.drain().await;

        let peak = peak.load(Ordering::SeqCst);
        assert!(peak >= 1 && peak <= 2, "peak concurrency was {peak}");
    }

    #[tokio::test]
    async fn test_event_only_answer_publishes_no_response() {
        let (registry, router, mut peer) = setup(1);
        registry
            .register(
                HandlerKey::for_feature(THING, "temp-sensor", CommandType::CmdModifyFeatureProperty),
                Arc::new(|cmd: Command| -> HandlerResult {
                    Ok(cmd.answer().with_event(EventFactory::modified).build())
                }),
            )
            .await;

        router.route(put_property("temp-sensor", json!(19.5), "c-evt")).await;
        match next(&mut peer).await.payload {
            Some(Payload::Event(event)) => {
                assert_eq!(event.event_type, i32::from(EventType::EvtFeaturePropertyModified));
                assert_eq!(event.value_json, "19.5");
            }
            other => panic!("expected event, got {:?}", other),
        }

        router.drain().await;
        assert!(peer.try_next_published().is_none());
        assert_eq!(router.stats().events_sent, 1);
        assert_eq!(router.stats().responses_sent, 0);
    }

    #[tokio::test]
    async fn test_drained_router_drops_commands_until_reopened() {
        let (registry, router, mut peer) = setup(1);
        let key = HandlerKey::for_entity(THING, CommandType::CmdModifyFeatureProperty);
        registry
            .register(
                key.clone(),
                Arc::new(|cmd: Command| -> HandlerResult {
                    Ok(cmd.answer().with_response(ResponseFactory::modified).build())
                }),
            )
            .await;

        router.drain().await;
        assert_eq!(router.route(put_property("f", json!(1), "late")).await, RouteOutcome::Closed);
        assert_eq!(router.lane_count().await, 0);
        assert_eq!(router.stats().routed, 0);
        assert!(peer.try_next_published().is_none());

        router.reopen().await;
        assert_eq!(
            router.route(put_property("f", json!(2), "again")).await,
            RouteOutcome::Dispatched(key)
        );
        match next(&mut peer).await.payload {
            Some(Payload::Response(resp)) => assert_eq!(resp.correlation_id, "again"),
            other => panic!("expected response, got {:?}", other),
        }
        router.drain().await;
    }
}
