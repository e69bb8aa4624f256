//! Live client facade
//!
//! Wires registry, router, tracker and consumption controller onto one
//! transport and runs the inbound pump that feeds them.

use crate::command::{
    Command, CommandRegistry, CommandRouter, Event, HandlerKey, LiveCommandHandler,
    RegistrationHandle, Response, RouterStatsSnapshot,
};
use crate::config::ClientConfig;
use crate::consumption::{ConsumptionController, ConsumptionState};
use crate::correlation::{CorrelationTracker, ResponseHandle, TimeoutSweeper};
use crate::error::LiveError;
use crate::live::{FeatureLive, ThingLive};
use crate::transport::{LiveTransport, Outbox, TransportEvent, TransportEvents};
use std::sync::Arc;
use std::time::Duration;
use things_live_shared::{envelope::Payload, Envelope};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct ClientInner {
    config: ClientConfig,
    registry: Arc<CommandRegistry>,
    router: Arc<CommandRouter>,
    tracker: Arc<CorrelationTracker>,
    consumption: Arc<ConsumptionController>,
    events_tx: broadcast::Sender<Event>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Handle to one live-channel client; cheap to clone
#[derive(Clone)]
pub struct LiveClient {
    inner: Arc<ClientInner>,
}

impl LiveClient {
    /// Build a client on `transport` and start its background tasks
    ///
    /// Must be called inside a tokio runtime.
    pub fn new<T: LiveTransport>(config: ClientConfig, transport: T, events: TransportEvents) -> Self {
        let transport: Arc<dyn LiveTransport> = Arc::new(transport);
        let outbox = Outbox::new(config.client_id.clone(), transport.clone());

        let registry = Arc::new(CommandRegistry::new());
        let router = Arc::new(CommandRouter::new(
            registry.clone(),
            outbox.clone(),
            config.worker_pool_size,
        ));
        let tracker = Arc::new(CorrelationTracker::new(
            outbox,
            config.default_timeout,
            config.settled_history,
        ));
        let consumption = Arc::new(ConsumptionController::new(transport, router.clone()));
        let (events_tx, _) = broadcast::channel(config.event_buffer.max(1));

        let pump = tokio::spawn(pump_inbound(
            events,
            router.clone(),
            tracker.clone(),
            consumption.clone(),
            events_tx.clone(),
        ));
        let sweeper = TimeoutSweeper::new(tracker.clone(), config.sweep_interval);
        let sweep = tokio::spawn(async move { sweeper.run().await });

        info!("Live client {} created", config.client_id);

        Self {
            inner: Arc::new(ClientInner {
                config,
                registry,
                router,
                tracker,
                consumption,
                events_tx,
                tasks: Mutex::new(vec![pump, sweep]),
            }),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.inner.config.client_id
    }

    /// Live operations on one thing
    pub fn for_id(&self, thing_id: impl Into<String>) -> ThingLive {
        ThingLive::new(self.clone(), thing_id.into())
    }

    /// Live operations on one feature of a thing
    pub fn for_feature(&self, thing_id: impl Into<String>, feature_id: impl Into<String>) -> FeatureLive {
        FeatureLive::new(self.clone(), thing_id.into(), feature_id.into())
    }

    /// Register `handler` for commands matching `key`
    pub async fn register_handler<H: LiveCommandHandler>(
        &self,
        key: HandlerKey,
        handler: H,
    ) -> RegistrationHandle {
        self.inner.registry.register(key, Arc::new(handler)).await
    }

    /// Remove a registration; commands already queued for it are still handled
    pub async fn unregister_handler(&self, handle: &RegistrationHandle) -> bool {
        let removed = self.inner.registry.unregister(handle).await;
        if removed {
            self.inner.router.release(handle.key()).await;
        }
        removed
    }

    /// Send a live command and get a handle for its response
    pub async fn send(&self, command: Command, timeout: Option<Duration>) -> ResponseHandle {
        self.inner.tracker.send(command, timeout).await
    }

    /// Send a live command and wait for its response
    pub async fn request(&self, command: Command, timeout: Option<Duration>) -> Result<Response, LiveError> {
        self.send(command, timeout).await.wait().await
    }

    pub async fn start_consumption(&self) -> Result<(), LiveError> {
        self.inner.consumption.start().await
    }

    pub async fn stop_consumption(&self) -> Result<(), LiveError> {
        self.inner.consumption.stop().await
    }

    pub async fn consumption_state(&self) -> ConsumptionState {
        self.inner.consumption.state().await
    }

    /// Live events received while consuming
    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.inner.events_tx.subscribe()
    }

    pub fn router_stats(&self) -> RouterStatsSnapshot {
        self.inner.router.stats()
    }

    pub async fn pending_requests(&self) -> usize {
        self.inner.tracker.pending_count().await
    }

    /// Stop consuming, drop all registrations and stop background tasks
    pub async fn shutdown(&self) {
        if let Err(e) = self.inner.consumption.stop().await {
            warn!("Error stopping consumption during shutdown: {}", e);
        }
        self.inner.registry.clear().await;
        self.inner.tracker.fail_all("client shut down").await;

        for task in self.inner.tasks.lock().await.drain(..) {
            task.abort();
        }
        info!("Live client {} shut down", self.inner.config.client_id);
    }
}

/// Feed transport events into router, tracker and event subscribers
async fn pump_inbound(
    mut events: TransportEvents,
    router: Arc<CommandRouter>,
    tracker: Arc<CorrelationTracker>,
    consumption: Arc<ConsumptionController>,
    events_tx: broadcast::Sender<Event>,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Connected { transport } => {
                info!("Live transport connected via {}", transport);
            }
            TransportEvent::Disconnected { reason } => {
                consumption.on_transport_failure(&reason).await;
                tracker.fail_all(&reason).await;
            }
            TransportEvent::Received(envelope) => {
                handle_envelope(envelope, &router, &tracker, &consumption, &events_tx).await;
            }
        }
    }
    debug!("Transport event stream closed");
}

async fn handle_envelope(
    envelope: Envelope,
    router: &CommandRouter,
    tracker: &CorrelationTracker,
    consumption: &ConsumptionController,
    events_tx: &broadcast::Sender<Event>,
) {
    let from = envelope.client_id().to_string();

    match envelope.payload {
        Some(Payload::Command(wire)) => {
            if !consumption.is_accepting() {
                debug!("Not consuming, dropping command {} from {}", wire.correlation_id, from);
                return;
            }
            match Command::try_from(wire) {
                Ok(command) => {
                    router.route(command).await;
                }
                Err(e) => warn!("Dropping invalid command from {}: {}", from, e),
            }
        }
        Some(Payload::Response(wire)) => match Response::try_from(wire) {
            Ok(response) => {
                tracker.complete(response).await;
            }
            Err(e) => warn!("Dropping invalid response from {}: {}", from, e),
        },
        Some(Payload::Event(wire)) => {
            if !consumption.is_accepting() {
                return;
            }
            match Event::try_from(wire) {
                Ok(event) => {
                    // No receivers is fine
                    let _ = events_tx.send(event);
                }
                Err(e) => warn!("Dropping invalid event from {}: {}", from, e),
            }
        }
        Some(other) => debug!("Ignoring {:?} from {}", other.message_type(), from),
        None => debug!("Ignoring empty envelope from {}", from),
    }
}
