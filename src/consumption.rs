//! Consumption controller
//!
//! Gates the flow of inbound live commands into the router and owns the
//! broker-side subscription.

use crate::command::CommandRouter;
use crate::error::LiveError;
use crate::transport::LiveTransport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumptionState {
    Stopped,
    Started,
    /// Stopped by a transport failure; needs an explicit `start`
    Failed,
}

pub struct ConsumptionController {
    transport: Arc<dyn LiveTransport>,
    router: Arc<CommandRouter>,
    /// Held across subscribe/unsubscribe so concurrent calls see one transition
    lifecycle: Mutex<ConsumptionState>,
    accepting: AtomicBool,
}

impl ConsumptionController {
    pub fn new(transport: Arc<dyn LiveTransport>, router: Arc<CommandRouter>) -> Self {
        Self {
            transport,
            router,
            lifecycle: Mutex::new(ConsumptionState::Stopped),
            accepting: AtomicBool::new(false),
        }
    }

    /// Subscribe for live commands; returns immediately if already started
    pub async fn start(&self) -> Result<(), LiveError> {
        let mut state = self.lifecycle.lock().await;
        if *state == ConsumptionState::Started {
            debug!("Consumption already started");
            return Ok(());
        }

        self.transport.subscribe().await?;
        self.router.reopen().await;
        *state = ConsumptionState::Started;
        self.accepting.store(true, Ordering::SeqCst);
        info!("Live consumption started via {}", self.transport.name());
        Ok(())
    }

    /// Stop accepting commands, release the subscription, let running handlers finish
    pub async fn stop(&self) -> Result<(), LiveError> {
        let mut state = self.lifecycle.lock().await;
        self.accepting.store(false, Ordering::SeqCst);

        let released = match *state {
            ConsumptionState::Started => self.transport.unsubscribe().await,
            ConsumptionState::Stopped | ConsumptionState::Failed => Ok(()),
        };

        self.router.drain().await;
        *state = ConsumptionState::Stopped;

        match released {
            Ok(()) => {
                info!("Live consumption stopped");
                Ok(())
            }
            Err(e) => {
                warn!("Live consumption stopped, but unsubscribe failed: {}", e);
                Err(e.into())
            }
        }
    }

    /// Record a connection loss; the broker-side subscription is gone
    pub async fn on_transport_failure(&self, reason: &str) {
        self.accepting.store(false, Ordering::SeqCst);
        let mut state = self.lifecycle.lock().await;
        if *state == ConsumptionState::Started {
            *state = ConsumptionState::Failed;
            warn!("Live consumption halted by transport failure: {}", reason);
        }
    }

    /// Whether inbound commands should currently be routed
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    pub async fn state(&self) -> ConsumptionState {
        *self.lifecycle.lock().await
    }
}
