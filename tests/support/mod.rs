//! Shared helpers for integration tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use things_live::transport::{MemoryPeer, MemoryTransport};
use things_live::{ClientConfig, LiveClient};
use things_live_shared::envelope::Payload;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Counts down from `count`; waiters are released when it reaches zero
#[derive(Clone)]
pub struct CountDownLatch {
    inner: Arc<LatchInner>,
}

struct LatchInner {
    remaining: AtomicUsize,
    notify: Notify,
}

impl CountDownLatch {
    pub fn new(count: usize) -> Self {
        Self {
            inner: Arc::new(LatchInner {
                remaining: AtomicUsize::new(count),
                notify: Notify::new(),
            }),
        }
    }

    /// Safe to call from blocking handler threads
    pub fn count_down(&self) {
        let previous = self
            .inner
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if previous == Ok(1) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn remaining(&self) -> usize {
        self.inner.remaining.load(Ordering::SeqCst)
    }

    /// Wait until the count reaches zero; false if `timeout` passes first
    pub async fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.remaining() == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.remaining() == 0;
            }
        }
    }
}

/// Two clients joined by an in-process relay that behaves like the broker:
/// commands and events only reach a subscribed peer, responses always do
pub fn linked_clients(a_id: &str, b_id: &str) -> (LiveClient, LiveClient) {
    let (a_transport, a_events, a_peer) = MemoryTransport::pair();
    let (b_transport, b_events, b_peer) = MemoryTransport::pair();

    relay(a_peer, b_peer);

    (
        LiveClient::new(ClientConfig::new(a_id), a_transport, a_events),
        LiveClient::new(ClientConfig::new(b_id), b_transport, b_events),
    )
}

fn relay(a: MemoryPeer, b: MemoryPeer) {
    let (a_in, mut a_out) = a.split();
    let (b_in, mut b_out) = b.split();

    let to_b = b_in.clone();
    tokio::spawn(async move {
        while let Some(envelope) = a_out.recv().await {
            if reaches(&envelope, to_b.is_subscribed()) {
                let _ = to_b.deliver(envelope).await;
            }
        }
    });
    let to_a = a_in.clone();
    tokio::spawn(async move {
        while let Some(envelope) = b_out.recv().await {
            if reaches(&envelope, to_a.is_subscribed()) {
                let _ = to_a.deliver(envelope).await;
            }
        }
    });
}

fn reaches(envelope: &things_live_shared::Envelope, subscribed: bool) -> bool {
    match &envelope.payload {
        Some(Payload::Command(_)) | Some(Payload::Event(_)) => subscribed,
        Some(Payload::Response(_)) => true,
        _ => false,
    }
}
