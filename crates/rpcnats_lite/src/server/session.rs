use futures::StreamExt;
use std::fmt;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::server::handler::Dispatcher;
use crate::server::watcher::spawn_watcher;
use crate::transport::{Connection, Subscription};

/// One connect-subscribe-monitor cycle.
///
/// Holds the receiving half of the one-shot the liveness watcher fires when
/// the connection drops. Dropping the session stops delivery of further
/// messages; dispatches already spawned run to completion on their own.
pub(crate) struct Session {
    generation: u64,
    closed: Option<oneshot::Receiver<()>>,
    delivery: JoinHandle<()>,
    watcher: JoinHandle<()>,
}

impl Session {
    /// Start delivering `subscription` to `dispatcher` and spawn the watcher.
    pub fn start<C: Connection>(
        generation: u64,
        connection: C,
        subscription: Subscription,
        dispatcher: Dispatcher<C>,
        poll_interval: Duration,
    ) -> Self {
        let (tx, rx) = oneshot::channel();

        let delivery = tokio::spawn(async move {
            let mut subscription = subscription;
            while let Some(msg) = subscription.next().await {
                dispatcher.spawn(msg);
            }
            tracing::debug!(generation, "Subscription stream ended");
        });

        let watcher = spawn_watcher(connection, tx, poll_interval);

        Self {
            generation,
            closed: Some(rx),
            delivery,
            watcher,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Wait for the watcher to report that the connection is gone.
    pub async fn closed(&mut self) {
        if let Some(rx) = self.closed.take() {
            if rx.await.is_err() {
                // Watcher ended without signalling; the session is unusable either way.
                tracing::warn!(generation = self.generation, "Liveness watcher exited unexpectedly");
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.delivery.abort();
        if !self.watcher.is_finished() {
            tracing::debug!(generation = self.generation, "Session dropped while watcher still running");
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("generation", &self.generation)
            .finish()
    }
}
