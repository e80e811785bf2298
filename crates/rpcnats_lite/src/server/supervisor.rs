use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

use crate::server::config::SupervisorConfig;
use crate::server::handler::{Dispatcher, Handler};
use crate::server::session::Session;
use crate::transport::{Connection, Transport};

/// The two states of the supervisor loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Subscribed and waiting for the connection to drop.
    Active,
    /// Between sessions: connecting, subscribing, or settling after a failure.
    Retrying,
}

/// How one pass through the supervisor loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The connection could not be opened.
    ConnectFailed,
    /// Connected, but the subscription could not be registered.
    SubscribeFailed,
    /// The session was established and later lost its connection.
    Disconnected,
}

/// Counters shared by the supervisor and its dispatches.
#[derive(Debug, Default)]
pub struct SupervisorStats {
    connect_attempts: AtomicU64,
    sessions: AtomicU64,
    dispatched: AtomicU64,
    handler_errors: AtomicU64,
    panics: AtomicU64,
    publish_failures: AtomicU64,
}

impl SupervisorStats {
    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts.load(Ordering::Relaxed)
    }

    /// Sessions that reached the active state.
    pub fn sessions(&self) -> u64 {
        self.sessions.load(Ordering::Relaxed)
    }

    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    pub fn handler_errors(&self) -> u64 {
        self.handler_errors.load(Ordering::Relaxed)
    }

    pub fn panics(&self) -> u64 {
        self.panics.load(Ordering::Relaxed)
    }

    pub fn publish_failures(&self) -> u64 {
        self.publish_failures.load(Ordering::Relaxed)
    }

    pub(crate) fn record_dispatch(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_handler_error(&self) {
        self.handler_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_panic(&self) {
        self.panics.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }
}

/// Keeps a subscription alive forever, reconnecting whenever it is lost.
///
/// Every failure (connect, subscribe, or a dropped connection) is handled the
/// same way: log, wait the settle delay, start over. The delay never grows.
///
/// # Example
///
/// ```ignore
/// use rpcnats_lite::server::{KeepAliveSubscriber, SupervisorConfig};
/// use rpcnats_lite::transport::nats::NatsTransport;
///
/// let config = SupervisorConfig::new("nats://localhost:4222", "service-example");
/// KeepAliveSubscriber::new(NatsTransport::new(), config, my_handler)
///     .run_forever()
///     .await;
/// ```
pub struct KeepAliveSubscriber<T: Transport> {
    transport: T,
    config: SupervisorConfig,
    handler: Arc<dyn Handler>,
    stats: Arc<SupervisorStats>,
    state: SupervisorState,
    generation: u64,
}

impl<T: Transport> KeepAliveSubscriber<T> {
    pub fn new(transport: T, config: SupervisorConfig, handler: impl Handler) -> Self {
        Self::with_shared_handler(transport, config, Arc::new(handler))
    }

    pub fn with_shared_handler(
        transport: T,
        config: SupervisorConfig,
        handler: Arc<dyn Handler>,
    ) -> Self {
        Self {
            transport,
            config,
            handler,
            stats: Arc::new(SupervisorStats::default()),
            state: SupervisorState::Retrying,
            generation: 0,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Shared counters; stays valid after the subscriber is moved into a task.
    pub fn stats(&self) -> Arc<SupervisorStats> {
        Arc::clone(&self.stats)
    }

    /// Run the loop. Does not return.
    pub async fn run_forever(mut self) {
        loop {
            let outcome = self.run_cycle().await;
            debug!(?outcome, "Supervisor cycle finished");
        }
    }

    /// Run exactly `cycles` passes of the loop and report how each ended.
    pub async fn run_cycles(&mut self, cycles: usize) -> Vec<CycleOutcome> {
        let mut outcomes = Vec::with_capacity(cycles);
        for _ in 0..cycles {
            outcomes.push(self.run_cycle().await);
        }
        outcomes
    }

    /// One pass: connect, subscribe, wait for the connection to drop, settle.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        self.state = SupervisorState::Retrying;

        let subject = self.config.subject.clone();
        info!(subject = %subject, "Subscribing to NATS subject");

        self.stats.connect_attempts.fetch_add(1, Ordering::Relaxed);
        let connection = match self.transport.connect(&self.config.endpoint).await {
            Ok(connection) => connection,
            Err(e) => {
                warn!(endpoint = %self.config.endpoint, error = %e, "Failed to create NATS connection");
                self.move_on().await;
                return CycleOutcome::ConnectFailed;
            }
        };

        let subscription = match connection.subscribe(&subject).await {
            Ok(subscription) => subscription,
            Err(e) => {
                connection.close().await;
                warn!(subject = %subject, error = %e, "Failed to subscribe to NATS subject");
                self.move_on().await;
                return CycleOutcome::SubscribeFailed;
            }
        };

        self.generation += 1;
        let dispatcher = Dispatcher::new(
            connection.clone(),
            Arc::clone(&self.handler),
            Arc::clone(&self.stats),
        );
        let mut session = Session::start(
            self.generation,
            connection,
            subscription,
            dispatcher,
            self.config.poll_interval,
        );

        self.state = SupervisorState::Active;
        self.stats.sessions.fetch_add(1, Ordering::Relaxed);
        info!(generation = session.generation(), subject = %subject, "Connected");

        session.closed().await;
        let generation = session.generation();
        drop(session);

        self.state = SupervisorState::Retrying;
        warn!(generation, subject = %subject, "NATS subscription is closed");
        self.move_on().await;
        CycleOutcome::Disconnected
    }

    async fn move_on(&self) {
        info!(delay = ?self.config.settle_delay, "Re-establishing NATS subscription");
        tokio::time::sleep(self.config.settle_delay).await;
    }
}

impl<T: Transport> fmt::Debug for KeepAliveSubscriber<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeepAliveSubscriber")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("generation", &self.generation)
            .finish()
    }
}

/// Subscribe to `config.subject` and answer every message with `handler`,
/// forever.
pub async fn keep_alive_subscribe<T, H>(transport: T, config: SupervisorConfig, handler: H)
where
    T: Transport,
    H: Handler,
{
    KeepAliveSubscriber::new(transport, config, handler)
        .run_forever()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Response;
    use crate::error::HandlerError;
    use crate::test_support::CapturedLogs;
    use crate::transport::InboundMessage;
    use crate::transport::memory::{MemoryConnection, MemoryTransport};
    use bytes::Bytes;
    use futures::StreamExt;
    use serde_json::{Value, json};
    use std::time::Duration;
    use tokio::time::Instant;

    const SUBJECT: &str = "service-example";

    fn config() -> SupervisorConfig {
        SupervisorConfig::new("mem://broker", SUBJECT)
    }

    async fn echo(msg: InboundMessage) -> Result<Value, HandlerError> {
        let value: Value = msg.json()?;
        match value.get("op").and_then(Value::as_str) {
            Some("fail") => Err("bad method".into()),
            Some("panic") => panic!("boom"),
            Some("sleep") => {
                let ms = value.get("ms").and_then(Value::as_u64).unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(value)
            }
            _ => Ok(value),
        }
    }

    async fn wait_for_subscriber(transport: &MemoryTransport) {
        while transport.subscriber_count(SUBJECT) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn request(caller: &MemoryConnection, body: Value) -> Response {
        let reply = caller
            .request(SUBJECT, Bytes::from(body.to_string()), Duration::from_secs(5))
            .await
            .unwrap();
        Response::from_bytes(&reply).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_connect_failures_are_spaced_by_settle_delay() {
        let transport = MemoryTransport::new();
        transport.fail_next_connects(3);
        let mut subscriber = KeepAliveSubscriber::new(transport.clone(), config(), echo);

        let started = Instant::now();
        let outcomes = subscriber.run_cycles(3).await;

        assert_eq!(outcomes, vec![CycleOutcome::ConnectFailed; 3]);
        assert_eq!(transport.connect_attempts(), 3);
        assert_eq!(subscriber.stats().connect_attempts(), 3);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(300), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(310), "{elapsed:?}");
        assert_eq!(subscriber.state(), SupervisorState::Retrying);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_failure_closes_connection() {
        let transport = MemoryTransport::new();
        transport.fail_next_subscribes(1);
        let mut subscriber = KeepAliveSubscriber::new(transport.clone(), config(), echo);

        let outcomes = subscriber.run_cycles(1).await;

        assert_eq!(outcomes, vec![CycleOutcome::SubscribeFailed]);
        assert_eq!(transport.open_connections(), 0);
        assert_eq!(subscriber.stats().sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stays_connected_without_reconnecting() {
        let transport = MemoryTransport::new();
        let subscriber = KeepAliveSubscriber::new(transport.clone(), config(), echo);
        let stats = subscriber.stats();
        let task = tokio::spawn(subscriber.run_forever());

        wait_for_subscriber(&transport).await;
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(transport.connect_attempts(), 1);
        assert_eq!(stats.sessions(), 1);
        assert_eq!(transport.subscriber_count(SUBJECT), 1);
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_triggers_resubscribe_within_poll_and_settle() {
        let logs = CapturedLogs::new();
        let _guard = logs.set_default();

        let transport = MemoryTransport::new();
        let subscriber = KeepAliveSubscriber::new(transport.clone(), config(), echo);
        let stats = subscriber.stats();
        let task = tokio::spawn(subscriber.run_forever());

        wait_for_subscriber(&transport).await;
        transport.sever_connections();

        // One poll interval to notice, one settle delay before reconnecting.
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(transport.connect_attempts(), 2);
        assert_eq!(stats.sessions(), 2);
        assert_eq!(transport.open_connections(), 1);
        assert_eq!(transport.subscriber_count(SUBJECT), 1);
        assert!(logs.contents().contains("NATS subscription is closed"));

        let caller = transport.open();
        let response = request(&caller, json!({"op": "ping"})).await;
        assert_eq!(response.into_result(), Ok(json!({"op": "ping"})));
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_failed_connects_and_serves_requests() {
        let transport = MemoryTransport::new();
        transport.fail_next_connects(2);
        let task = tokio::spawn(keep_alive_subscribe(transport.clone(), config(), echo));

        wait_for_subscriber(&transport).await;
        assert_eq!(transport.connect_attempts(), 3);

        let caller = transport.open();
        let reply = caller
            .request(SUBJECT, Bytes::from_static(br#"{"x":1}"#), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(&reply[..], br#"{"Success":true,"Data":{"x":1}}"#);
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_panic_does_not_end_subscription() {
        let transport = MemoryTransport::new();
        let subscriber = KeepAliveSubscriber::new(transport.clone(), config(), echo);
        let stats = subscriber.stats();
        let task = tokio::spawn(subscriber.run_forever());
        wait_for_subscriber(&transport).await;

        let caller = transport.open();
        let panicked = request(&caller, json!({"op": "panic"})).await;
        assert!(!panicked.is_success());
        assert_eq!(panicked.error_message(), Some("boom"));

        let failed = request(&caller, json!({"op": "fail"})).await;
        assert_eq!(failed.error_message(), Some("bad method"));

        let ok = request(&caller, json!({"op": "after"})).await;
        assert!(ok.is_success());

        assert_eq!(transport.connect_attempts(), 1);
        assert_eq!(stats.panics(), 1);
        assert_eq!(stats.handler_errors(), 1);
        assert_eq!(stats.dispatched(), 3);
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_requests_are_correlated_to_their_reply() {
        let transport = MemoryTransport::new();
        let task = tokio::spawn(keep_alive_subscribe(transport.clone(), config(), echo));
        wait_for_subscriber(&transport).await;

        let caller = transport.open();
        let mut slow_inbox = caller.subscribe("inbox.slow").await.unwrap();
        let mut fast_inbox = caller.subscribe("inbox.fast").await.unwrap();

        let slow = json!({"op": "sleep", "ms": 500, "id": "slow"});
        let fast = json!({"op": "sleep", "ms": 10, "id": "fast"});
        caller
            .publish_with_reply(SUBJECT, "inbox.slow", Bytes::from(slow.to_string()))
            .await
            .unwrap();
        caller
            .publish_with_reply(SUBJECT, "inbox.fast", Bytes::from(fast.to_string()))
            .await
            .unwrap();

        // The fast reply arrives while the slow handler is still sleeping.
        let fast_reply = fast_inbox.next().await.unwrap();
        let fast_reply = Response::from_bytes(&fast_reply.payload).unwrap();
        assert_eq!(fast_reply.data(), Some(&fast));

        let slow_reply = slow_inbox.next().await.unwrap();
        let slow_reply = Response::from_bytes(&slow_reply.payload).unwrap();
        assert_eq!(slow_reply.data(), Some(&slow));

        assert!(
            tokio::time::timeout(Duration::from_millis(100), fast_inbox.next())
                .await
                .is_err(),
            "exactly one envelope per request"
        );
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_dispatch_survives_session_end() {
        let transport = MemoryTransport::new();
        let subscriber = KeepAliveSubscriber::new(transport.clone(), config(), echo);
        let stats = subscriber.stats();
        let task = tokio::spawn(subscriber.run_forever());
        wait_for_subscriber(&transport).await;

        let caller = transport.open();
        let body = json!({"op": "sleep", "ms": 1000});
        caller
            .publish_with_reply(SUBJECT, "inbox.lost", Bytes::from(body.to_string()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        transport.sever_connections();
        tokio::time::sleep(Duration::from_secs(2)).await;

        // The handler finished, but its connection was gone, so the publish failed.
        assert_eq!(stats.dispatched(), 1);
        assert_eq!(stats.publish_failures(), 1);
        assert_eq!(stats.sessions(), 2);
        task.abort();
    }
}
